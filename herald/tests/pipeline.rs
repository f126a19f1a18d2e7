use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use herald::database::repositories::{
    IdempotencyRepository, NotificationLogRepository, ReceiverRepository, SqlxIdempotencyRepository,
    SqlxNotificationLogRepository, SqlxReceiverRepository, SqlxSubscriptionRepository,
    SubscriptionRepository,
};
use herald::database::{DbPool, init_memory_pool};
use herald::dispatch::NotificationService;
use herald::domain::{
    JsonMap, Notification, NotificationType, Receiver, ReceiverMetadata, Subscription,
};
use herald::handler::{HandlerConfig, HandlerDeps, NotificationHandler, idempotency_scope};
use herald::notifier::{DeliveryPayload, Notifier, NotifierRegistry, SendError};
use herald::queue::{MessageStatus, Queue, SqliteQueue, SqliteQueueConfig, Strategy};

struct Recording {
    sent: Mutex<Vec<DeliveryPayload>>,
    failure: Option<SendError>,
}

impl Recording {
    fn new(failure: Option<SendError>) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            failure,
        })
    }

    fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for Recording {
    fn receiver_type(&self) -> &str {
        "slack"
    }

    async fn send(&self, payload: &DeliveryPayload, _: &JsonMap) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(payload.clone());
        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

struct Pipeline {
    pool: DbPool,
    service: NotificationService,
    notifier: Arc<Recording>,
    subscription: Subscription,
    receiver: Receiver,
}

impl Pipeline {
    async fn new(failure: Option<SendError>) -> Self {
        let pool = init_memory_pool().await.unwrap();
        let receivers = Arc::new(SqlxReceiverRepository::new(pool.clone()));
        let receiver = receivers
            .create(&Receiver::new("team-x", "slack").with_config("token", "xoxb"))
            .await
            .unwrap();
        let subscription = SqlxSubscriptionRepository::new(pool.clone())
            .create(
                &Subscription::new("team-x-critical", 1)
                    .with_match("team", "x")
                    .with_receiver(
                        ReceiverMetadata::new(receiver.id).with_config("channel_name", "alerts"),
                    ),
            )
            .await
            .unwrap();

        let service =
            NotificationService::new(Arc::new(SqliteQueue::normal(pool.clone())), receivers);
        Self {
            pool,
            service,
            notifier: Recording::new(failure),
            subscription,
            receiver,
        }
    }

    fn queue(&self, strategy: Strategy) -> Arc<SqliteQueue> {
        Arc::new(SqliteQueue::new(
            self.pool.clone(),
            SqliteQueueConfig {
                strategy,
                ..Default::default()
            },
        ))
    }

    fn handler(&self, queue: Arc<SqliteQueue>) -> NotificationHandler {
        let registry = Arc::new(NotifierRegistry::new().with(self.notifier.clone()));
        NotificationHandler::new(
            HandlerDeps::sqlite(&self.pool, queue, registry),
            HandlerConfig {
                send_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        )
        .unwrap()
    }

    async fn dispatch_alert(&self) -> (String, Notification) {
        let notification = Notification::new(NotificationType::Subscriber)
            .with_namespace(1)
            .with_label("team", "x")
            .with_label("severity", "CRITICAL");
        let ids = self.service.dispatch(vec![notification.clone()]).await.unwrap();
        (ids[0].clone(), notification)
    }
}

#[tokio::test]
async fn subscriber_notification_is_delivered_once() {
    let pipeline = Pipeline::new(None).await;
    let (message_id, notification) = pipeline.dispatch_alert().await;

    let queue = pipeline.queue(Strategy::Normal);
    let handler = pipeline.handler(queue.clone());
    assert_eq!(handler.process().await.unwrap(), 1);

    assert_eq!(pipeline.notifier.calls(), 1);
    let sent = pipeline.notifier.sent.lock().unwrap()[0].clone();
    assert_eq!(sent.subscription_id, Some(pipeline.subscription.id));
    assert_eq!(sent.receiver_id, pipeline.receiver.id);

    let record = SqlxIdempotencyRepository::new(pipeline.pool.clone())
        .check(
            &idempotency_scope(Some(pipeline.subscription.id), pipeline.receiver.id),
            &notification.id,
        )
        .await
        .unwrap();
    assert!(record.success);

    let logs = SqlxNotificationLogRepository::new(pipeline.pool.clone())
        .list_by_notification(&notification.id)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].subscription_id, Some(pipeline.subscription.id));

    assert_eq!(queue.get(&message_id).await.unwrap().status, MessageStatus::Published);
    assert_eq!(handler.process().await.unwrap(), 0);
    assert_eq!(pipeline.notifier.calls(), 1);
}

#[tokio::test]
async fn retryable_failures_end_in_the_dead_letter_queue() {
    let pipeline = Pipeline::new(Some(SendError::retryable("503 Service Unavailable"))).await;
    let (message_id, _) = pipeline.dispatch_alert().await;

    let queue = pipeline.queue(Strategy::Normal);
    let handler = pipeline.handler(queue.clone());

    for attempt in 1..3 {
        assert_eq!(handler.process().await.unwrap(), 1);
        let message = queue.get(&message_id).await.unwrap();
        assert_eq!(message.status, MessageStatus::Pending);
        assert_eq!(message.attempt_count, attempt);
    }

    assert_eq!(handler.process().await.unwrap(), 1);
    let message = queue.get(&message_id).await.unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.strategy, Strategy::Dlq);
    assert!(message.retryable);
    assert!(message.last_error.unwrap().contains("503"));

    // Gone from the normal backlog.
    assert_eq!(handler.process().await.unwrap(), 0);
    assert_eq!(pipeline.notifier.calls(), 3);

    // The dead-letter handler re-drives it.
    let dlq = pipeline.handler(pipeline.queue(Strategy::Dlq));
    assert_eq!(dlq.process().await.unwrap(), 1);
    assert_eq!(pipeline.notifier.calls(), 4);
    let message = queue.get(&message_id).await.unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.attempt_count, 1);
}
