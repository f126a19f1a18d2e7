//! Notification handler.
//!
//! Drains one claimed batch. For every message it resolves the routes
//! (subscription, receiver) the notification goes to, drops silenced routes,
//! delivers the rest through the notifier registry under an idempotency guard
//! and records what happened in the notification log.
//!
//! Per-route results fold into one queue outcome per message:
//!
//! | routes contain                         | outcome                       |
//! |----------------------------------------|-------------------------------|
//! | a fatal failure                        | dead-letter                   |
//! | a retryable failure (no fatal)         | retry                         |
//! | a storage failure (no delivery errors) | requeue, no attempt counted   |
//! | only delivered / skipped / silenced    | published                     |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::database::DbPool;
use crate::database::repositories::{
    AlertRepository, IdempotencyRepository, NotificationLogRepository, ReceiverRepository,
    SilenceRepository, SqlxAlertRepository, SqlxIdempotencyRepository,
    SqlxNotificationLogRepository, SqlxReceiverRepository, SqlxSilenceRepository,
    SqlxSubscriptionRepository, SubscriptionRepository,
};
use crate::domain::{
    JsonMap, Notification, NotificationLogEntry, NotificationType, Receiver, SilenceStatus,
};
use crate::matching::{
    SilenceEngine, SubscriptionMatcher, receiver_silences, silence_ids, subscription_silences,
};
use crate::notifier::{DeliveryPayload, NotifierRegistry, SendError};
use crate::queue::{BatchHandler, BatchResult, ClaimFilter, MessageOutcome, Queue, QueueMessage};
use crate::{Error, Result};

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// Name used in logs.
    pub identifier: String,
    pub batch_size: usize,
    /// Receiver types to deliver. Empty means every registered type. A handler
    /// limited to some of the registered types only claims rows addressed at
    /// one of its types.
    pub receiver_types: Vec<String>,
    pub send_timeout: Duration,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            identifier: "notification-handler".to_string(),
            batch_size: 1,
            receiver_types: Vec::new(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Collaborators of a [`NotificationHandler`].
#[derive(Clone)]
pub struct HandlerDeps {
    pub queue: Arc<dyn Queue>,
    pub registry: Arc<NotifierRegistry>,
    pub receivers: Arc<dyn ReceiverRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub silences: Arc<dyn SilenceRepository>,
    pub idempotency: Arc<dyn IdempotencyRepository>,
    pub log: Arc<dyn NotificationLogRepository>,
    pub alerts: Arc<dyn AlertRepository>,
}

impl HandlerDeps {
    /// SQLite-backed collaborators sharing one pool.
    pub fn sqlite(pool: &DbPool, queue: Arc<dyn Queue>, registry: Arc<NotifierRegistry>) -> Self {
        Self {
            queue,
            registry,
            receivers: Arc::new(SqlxReceiverRepository::new(pool.clone())),
            subscriptions: Arc::new(SqlxSubscriptionRepository::new(pool.clone())),
            silences: Arc::new(SqlxSilenceRepository::new(pool.clone())),
            idempotency: Arc::new(SqlxIdempotencyRepository::new(pool.clone())),
            log: Arc::new(SqlxNotificationLogRepository::new(pool.clone())),
            alerts: Arc::new(SqlxAlertRepository::new(pool.clone())),
        }
    }
}

/// Idempotency scope of one route. The key is the notification id, so one
/// notification is delivered at most once per (subscription, receiver).
pub fn idempotency_scope(subscription_id: Option<i64>, receiver_id: i64) -> String {
    match subscription_id {
        Some(subscription_id) => format!("subscription:{subscription_id}:receiver:{receiver_id}"),
        None => format!("receiver:{receiver_id}"),
    }
}

/// Result of one route.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RouteOutcome {
    Delivered,
    /// Already delivered by an earlier attempt.
    Skipped,
    Retryable(String),
    Fatal(String),
    /// Storage failure unrelated to the content.
    Infra(String),
}

impl RouteOutcome {
    fn failed(receiver_id: i64, error: SendError) -> Self {
        match error {
            SendError::Retryable(msg) => Self::Retryable(format!("receiver {receiver_id}: {msg}")),
            SendError::Fatal(msg) => Self::Fatal(format!("receiver {receiver_id}: {msg}")),
        }
    }
}

/// A resolved delivery target.
struct Route {
    subscription_id: Option<i64>,
    receiver: Receiver,
    /// Receiver configuration with the subscription's overrides applied.
    config: JsonMap,
}

/// Route outcomes and log entries collected for one message.
#[derive(Default)]
struct Report {
    outcomes: Vec<RouteOutcome>,
    logs: Vec<NotificationLogEntry>,
}

impl Report {
    fn outcome(&self) -> MessageOutcome {
        let mut fatal = Vec::new();
        let mut retryable = Vec::new();
        let mut infra = Vec::new();
        for outcome in &self.outcomes {
            match outcome {
                RouteOutcome::Fatal(e) => fatal.push(e.as_str()),
                RouteOutcome::Retryable(e) => retryable.push(e.as_str()),
                RouteOutcome::Infra(e) => infra.push(e.as_str()),
                RouteOutcome::Delivered | RouteOutcome::Skipped => {}
            }
        }

        if !fatal.is_empty() {
            let mut errors = fatal;
            errors.extend(&retryable);
            MessageOutcome::DeadLetter {
                error: errors.join("; "),
                retryable: !retryable.is_empty(),
            }
        } else if !retryable.is_empty() {
            MessageOutcome::Retry {
                error: retryable.join("; "),
            }
        } else if !infra.is_empty() {
            MessageOutcome::Requeue {
                error: infra.join("; "),
            }
        } else {
            MessageOutcome::Published
        }
    }
}

fn dead_letter(error: impl Into<String>) -> MessageOutcome {
    MessageOutcome::DeadLetter {
        error: error.into(),
        retryable: false,
    }
}

fn requeue(error: Error) -> MessageOutcome {
    MessageOutcome::Requeue {
        error: error.to_string(),
    }
}

fn log_entry(
    notification: &Notification,
    subscription_id: Option<i64>,
    receiver_id: Option<i64>,
    silence_ids: Vec<String>,
) -> NotificationLogEntry {
    let mut entry = NotificationLogEntry::new(&notification.id, notification.namespace_id);
    entry.subscription_id = subscription_id;
    entry.receiver_id = receiver_id;
    entry.alert_ids = notification.alert_ids.clone();
    entry.silence_ids = silence_ids;
    entry
}

pub struct NotificationHandler {
    config: HandlerConfig,
    filter: ClaimFilter,
    queue: Arc<dyn Queue>,
    registry: Arc<NotifierRegistry>,
    receivers: Arc<dyn ReceiverRepository>,
    matcher: SubscriptionMatcher,
    silences: SilenceEngine,
    idempotency: Arc<dyn IdempotencyRepository>,
    log: Arc<dyn NotificationLogRepository>,
    alerts: Arc<dyn AlertRepository>,
}

impl NotificationHandler {
    /// Fails when none of the configured receiver types has a backend.
    pub fn new(deps: HandlerDeps, config: HandlerConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::config("handler batch size must be positive"));
        }

        let receiver_types: Vec<String> = if config.receiver_types.is_empty() {
            deps.registry.receiver_types()
        } else {
            config
                .receiver_types
                .iter()
                .filter(|t| {
                    let known = deps.registry.contains(t);
                    if !known {
                        warn!(
                            handler = %config.identifier,
                            receiver_type = %t,
                            "No notifier registered for receiver type; ignoring"
                        );
                    }
                    known
                })
                .cloned()
                .collect()
        };
        if receiver_types.is_empty() {
            return Err(Error::config(format!(
                "no receiver type plugin registered for handler {}",
                config.identifier
            )));
        }

        // Subscriber rows fan out to any registered type at delivery time.
        let typed_only = deps
            .registry
            .receiver_types()
            .iter()
            .any(|t| !receiver_types.contains(t));

        info!(
            handler = %config.identifier,
            strategy = %deps.queue.strategy(),
            ?receiver_types,
            typed_only,
            batch_size = config.batch_size,
            "Notification handler ready"
        );

        Ok(Self {
            filter: ClaimFilter {
                receiver_types,
                typed_only,
            },
            config,
            queue: deps.queue,
            registry: deps.registry,
            receivers: deps.receivers,
            matcher: SubscriptionMatcher::new(deps.subscriptions),
            silences: SilenceEngine::new(deps.silences),
            idempotency: deps.idempotency,
            log: deps.log,
            alerts: deps.alerts,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.config.identifier
    }

    /// Receiver types this handler claims.
    pub fn receiver_types(&self) -> &[String] {
        &self.filter.receiver_types
    }

    /// Claim, handle and release one batch. Returns the number of messages.
    pub async fn process(&self) -> Result<usize> {
        self.queue
            .dequeue(self.config.batch_size, &self.filter, self)
            .await
    }

    async fn handle_message(&self, message: &QueueMessage) -> MessageOutcome {
        let notification = &message.notification;

        if notification.is_expired(Utc::now()) {
            warn!(
                handler = %self.config.identifier,
                notification_id = %notification.id,
                "Notification expired before delivery"
            );
            return dead_letter("notification expired");
        }

        let mut report = Report::default();
        let routes = match notification.notification_type {
            NotificationType::Receiver => self.receiver_routes(notification, &mut report).await,
            NotificationType::Subscriber => {
                self.subscription_routes(notification, &mut report).await
            }
        };

        let outcome = match routes {
            Ok(routes) => {
                for route in &routes {
                    let (outcome, entry) = self.deliver(notification, route).await;
                    report.outcomes.push(outcome);
                    report.logs.extend(entry);
                }
                report.outcome()
            }
            Err(outcome) => outcome,
        };

        self.append_logs(&report.logs).await;

        match &outcome {
            MessageOutcome::Published => info!(
                handler = %self.config.identifier,
                message_id = %message.id,
                notification_id = %notification.id,
                attempt = message.attempt_count + 1,
                "Notification handled"
            ),
            MessageOutcome::Retry { error } | MessageOutcome::DeadLetter { error, .. } => warn!(
                handler = %self.config.identifier,
                message_id = %message.id,
                notification_id = %notification.id,
                attempt = message.attempt_count + 1,
                error = %error,
                "Notification delivery failed"
            ),
            MessageOutcome::Requeue { error } => warn!(
                handler = %self.config.identifier,
                message_id = %message.id,
                error = %error,
                "Returning notification to the queue"
            ),
        }

        outcome
    }

    /// Route of a notification addressed to one receiver.
    async fn receiver_routes(
        &self,
        notification: &Notification,
        report: &mut Report,
    ) -> std::result::Result<Vec<Route>, MessageOutcome> {
        let receiver_id = notification
            .receiver_id()
            .map_err(|e| dead_letter(e.to_string()))?;
        let receiver = match self.receivers.get(receiver_id).await {
            Ok(receiver) => receiver,
            Err(e) if e.is_not_found() => {
                return Err(dead_letter(format!("receiver {receiver_id} not found")));
            }
            Err(e) => return Err(requeue(e)),
        };

        if let Some(namespace_id) = notification.namespace_id {
            let silences = self
                .silences
                .silences_for_alert(namespace_id, &notification.labels)
                .await
                .map_err(requeue)?;
            if !silences.is_empty() {
                let silence_ids: Vec<String> = silences.into_iter().map(|s| s.id).collect();
                debug!(
                    notification_id = %notification.id,
                    receiver_id,
                    ?silence_ids,
                    "Receiver notification silenced"
                );
                report
                    .logs
                    .push(log_entry(notification, None, Some(receiver_id), silence_ids));
                self.record_silence_status(notification, SilenceStatus::Total)
                    .await;
                return Ok(Vec::new());
            }
        }

        let config = receiver.configuration.clone();
        Ok(vec![Route {
            subscription_id: None,
            receiver,
            config,
        }])
    }

    /// Routes of a notification fanned out by label matching.
    async fn subscription_routes(
        &self,
        notification: &Notification,
        report: &mut Report,
    ) -> std::result::Result<Vec<Route>, MessageOutcome> {
        let subscriptions = self
            .matcher
            .match_by_labels(notification.namespace_id, &notification.labels)
            .await
            .map_err(requeue)?;
        if subscriptions.is_empty() {
            return Err(dead_letter("not matching any subscription"));
        }

        let silences = self
            .silences
            .for_subscriptions(&subscriptions)
            .await
            .map_err(requeue)?;

        let mut routes = Vec::new();
        let mut silenced = 0usize;
        for subscription in &subscriptions {
            let ids =
                silence_ids(subscription_silences(&silences, &notification.labels, subscription));
            if !ids.is_empty() {
                debug!(
                    notification_id = %notification.id,
                    subscription_id = subscription.id,
                    silence_ids = ?ids,
                    "Subscription silenced"
                );
                report
                    .logs
                    .push(log_entry(notification, Some(subscription.id), None, ids));
                silenced += 1;
                continue;
            }

            for metadata in &subscription.receivers {
                let receiver = match self.receivers.get(metadata.id).await {
                    Ok(receiver) => receiver,
                    Err(e) if e.is_not_found() => {
                        report.outcomes.push(RouteOutcome::Fatal(format!(
                            "receiver {} of subscription {} not found",
                            metadata.id, subscription.id
                        )));
                        continue;
                    }
                    Err(e) => {
                        report.outcomes.push(RouteOutcome::Infra(e.to_string()));
                        continue;
                    }
                };

                let mut config = receiver.configuration.clone();
                config.extend(metadata.configuration.clone());

                let ids =
                    silence_ids(receiver_silences(&silences, subscription, &receiver, &config));
                if !ids.is_empty() {
                    debug!(
                        notification_id = %notification.id,
                        subscription_id = subscription.id,
                        receiver_id = receiver.id,
                        silence_ids = ?ids,
                        "Receiver silenced"
                    );
                    report.logs.push(log_entry(
                        notification,
                        Some(subscription.id),
                        Some(receiver.id),
                        ids,
                    ));
                    silenced += 1;
                    continue;
                }

                routes.push(Route {
                    subscription_id: Some(subscription.id),
                    receiver,
                    config,
                });
            }
        }

        if let Some(status) = SilenceStatus::from_routes(silenced, routes.len()) {
            self.record_silence_status(notification, status).await;
        }

        Ok(routes)
    }

    /// Deliver one route at most once.
    async fn deliver(
        &self,
        notification: &Notification,
        route: &Route,
    ) -> (RouteOutcome, Option<NotificationLogEntry>) {
        let receiver = &route.receiver;
        let notifier = self
            .filter
            .receiver_types
            .contains(&receiver.receiver_type)
            .then(|| self.registry.get(&receiver.receiver_type))
            .flatten();
        let Some(notifier) = notifier else {
            return (
                RouteOutcome::Fatal(format!(
                    "unsupported receiver type: \"{}\" on handler {}",
                    receiver.receiver_type, self.config.identifier
                )),
                None,
            );
        };

        let scope = idempotency_scope(route.subscription_id, receiver.id);
        let record = match self
            .idempotency
            .create(&scope, &notification.id, &notification.id)
            .await
        {
            Ok(record) => record,
            Err(e) => return (RouteOutcome::Infra(e.to_string()), None),
        };
        if record.success {
            debug!(
                notification_id = %notification.id,
                scope = %scope,
                "Already delivered; skipping"
            );
            return (
                RouteOutcome::Skipped,
                Some(log_entry(
                    notification,
                    route.subscription_id,
                    Some(receiver.id),
                    Vec::new(),
                )),
            );
        }

        let config = match notifier.prepare_config(route.config.clone()).await {
            Ok(config) => config,
            Err(e) => return (RouteOutcome::failed(receiver.id, e), None),
        };

        let payload = DeliveryPayload::new(notification, receiver.id, route.subscription_id);
        let sent =
            tokio::time::timeout(self.config.send_timeout, notifier.send(&payload, &config)).await;
        match sent {
            Err(_) => (
                RouteOutcome::Retryable(format!(
                    "send to receiver {} timed out after {:?}",
                    receiver.id, self.config.send_timeout
                )),
                None,
            ),
            Ok(Err(e)) => (RouteOutcome::failed(receiver.id, e), None),
            Ok(Ok(())) => {
                if let Err(e) = self.idempotency.mark_success(record.id).await {
                    // The send happened; a replay after this may deliver twice.
                    error!(
                        notification_id = %notification.id,
                        scope = %scope,
                        error = %e,
                        "Delivered but failed to record idempotency success"
                    );
                }
                (
                    RouteOutcome::Delivered,
                    Some(log_entry(
                        notification,
                        route.subscription_id,
                        Some(receiver.id),
                        Vec::new(),
                    )),
                )
            }
        }
    }

    async fn record_silence_status(&self, notification: &Notification, status: SilenceStatus) {
        if notification.alert_ids.is_empty() {
            return;
        }
        if let Err(e) = self
            .alerts
            .update_silence_status(&notification.alert_ids, status)
            .await
        {
            warn!(
                notification_id = %notification.id,
                status = status.as_str(),
                error = %e,
                "Failed to record alert silence status"
            );
        }
    }

    async fn append_logs(&self, entries: &[NotificationLogEntry]) {
        if entries.is_empty() {
            return;
        }
        if let Err(e) = self.log.append(entries).await {
            warn!(count = entries.len(), error = %e, "Failed to append notification log");
        }
    }
}

#[async_trait]
impl BatchHandler for NotificationHandler {
    async fn handle(&self, messages: &[QueueMessage]) -> Result<BatchResult> {
        let mut result = BatchResult::new();
        for message in messages {
            let outcome = self.handle_message(message).await;
            result.set(&message.id, outcome);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_memory_pool;
    use crate::domain::{ReceiverMetadata, Silence, Subscription, SubscriptionFilter};
    use crate::notifier::Notifier;
    use crate::queue::{MessageStatus, SqliteQueue, Strategy};
    use serde_json::json;
    use std::sync::Mutex;

    /// Records payloads; fails with `failure` when set.
    struct Recording {
        receiver_type: &'static str,
        sent: Mutex<Vec<DeliveryPayload>>,
        failure: Option<SendError>,
        delay: Duration,
    }

    impl Recording {
        fn ok(receiver_type: &'static str) -> Self {
            Self {
                receiver_type,
                sent: Mutex::new(Vec::new()),
                failure: None,
                delay: Duration::ZERO,
            }
        }

        fn failing(receiver_type: &'static str, failure: SendError) -> Self {
            Self {
                failure: Some(failure),
                ..Self::ok(receiver_type)
            }
        }

        fn sent(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Notifier for Recording {
        fn receiver_type(&self) -> &str {
            self.receiver_type
        }

        async fn send(
            &self,
            payload: &DeliveryPayload,
            _: &JsonMap,
        ) -> std::result::Result<(), SendError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(failure) = &self.failure {
                return Err(failure.clone());
            }
            self.sent.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    /// Subscription store that is always down.
    struct Unavailable;

    #[async_trait]
    impl SubscriptionRepository for Unavailable {
        async fn get(&self, _: i64) -> Result<Subscription> {
            Err(Error::Database("connection refused".into()))
        }
        async fn list(&self, _: &SubscriptionFilter) -> Result<Vec<Subscription>> {
            Err(Error::Database("connection refused".into()))
        }
        async fn create(&self, _: &Subscription) -> Result<Subscription> {
            Err(Error::Database("connection refused".into()))
        }
        async fn delete(&self, _: i64) -> Result<()> {
            Err(Error::Database("connection refused".into()))
        }
    }

    struct Fixture {
        pool: DbPool,
        deps: HandlerDeps,
        notifier: Arc<Recording>,
    }

    impl Fixture {
        async fn new(notifier: Recording) -> Self {
            let pool = init_memory_pool().await.unwrap();
            let notifier = Arc::new(notifier);
            let registry = Arc::new(NotifierRegistry::new().with(notifier.clone()));
            let queue = Arc::new(SqliteQueue::normal(pool.clone()));
            let deps = HandlerDeps::sqlite(&pool, queue, registry);
            Self { pool, deps, notifier }
        }

        fn handler(&self) -> NotificationHandler {
            NotificationHandler::new(
                self.deps.clone(),
                HandlerConfig {
                    send_timeout: Duration::from_millis(200),
                    ..Default::default()
                },
            )
            .unwrap()
        }

        async fn receiver(&self, receiver_type: &str) -> Receiver {
            self.deps
                .receivers
                .create(&Receiver::new("r", receiver_type).with_config("token", "t"))
                .await
                .unwrap()
        }

        async fn subscription(&self, urn: &str, team: &str, receiver_id: i64) -> Subscription {
            self.deps
                .subscriptions
                .create(
                    &Subscription::new(urn, 1)
                        .with_match("team", team)
                        .with_receiver(
                            ReceiverMetadata::new(receiver_id).with_config("channel_name", urn),
                        ),
                )
                .await
                .unwrap()
        }

        fn message(&self, notification: Notification) -> QueueMessage {
            QueueMessage {
                id: uuid::Uuid::new_v4().to_string(),
                notification,
                receiver_type: None,
                status: MessageStatus::Processing,
                strategy: Strategy::Normal,
                attempt_count: 0,
                last_error: None,
                retryable: false,
                claimed_by: Some("lease".into()),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }
        }

        async fn handle_one(
            &self,
            handler: &NotificationHandler,
            notification: Notification,
        ) -> MessageOutcome {
            let message = self.message(notification);
            let result = handler.handle(std::slice::from_ref(&message)).await.unwrap();
            result.get(&message.id).cloned().unwrap()
        }

        async fn logs(&self, notification_id: &str) -> Vec<NotificationLogEntry> {
            self.deps.log.list_by_notification(notification_id).await.unwrap()
        }
    }

    fn alert(team: &str) -> Notification {
        Notification::new(NotificationType::Subscriber)
            .with_namespace(1)
            .with_label("team", team)
    }

    #[tokio::test]
    async fn test_new_requires_a_supported_receiver_type() {
        let fx = Fixture::new(Recording::ok("slack")).await;
        let config = HandlerConfig {
            receiver_types: vec!["pagerduty".into()],
            ..Default::default()
        };
        assert!(NotificationHandler::new(fx.deps.clone(), config).is_err());

        let config = HandlerConfig {
            receiver_types: vec!["pagerduty".into(), "slack".into()],
            ..Default::default()
        };
        let handler = NotificationHandler::new(fx.deps.clone(), config).unwrap();
        assert_eq!(handler.receiver_types(), ["slack".to_string()]);
    }

    #[tokio::test]
    async fn test_subscriber_fan_out_is_logged() {
        let fx = Fixture::new(Recording::ok("slack")).await;
        let receiver = fx.receiver("slack").await;
        let a = fx.subscription("a", "x", receiver.id).await;
        let b = fx.subscription("b", "x", receiver.id).await;
        fx.subscription("c", "y", receiver.id).await;

        let notification = alert("x");
        let outcome = fx.handle_one(&fx.handler(), notification.clone()).await;
        assert_eq!(outcome, MessageOutcome::Published);
        assert_eq!(fx.notifier.sent(), 2);

        let mut logged: Vec<Option<i64>> = fx
            .logs(&notification.id)
            .await
            .iter()
            .map(|e| e.subscription_id)
            .collect();
        logged.sort();
        assert_eq!(logged, vec![Some(a.id), Some(b.id)]);
    }

    #[tokio::test]
    async fn test_replay_after_success_does_not_resend() {
        let fx = Fixture::new(Recording::ok("slack")).await;
        let receiver = fx.receiver("slack").await;
        fx.subscription("a", "x", receiver.id).await;
        let handler = fx.handler();

        let notification = alert("x");
        fx.handle_one(&handler, notification.clone()).await;
        let outcome = fx.handle_one(&handler, notification.clone()).await;

        assert_eq!(outcome, MessageOutcome::Published);
        assert_eq!(fx.notifier.sent(), 1);
        // The skip is logged alongside the delivery.
        assert_eq!(fx.logs(&notification.id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_no_matching_subscription_dead_letters() {
        let fx = Fixture::new(Recording::ok("slack")).await;
        let outcome = fx.handle_one(&fx.handler(), alert("nobody")).await;
        assert_eq!(outcome, dead_letter("not matching any subscription"));
    }

    #[tokio::test]
    async fn test_expired_notification_is_never_sent() {
        let fx = Fixture::new(Recording::ok("slack")).await;
        let receiver = fx.receiver("slack").await;
        fx.subscription("a", "x", receiver.id).await;

        let mut notification = alert("x").with_valid_duration(Duration::from_secs(1));
        notification.created_at = Utc::now() - chrono::Duration::seconds(10);

        let outcome = fx.handle_one(&fx.handler(), notification).await;
        assert_eq!(outcome, dead_letter("notification expired"));
        assert_eq!(fx.notifier.sent(), 0);
    }

    #[tokio::test]
    async fn test_retryable_failure_retries() {
        let fx = Fixture::new(Recording::failing("slack", SendError::retryable("503"))).await;
        let receiver = fx.receiver("slack").await;
        fx.subscription("a", "x", receiver.id).await;

        let outcome = fx.handle_one(&fx.handler(), alert("x")).await;
        assert!(matches!(outcome, MessageOutcome::Retry { error } if error.contains("503")));
    }

    #[tokio::test]
    async fn test_fatal_failure_dead_letters() {
        let fx = Fixture::new(Recording::failing("slack", SendError::fatal("invalid_auth"))).await;
        let receiver = fx.receiver("slack").await;
        fx.subscription("a", "x", receiver.id).await;

        let outcome = fx.handle_one(&fx.handler(), alert("x")).await;
        assert!(matches!(
            outcome,
            MessageOutcome::DeadLetter { ref error, retryable: false }
                if error.contains("invalid_auth")
        ));
    }

    #[tokio::test]
    async fn test_unsupported_receiver_type_is_fatal() {
        let fx = Fixture::new(Recording::ok("slack")).await;
        let receiver = fx.receiver("carrier-pigeon").await;
        fx.subscription("a", "x", receiver.id).await;

        let outcome = fx.handle_one(&fx.handler(), alert("x")).await;
        assert!(matches!(
            outcome,
            MessageOutcome::DeadLetter { ref error, .. }
                if error.contains("unsupported receiver type")
        ));
    }

    #[tokio::test]
    async fn test_slow_send_times_out_as_retryable() {
        let mut notifier = Recording::ok("slack");
        notifier.delay = Duration::from_secs(5);
        let fx = Fixture::new(notifier).await;
        let receiver = fx.receiver("slack").await;
        fx.subscription("a", "x", receiver.id).await;

        let outcome = fx.handle_one(&fx.handler(), alert("x")).await;
        assert!(matches!(outcome, MessageOutcome::Retry { error } if error.contains("timed out")));
    }

    #[tokio::test]
    async fn test_zero_valid_duration_is_delivered() {
        let fx = Fixture::new(Recording::ok("slack")).await;
        let receiver = fx.receiver("slack").await;
        fx.subscription("a", "x", receiver.id).await;

        // Producers that leave the duration unset send zero.
        let mut notification = alert("x");
        notification.valid_duration = Some(Duration::ZERO);
        notification.created_at = Utc::now() - chrono::Duration::days(1);

        let outcome = fx.handle_one(&fx.handler(), notification).await;
        assert_eq!(outcome, MessageOutcome::Published);
        assert_eq!(fx.notifier.sent(), 1);
    }

    #[tokio::test]
    async fn test_rule_silence_skips_only_matching_receiver() {
        let fx = Fixture::new(Recording::ok("slack")).await;
        let quiet = fx.receiver("slack").await;
        let loud = fx.receiver("slack").await;
        let subscription = fx
            .deps
            .subscriptions
            .create(
                &Subscription::new("a", 1)
                    .with_match("team", "x")
                    .with_receiver(ReceiverMetadata::new(quiet.id))
                    .with_receiver(ReceiverMetadata::new(loud.id)),
            )
            .await
            .unwrap();

        let silence = Silence::for_subscription_receivers(
            1,
            subscription.id,
            format!("ID == {} && Type == \"slack\"", quiet.id),
        );
        fx.deps.silences.create(&silence).await.unwrap();
        let alerts = SqlxAlertRepository::new(fx.pool.clone());
        let alert_id = alerts.create(Some(1), "CRITICAL").await.unwrap();

        let notification = alert("x").with_alert_ids(vec![alert_id]);
        let outcome = fx.handle_one(&fx.handler(), notification).await;
        assert_eq!(outcome, MessageOutcome::Published);

        let sent = fx.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].receiver_id, loud.id);

        let suppressed = fx.deps.log.list_by_silence(&silence.id).await.unwrap();
        assert_eq!(suppressed.len(), 1);
        assert_eq!(suppressed[0].subscription_id, Some(subscription.id));
        assert_eq!(suppressed[0].receiver_id, Some(quiet.id));
        assert_eq!(
            alerts.get_silence_status(alert_id).await.unwrap(),
            Some(SilenceStatus::Partial)
        );
    }

    #[tokio::test]
    async fn test_receiver_type_filter_limits_delivery() {
        let pool = init_memory_pool().await.unwrap();
        let slack = Arc::new(Recording::ok("slack"));
        let pagerduty = Arc::new(Recording::ok("pagerduty"));
        let registry = Arc::new(
            NotifierRegistry::new()
                .with(slack.clone())
                .with(pagerduty.clone()),
        );
        let queue = Arc::new(SqliteQueue::normal(pool.clone()));
        let fx = Fixture {
            deps: HandlerDeps::sqlite(&pool, queue, registry),
            pool,
            notifier: slack,
        };

        let everything =
            NotificationHandler::new(fx.deps.clone(), HandlerConfig::default()).unwrap();
        assert!(!everything.filter.typed_only);

        let slack_only = NotificationHandler::new(
            fx.deps.clone(),
            HandlerConfig {
                receiver_types: vec!["slack".into()],
                ..Default::default()
            },
        )
        .unwrap();
        assert!(slack_only.filter.typed_only);

        let receiver = fx.receiver("pagerduty").await;
        fx.subscription("a", "x", receiver.id).await;

        let outcome = fx.handle_one(&slack_only, alert("x")).await;
        assert!(matches!(
            outcome,
            MessageOutcome::DeadLetter { ref error, .. }
                if error.contains("unsupported receiver type")
        ));
        assert_eq!(pagerduty.sent(), 0);

        let outcome = fx.handle_one(&everything, alert("x")).await;
        assert_eq!(outcome, MessageOutcome::Published);
        assert_eq!(pagerduty.sent(), 1);
    }

    #[tokio::test]
    async fn test_partial_silence_skips_only_silenced_route() {
        let fx = Fixture::new(Recording::ok("slack")).await;
        let receiver = fx.receiver("slack").await;
        let silenced = fx.subscription("a", "x", receiver.id).await;
        let open = fx.subscription("b", "x", receiver.id).await;

        let silence = Silence::for_subscription(1, silenced.id);
        fx.deps.silences.create(&silence).await.unwrap();
        let alerts = SqlxAlertRepository::new(fx.pool.clone());
        let alert_id = alerts.create(Some(1), "CRITICAL").await.unwrap();

        let notification = alert("x").with_alert_ids(vec![alert_id]);
        let outcome = fx.handle_one(&fx.handler(), notification.clone()).await;
        assert_eq!(outcome, MessageOutcome::Published);

        let sent = fx.notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subscription_id, Some(open.id));

        let suppressed = fx.deps.log.list_by_silence(&silence.id).await.unwrap();
        assert_eq!(suppressed.len(), 1);
        assert_eq!(suppressed[0].subscription_id, Some(silenced.id));
        assert_eq!(
            alerts.get_silence_status(alert_id).await.unwrap(),
            Some(SilenceStatus::Partial)
        );
    }

    #[tokio::test]
    async fn test_matchers_silence_covers_receiver_notification() {
        let fx = Fixture::new(Recording::ok("slack")).await;
        let receiver = fx.receiver("slack").await;
        let expression = match json!({ "service": "db" }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        };
        let silence = Silence::for_matchers(1, expression);
        fx.deps.silences.create(&silence).await.unwrap();

        let notification = Notification::for_receiver(receiver.id)
            .with_namespace(1)
            .with_label("service", "db");
        let outcome = fx.handle_one(&fx.handler(), notification.clone()).await;

        assert_eq!(outcome, MessageOutcome::Published);
        assert_eq!(fx.notifier.sent(), 0);
        let logs = fx.logs(&notification.id).await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].silence_ids, vec![silence.id.clone()]);

        // Lifting the silence takes effect on the next delivery.
        fx.deps.silences.soft_delete(&silence.id).await.unwrap();
        let outcome = fx.handle_one(&fx.handler(), notification).await;
        assert_eq!(outcome, MessageOutcome::Published);
        assert_eq!(fx.notifier.sent(), 1);
    }

    #[tokio::test]
    async fn test_missing_receiver_dead_letters() {
        let fx = Fixture::new(Recording::ok("slack")).await;
        let outcome = fx
            .handle_one(&fx.handler(), Notification::for_receiver(404))
            .await;
        assert_eq!(outcome, dead_letter("receiver 404 not found"));
    }

    #[tokio::test]
    async fn test_storage_failure_requeues() {
        let mut fx = Fixture::new(Recording::ok("slack")).await;
        fx.deps.subscriptions = Arc::new(Unavailable);

        let outcome = fx.handle_one(&fx.handler(), alert("x")).await;
        assert!(matches!(
            outcome,
            MessageOutcome::Requeue { error } if error.contains("connection refused")
        ));
        assert_eq!(fx.notifier.sent(), 0);
    }

    #[test]
    fn test_outcome_precedence() {
        let report = |outcomes: Vec<RouteOutcome>| Report {
            outcomes,
            logs: Vec::new(),
        };

        assert_eq!(report(vec![]).outcome(), MessageOutcome::Published);
        assert_eq!(
            report(vec![RouteOutcome::Delivered, RouteOutcome::Skipped]).outcome(),
            MessageOutcome::Published
        );
        assert_eq!(
            report(vec![RouteOutcome::Delivered, RouteOutcome::Infra("db".into())]).outcome(),
            MessageOutcome::Requeue { error: "db".into() }
        );
        assert_eq!(
            report(vec![
                RouteOutcome::Infra("db".into()),
                RouteOutcome::Retryable("503".into())
            ])
            .outcome(),
            MessageOutcome::Retry { error: "503".into() }
        );
        assert_eq!(
            report(vec![
                RouteOutcome::Retryable("503".into()),
                RouteOutcome::Fatal("404".into())
            ])
            .outcome(),
            MessageOutcome::DeadLetter {
                error: "404; 503".into(),
                retryable: true
            }
        );
    }

    #[test]
    fn test_idempotency_scope() {
        assert_eq!(idempotency_scope(None, 4), "receiver:4");
        assert_eq!(idempotency_scope(Some(2), 4), "subscription:2:receiver:4");
    }
}
