//! Producer side: validate notifications and put them on the queue.

use std::sync::Arc;

use tracing::{debug, info};

use crate::database::repositories::ReceiverRepository;
use crate::domain::{Notification, NotificationType};
use crate::queue::{NewMessage, Queue};
use crate::{Error, Result};

pub struct NotificationService {
    queue: Arc<dyn Queue>,
    receivers: Arc<dyn ReceiverRepository>,
}

impl NotificationService {
    pub fn new(queue: Arc<dyn Queue>, receivers: Arc<dyn ReceiverRepository>) -> Self {
        Self { queue, receivers }
    }

    /// Validate and enqueue `notifications` as one batch.
    ///
    /// `receiver` notifications are stamped with their receiver's type so
    /// handlers only claim rows they can deliver. Nothing is enqueued when any
    /// notification is rejected. Returns the queue message ids.
    pub async fn dispatch(&self, notifications: Vec<Notification>) -> Result<Vec<String>> {
        if notifications.is_empty() {
            return Ok(Vec::new());
        }

        let mut messages = Vec::with_capacity(notifications.len());
        for mut notification in notifications {
            if notification.id.is_empty() {
                notification.id = uuid::Uuid::new_v4().to_string();
            }
            notification.validate()?;

            let receiver_type = match notification.notification_type {
                NotificationType::Receiver => {
                    let receiver_id = notification.receiver_id()?;
                    match self.receivers.get(receiver_id).await {
                        Ok(receiver) => Some(receiver.receiver_type),
                        Err(e) if e.is_not_found() => {
                            return Err(Error::invalid(format!(
                                "receiver {receiver_id} does not exist"
                            )));
                        }
                        Err(e) => return Err(e),
                    }
                }
                NotificationType::Subscriber => None,
            };

            debug!(
                notification_id = %notification.id,
                notification_type = notification.notification_type.as_str(),
                receiver_type = ?receiver_type,
                "Notification accepted"
            );
            messages.push(NewMessage {
                notification,
                receiver_type,
            });
        }

        let ids = self.queue.enqueue(messages).await?;
        info!(count = ids.len(), strategy = %self.queue.strategy(), "Notifications enqueued");
        Ok(ids)
    }
}
