//! Real-time notification gateway

use async_trait::async_trait;

use super::{DeliveryError, Notifier};
use crate::domain::events::PushMessage;

/// Subject prefix; each user listens on `<prefix>.<user id>`.
pub const SUBJECT_PREFIX: &str = "bookhaven.notifications.user";

pub fn subject_for(user_id: i64) -> String {
    format!("{SUBJECT_PREFIX}.{user_id}")
}

/// Publishes notifications on a per-user NATS subject.
#[derive(Debug, Clone)]
pub struct NatsNotifier {
    client: async_nats::Client,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn push(&self, message: &PushMessage) -> Result<(), DeliveryError> {
        let payload = serde_json::to_vec(&serde_json::json!({
            "notificationId": message.notification_id,
            "message": message.message,
        }))
        .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        self.client
            .publish(subject_for(message.user_id), payload.into())
            .await
            .map_err(|e| DeliveryError::Transport(format!("Failed to publish: {e}")))?;
        self.client.flush().await.map_err(|e| DeliveryError::Transport(format!("Failed to flush: {e}")))
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn push(&self, message: &PushMessage) -> Result<(), DeliveryError> {
        tracing::info!(user_id = message.user_id, notification_id = message.notification_id, "Notification (no transport configured)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_is_per_user() {
        assert_eq!(subject_for(42), "bookhaven.notifications.user.42");
    }
}
