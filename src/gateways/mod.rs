//! Outbound collaborators
//!
//! Email and real-time push are publish-only. A failed delivery never fails
//! the order change that produced it; the outbox keeps the row for retry.

pub mod email;
pub mod push;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::events::{Delivery, EmailMessage, PushMessage};

pub use email::{HttpMailer, LogMailer};
pub use push::{LogNotifier, NatsNotifier};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by relay: {0}")]
    Rejected(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn push(&self, message: &PushMessage) -> Result<(), DeliveryError>;
}

/// Sends one delivery through the matching gateway, bounded by `timeout`.
pub async fn deliver(
    delivery: &Delivery,
    mailer: &dyn Mailer,
    notifier: &dyn Notifier,
    timeout: Duration,
) -> Result<(), DeliveryError> {
    let send = async {
        match delivery {
            Delivery::Email(message) => mailer.send(message).await,
            Delivery::Push(message) => notifier.push(message).await,
        }
    };
    tokio::time::timeout(timeout, send).await.map_err(|_| DeliveryError::Timeout(timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StalledNotifier;

    #[async_trait]
    impl Notifier for StalledNotifier {
        async fn push(&self, _message: &PushMessage) -> Result<(), DeliveryError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_gateway_times_out() {
        let mailer = MockMailer::new();
        let delivery = Delivery::Push(PushMessage { user_id: 1, notification_id: 1, message: "hi".into() });

        let err = deliver(&delivery, &mailer, &StalledNotifier, Duration::from_secs(5)).await.unwrap_err();

        assert!(matches!(err, DeliveryError::Timeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn email_goes_to_mailer() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .withf(|m| m.to == "reader@example.com")
            .times(1)
            .returning(|_| Err(DeliveryError::Rejected("mailbox full".into())));
        let notifier = MockNotifier::new();
        let delivery = Delivery::Email(EmailMessage {
            to: "reader@example.com".into(),
            subject: "Order".into(),
            html_body: "<p>hi</p>".into(),
        });

        let err = deliver(&delivery, &mailer, &notifier, Duration::from_secs(1)).await.unwrap_err();

        assert!(matches!(err, DeliveryError::Rejected(_)));
    }
}
