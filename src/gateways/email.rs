//! Email gateway

use async_trait::async_trait;
use serde::Serialize;

use super::{DeliveryError, Mailer};
use crate::domain::events::EmailMessage;

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

/// Posts messages as JSON to an HTTP mail relay.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: reqwest::Client,
    relay_url: String,
    from: String,
}

impl HttpMailer {
    pub fn new(relay_url: impl Into<String>, from: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), relay_url: relay_url.into(), from: from.into() }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        let request = RelayRequest {
            from: &self.from,
            to: &message.to,
            subject: &message.subject,
            html: &message.html_body,
        };
        let response = self
            .client
            .post(&self.relay_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected(format!("{status}: {body}")));
        }
        tracing::debug!(to = %message.to, subject = %message.subject, "Email handed to relay");
        Ok(())
    }
}

/// Logs messages instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        tracing::info!(to = %message.to, subject = %message.subject, "Email (not sent, no relay configured)");
        Ok(())
    }
}
