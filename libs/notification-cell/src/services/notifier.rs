use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use shared_config::EmailConfig;

use crate::error::NotificationError;
use crate::models::EmailMessage;

/// Outbound email capability.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError>;
}

/// Sends through an HTTP email API that accepts `{from, to, subject, html}`
/// with a bearer key.
pub struct HttpEmailNotifier {
    client: Client,
    config: EmailConfig,
}

impl HttpEmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Notifier for HttpEmailNotifier {
    #[instrument(skip(self, message), fields(to = %message.to))]
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        if !self.config.is_configured() {
            return Err(NotificationError::NotConfigured);
        }

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "from": self.config.from_address,
                "to": [message.to],
                "subject": message.subject,
                "html": message.html_body,
            }))
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(subject = %message.subject, "Email accepted by provider");
        Ok(())
    }
}

/// Writes messages to the log instead of sending them. Used when no email
/// provider is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        info!(to = %message.to, subject = %message.subject, "Email delivery disabled, message not sent");
        Ok(())
    }
}

pub fn notifier_from_config(config: &EmailConfig) -> Arc<dyn Notifier> {
    if config.is_configured() {
        Arc::new(HttpEmailNotifier::new(config.clone()))
    } else {
        warn!("Email provider not configured, falling back to log-only notifier");
        Arc::new(LogNotifier)
    }
}

/// Sends `message` on a background task. The caller never waits and never
/// sees the outcome; failures are logged.
pub fn dispatch(notifier: Arc<dyn Notifier>, message: EmailMessage) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = notifier.send(&message).await {
            warn!(to = %message.to, subject = %message.subject, error = %e, "Failed to send email");
        }
    })
}
