// libs/reminder-cell/src/services/channel.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::error::NotificationDeliveryError;
use crate::models::{NotificationTarget, ReminderPayload};

/// Delivers one reminder. Retry and backoff belong to the implementation, not the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(
        &self,
        target: &NotificationTarget,
        payload: &ReminderPayload,
    ) -> Result<(), NotificationDeliveryError>;
}

/// Posts reminders as JSON to a host-provided endpoint that fans out to push/SMS/email.
pub struct WebhookNotificationChannel {
    client: Client,
    endpoint: String,
}

impl WebhookNotificationChannel {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, NotificationDeliveryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Returns None when no webhook URL is configured.
    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, NotificationDeliveryError> {
        config
            .notification_webhook_url
            .as_ref()
            .map(|url| Self::new(url.clone(), Duration::from_secs(config.notification_timeout_seconds)))
            .transpose()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl NotificationChannel for WebhookNotificationChannel {
    async fn send(
        &self,
        target: &NotificationTarget,
        payload: &ReminderPayload,
    ) -> Result<(), NotificationDeliveryError> {
        debug!("Posting reminder {} to {}", payload.reminder_id, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "target": target,
                "payload": payload,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Reminder webhook error ({}): {}", status, body);
            return Err(NotificationDeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Writes reminders to the log only. Used when no transport is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotificationChannel;

impl LogNotificationChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationChannel for LogNotificationChannel {
    async fn send(
        &self,
        target: &NotificationTarget,
        payload: &ReminderPayload,
    ) -> Result<(), NotificationDeliveryError> {
        info!(
            appointment_id = %target.appointment_id,
            channel = %target.channel,
            reminder_id = %payload.reminder_id,
            "{}",
            payload.message
        );
        Ok(())
    }
}
