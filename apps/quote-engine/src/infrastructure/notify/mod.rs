//! Notification Sinks
//!
//! [`NotificationSink`] implementations for alert triggers.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::ports::NotificationSink;
use crate::domain::alert::AlertTrigger;

/// Writes every trigger to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, trigger: AlertTrigger) {
        tracing::info!(
            alert_id = %trigger.alert_id,
            owner_id = %trigger.owner_id,
            symbol = %trigger.symbol,
            direction = ?trigger.direction,
            price = %trigger.price,
            threshold = %trigger.threshold,
            triggered_at = %trigger.triggered_at,
            "Price alert triggered"
        );
    }
}

/// Forwards triggers to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotificationSink {
    tx: mpsc::UnboundedSender<AlertTrigger>,
}

impl ChannelNotificationSink {
    /// Create a sink and the receiver it feeds.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AlertTrigger>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelNotificationSink {
    async fn notify(&self, trigger: AlertTrigger) {
        if self.tx.send(trigger).is_err() {
            tracing::debug!("Alert trigger receiver dropped");
        }
    }
}
