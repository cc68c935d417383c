//! Notifier seam.

use async_trait::async_trait;
use thiserror::Error;

use crate::ticket::Alert;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("cannot build message: {0}")]
    Message(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Delivers one alert per qualifying ticket. Delivery failures are
/// logged by the controller and never abort a cycle.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<(), NotifyError>;
}
