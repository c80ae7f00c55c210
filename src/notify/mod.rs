//! Outbound notification delivery.

pub mod telegram;

use async_trait::async_trait;

use crate::error::NotifyError;

pub use telegram::TelegramNotifier;

/// Delivers rendered text to a destination.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notifier name, for logs.
    fn name(&self) -> &str;

    async fn send(&self, destination: &str, text: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, destination: &str, text: &str) -> Result<(), NotifyError> {
        tracing::info!(destination = %destination, "{text}");
        Ok(())
    }
}
