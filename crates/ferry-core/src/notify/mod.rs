//! Notification sink for outcomes that happen while no controller is around.
//!
//! The supervisor reports background resumes through a [`Notifier`] rather
//! than the bus, since nobody may be listening on the bus at that point.

use async_trait::async_trait;

/// Notification shown when the supervisor starts a background resume.
pub const NOTIFY_RESUMING: &str = "Resuming upload in the background";

/// Notification shown when a background resume succeeds.
pub const NOTIFY_SUCCESS: &str = "Upload Successful";

/// Notification shown when a background resume fails.
pub const NOTIFY_FAILED: &str = "Upload Failed";

/// Fire-and-forget notification display.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Show a notification with the given title.
    async fn display(&self, title: &str);
}

/// Notifier writing every notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn display(&self, title: &str) {
        tracing::info!(notification = title, "Notification");
    }
}
