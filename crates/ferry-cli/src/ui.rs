//! UI utilities for Ferry CLI.

use async_trait::async_trait;
use ferry_core::notify::Notifier;

const BAR_WIDTH: usize = 30;
const RULE_WIDTH: usize = 37;

/// Print the version banner.
pub fn banner() {
    println!();
    println!("Ferry v{}", ferry_core::VERSION);
    println!("{}", "-".repeat(RULE_WIDTH));
    println!();
}

/// Render a fraction in `[0, 1]` as a fixed-width bar.
pub fn progress_bar(fraction: f64) -> String {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let filled = (fraction * BAR_WIDTH as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), " ".repeat(BAR_WIDTH - filled))
}

/// Notifier printing notifications to stderr.
///
/// Background resumes can finish long after the progress line was drawn, so
/// notifications go to a separate stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier {
    quiet: bool,
}

impl ConsoleNotifier {
    /// Create a notifier. A quiet notifier only logs.
    #[must_use]
    pub const fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn display(&self, title: &str) {
        tracing::debug!(notification = title, "Notification");
        if !self.quiet {
            eprintln!();
            eprintln!("  >> {}", title);
        }
    }
}
