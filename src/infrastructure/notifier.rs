use crate::infrastructure::error::InfraError;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerNotification {
    Started { task_id: String },
    Exceeded { task_id: String },
    Stopped { task_id: String, elapsed_seconds: u32 },
}

/// Platform notification and audio-cue side effects. Implementations may fail freely;
/// callers never propagate those failures.
pub trait TimerNotifier: Send + Sync {
    fn notify(&self, notification: &TimerNotification) -> Result<(), InfraError>;
}

/// Headless environments: nothing to show, nothing to play.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl TimerNotifier for NoopNotifier {
    fn notify(&self, notification: &TimerNotification) -> Result<(), InfraError> {
        debug!(?notification, "notification suppressed");
        Ok(())
    }
}

pub fn notify_best_effort(notifier: &dyn TimerNotifier, notification: TimerNotification) {
    if let Err(error) = notifier.notify(&notification) {
        warn!(?notification, %error, "timer notification failed");
    }
}
