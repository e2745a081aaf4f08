use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::timeout;

/// Default timeout for test notifications.
///
/// Long enough for slow CI machines, short enough that a stuck test fails
/// with a clear message instead of hanging the suite.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// A wait handle around [`Arc<Notify>`] that fails fast on timeout.
///
/// Waiting on conditions that never come true is the main way lifecycle
/// tests hang. [`TimedNotify`] panics after the timeout so the test reports
/// which wait got stuck.
#[derive(Clone)]
pub struct TimedNotify {
    notify: Arc<Notify>,
    timeout: Duration,
}

impl TimedNotify {
    /// Creates a new [`TimedNotify`] with the default timeout.
    pub fn new(notify: Arc<Notify>) -> Self {
        Self::with_timeout(notify, DEFAULT_NOTIFY_TIMEOUT)
    }

    /// Creates a new [`TimedNotify`] with a custom timeout.
    pub fn with_timeout(notify: Arc<Notify>, timeout: Duration) -> Self {
        Self { notify, timeout }
    }

    /// Waits for the notification.
    ///
    /// # Panics
    ///
    /// Panics when the timeout elapses first, so a test waiting on a
    /// condition that was never reached fails instead of hanging.
    pub async fn notified(&self) {
        if timeout(self.timeout, self.notify.notified()).await.is_err() {
            panic!(
                "test notification timed out after {:?}; the awaited condition was never reached",
                self.timeout
            );
        }
    }
}

impl fmt::Debug for TimedNotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedNotify")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
