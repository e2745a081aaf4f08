//! Shutdown signaling for dispatch loops and blocking waits.
//!
//! A shutdown channel carries a single boolean flag from the owning side to
//! any number of subscribed loops. It is the coarse-grained cancellation
//! mechanism accepted by components: loops race their work against
//! [`ShutdownRx::wait_for_shutdown`] and bail out when the flag flips.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Requests shutdown for every subscribed receiver.
    pub fn shutdown(&self) {
        // Infallible send so shutdown can be requested even when no receiver
        // is currently subscribed.
        self.0.send_replace(true);
    }

    /// Creates a new receiver subscription.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Resolves once shutdown has been requested.
    ///
    /// A closed channel counts as shutdown since the controlling side is gone.
    pub async fn wait_for_shutdown(&mut self) {
        let _ = self.0.wait_for(|shutdown| *shutdown).await;
    }

    /// Returns whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits for the flag to change, mirroring [`watch::Receiver::changed`].
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.0.changed().await
    }

    /// Returns whether the flag changed since it was last seen.
    pub fn has_changed(&self) -> Result<bool, watch::error::RecvError> {
        self.0.has_changed()
    }

    /// Marks the current flag value as seen.
    pub fn mark_unchanged(&mut self) {
        self.0.mark_unchanged();
    }
}

/// Creates a new shutdown channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
