//! Error sink channel used to surface action failures out of dispatch loops.
//!
//! Components never fail their own lifecycle because a work item failed.
//! Instead, each action error is pushed into an optional bounded error
//! channel that the caller drains, typically with an error-typed worker or
//! queue consuming the receiver side.

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{CrewError, ErrorKind};
use crate::metrics::{COMPONENT_LABEL, CREW_ACTION_PANICS_TOTAL, CREW_ERRORS_FORWARDED_TOTAL};

/// Transmitter side of an error sink channel.
pub type ErrorTx = mpsc::Sender<CrewError>;

/// Receiver side of an error sink channel.
pub type ErrorRx = mpsc::Receiver<CrewError>;

/// Creates a new bounded error sink channel.
///
/// The channel is bounded so a slow error consumer exerts backpressure on the
/// components producing the errors instead of growing without limit.
pub fn create_error_channel(capacity: usize) -> (ErrorTx, ErrorRx) {
    mpsc::channel(capacity)
}

/// Forwards an action error to the component's error sink.
///
/// Recovered panics are counted and logged before forwarding since the sink
/// consumer usually cares about them most. When no sink is wired, or the sink
/// receiver was dropped, the error is logged at debug level and discarded;
/// losing an action error never affects the component's own lifecycle.
pub(crate) async fn forward_error(sink: Option<&ErrorTx>, component: &'static str, err: CrewError) {
    if err.kind() == ErrorKind::ActionPanic {
        counter!(CREW_ACTION_PANICS_TOTAL, COMPONENT_LABEL => component).increment(1);
        warn!(component, error = %err, "recovered panic from action");
    }

    let Some(sink) = sink else {
        debug!(component, error = %err, "no error sink wired, dropping error");
        return;
    };

    if sink.send(err).await.is_err() {
        debug!(component, "error sink closed, dropping error");
        return;
    }

    counter!(CREW_ERRORS_FORWARDED_TOTAL, COMPONENT_LABEL => component).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::crew_error;

    #[tokio::test]
    async fn forwards_error_to_sink() {
        let (tx, mut rx) = create_error_channel(4);
        let err = crew_error!(ErrorKind::ActionFailed, "action failed");

        forward_error(Some(&tx), "worker", err.clone()).await;

        let forwarded = rx.recv().await.expect("error must arrive at the sink");
        assert_eq!(forwarded.kind(), ErrorKind::ActionFailed);
        assert_eq!(forwarded, err);
    }

    #[tokio::test]
    async fn drops_error_without_sink() {
        let err = crew_error!(ErrorKind::ActionFailed, "action failed");

        // Must not hang or panic.
        forward_error(None, "worker", err).await;
    }

    #[tokio::test]
    async fn drops_error_when_sink_receiver_is_gone() {
        let (tx, rx) = create_error_channel(4);
        drop(rx);

        let err = crew_error!(ErrorKind::ActionPanic, "action panicked");

        forward_error(Some(&tx), "worker", err).await;
    }
}
