//! Panic containment for user-supplied actions and handlers.
//!
//! Actions, flush handlers, and finalizers run arbitrary caller code. A panic
//! inside them must degrade that one invocation, never tear down the dispatch
//! loop that called it. [`recover`] is the shared boundary: it runs the
//! supplied future and converts an unwind into an [`ErrorKind::ActionPanic`]
//! error carrying the panic message.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::crew_error;
use crate::error::{CrewError, CrewResult, ErrorKind};

/// Runs `action`, converting a panic into an [`ErrorKind::ActionPanic`] error.
///
/// Action failures pass through unchanged. The `AssertUnwindSafe` is sound
/// here because the future is consumed by the unwind: nothing observes its
/// state afterwards.
pub async fn recover<F, T>(action: F) -> CrewResult<T>
where
    F: Future<Output = CrewResult<T>>,
{
    match AssertUnwindSafe(action).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(panic_error(payload)),
    }
}

/// Builds the error for a recovered panic, extracting the payload message
/// when the panic carried one.
fn panic_error(payload: Box<dyn Any + Send>) -> CrewError {
    let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic payload was not a string".to_string()
    };

    crew_error!(ErrorKind::ActionPanic, "action panicked", detail = message)
}
