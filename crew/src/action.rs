//! Action seams between the framework and caller code.
//!
//! Components never know what their work means; they only know how to invoke
//! it. These traits are that boundary: implement them on your own types, or
//! pass async closures, which implement them through the blanket impls below.
//!
//! All invocations run behind the [`crate::recover::recover`] boundary, so a
//! panicking implementation degrades one invocation instead of the component.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::CrewResult;
use crate::worker::Worker;

/// Trait for actions applied to individual work items.
///
/// A worker invokes the action once per dequeued item, in queue order.
/// Returning an error does not stop the worker; the error is forwarded to the
/// configured error sink, or dropped when none is wired.
pub trait WorkAction<T>: Send + Sync + 'static {
    /// Applies the action to one work item.
    fn apply(&self, item: T) -> impl Future<Output = CrewResult<()>> + Send;
}

impl<T, F, Fut> WorkAction<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CrewResult<()>> + Send,
{
    fn apply(&self, item: T) -> impl Future<Output = CrewResult<()>> + Send {
        (self)(item)
    }
}

/// Trait for handlers that receive drained buffer contents.
///
/// The batch preserves insertion order and is never empty: drains that find
/// no content do not invoke the handler.
pub trait FlushHandler<T>: Send + Sync + 'static {
    /// Flushes one drained batch.
    fn flush(&self, items: Vec<T>) -> impl Future<Output = CrewResult<()>> + Send;
}

impl<T, F, Fut> FlushHandler<T> for F
where
    T: Send + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CrewResult<()>> + Send,
{
    fn flush(&self, items: Vec<T>) -> impl Future<Output = CrewResult<()>> + Send {
        (self)(items)
    }
}

/// Trait for actions fired by timers and counters.
pub trait TriggerAction: Send + Sync + 'static {
    /// Fires the action once.
    fn fire(&self) -> impl Future<Output = CrewResult<()>> + Send;
}

impl<F, Fut> TriggerAction for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CrewResult<()>> + Send,
{
    fn fire(&self) -> impl Future<Output = CrewResult<()>> + Send {
        (self)()
    }
}

/// Per-item post-processing hook invoked after every executed item.
///
/// The hook receives a clone of the worker that just finished, which is how
/// pooled workers hand themselves back to their owner's availability channel.
/// Boxed instead of generic because it is constructed internally and stored
/// as a plain field on [`Worker`].
pub type Finalizer<T, A> =
    Arc<dyn Fn(Worker<T, A>) -> BoxFuture<'static, CrewResult<()>> + Send + Sync>;
