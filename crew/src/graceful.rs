//! Shared lifecycle trait for latch-governed components.

use std::future::Future;

use crate::action::{FlushHandler, TriggerAction, WorkAction};
use crate::autoflush::AutoflushBuffer;
use crate::error::CrewResult;
use crate::interval::Interval;
use crate::latch::LatchWait;
use crate::queue::Queue;
use crate::trigger::AutoTrigger;
use crate::worker::Worker;

/// Trait for components with a latch-governed start/stop lifecycle.
///
/// [`Graceful`] lets an owning process hold a mixed set of components and
/// start or stop them uniformly. `start` runs the component's dispatch loop
/// on the calling task and resolves only when the component stops, so
/// callers spawn it and synchronize on [`Graceful::notify_started`].
pub trait Graceful {
    /// Runs the component until it stops.
    fn start(&self) -> impl Future<Output = CrewResult<()>> + Send;

    /// Stops the component, resolving once the stopped transition fired.
    fn stop(&self) -> impl Future<Output = CrewResult<()>> + Send;

    /// Returns a wait handle for the next started transition.
    fn notify_started(&self) -> LatchWait;

    /// Returns a wait handle for the next stopped transition.
    fn notify_stopped(&self) -> LatchWait;
}

impl<T, A> Graceful for Worker<T, A>
where
    T: Send + 'static,
    A: WorkAction<T>,
{
    fn start(&self) -> impl Future<Output = CrewResult<()>> + Send {
        self.start()
    }

    fn stop(&self) -> impl Future<Output = CrewResult<()>> + Send {
        self.stop()
    }

    fn notify_started(&self) -> LatchWait {
        self.notify_started()
    }

    fn notify_stopped(&self) -> LatchWait {
        self.notify_stopped()
    }
}

impl<T, A> Graceful for Queue<T, A>
where
    T: Send + 'static,
    A: WorkAction<T>,
{
    fn start(&self) -> impl Future<Output = CrewResult<()>> + Send {
        self.start()
    }

    fn stop(&self) -> impl Future<Output = CrewResult<()>> + Send {
        self.stop()
    }

    fn notify_started(&self) -> LatchWait {
        self.notify_started()
    }

    fn notify_stopped(&self) -> LatchWait {
        self.notify_stopped()
    }
}

impl<T, H> Graceful for AutoflushBuffer<T, H>
where
    T: Send + 'static,
    H: FlushHandler<T>,
{
    fn start(&self) -> impl Future<Output = CrewResult<()>> + Send {
        self.start()
    }

    fn stop(&self) -> impl Future<Output = CrewResult<()>> + Send {
        self.stop()
    }

    fn notify_started(&self) -> LatchWait {
        self.notify_started()
    }

    fn notify_stopped(&self) -> LatchWait {
        self.notify_stopped()
    }
}

impl<A> Graceful for Interval<A>
where
    A: TriggerAction,
{
    fn start(&self) -> impl Future<Output = CrewResult<()>> + Send {
        self.start()
    }

    fn stop(&self) -> impl Future<Output = CrewResult<()>> + Send {
        self.stop()
    }

    fn notify_started(&self) -> LatchWait {
        self.notify_started()
    }

    fn notify_stopped(&self) -> LatchWait {
        self.notify_stopped()
    }
}

impl<A> Graceful for AutoTrigger<A>
where
    A: TriggerAction,
{
    fn start(&self) -> impl Future<Output = CrewResult<()>> + Send {
        self.start()
    }

    fn stop(&self) -> impl Future<Output = CrewResult<()>> + Send {
        self.stop()
    }

    fn notify_started(&self) -> LatchWait {
        self.notify_started()
    }

    fn notify_stopped(&self) -> LatchWait {
        self.notify_stopped()
    }
}
