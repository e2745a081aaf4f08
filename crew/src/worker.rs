//! Single executor that applies an action to queued work items.
//!
//! A [`Worker`] owns one bounded input queue and one action. Its dispatch
//! loop pulls items in FIFO order and applies the action to each, honoring
//! pause and stop requests between items. Action failures and recovered
//! panics are forwarded to an optional error sink and never terminate the
//! loop.

use std::fmt;
use std::sync::{Arc, Mutex};

use metrics::counter;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::action::{Finalizer, WorkAction};
use crate::bail;
use crate::config::WorkerConfig;
use crate::error::{CrewError, CrewResult, ErrorKind};
use crate::future::optional_future;
use crate::latch::{Latch, LatchState, LatchWait};
use crate::metrics::{COMPONENT_LABEL, CREW_ITEMS_PROCESSED_TOTAL};
use crate::recover::recover;
use crate::shutdown::ShutdownRx;
use crate::sink::{ErrorTx, forward_error};

/// Component label value for worker metrics and error forwarding.
const WORKER_COMPONENT: &str = "worker";

/// Worker whose items are [`CrewError`]s.
///
/// Used as the consuming end of error sinks so failure handling itself runs
/// through the same dispatch machinery as regular work.
pub type ErrorWorker<A> = Worker<CrewError, A>;

/// Internal state of [`Worker`].
struct WorkerInner<T, A> {
    latch: Latch,
    config: WorkerConfig,
    action: Arc<A>,
    /// Sender side of the work queue. `None` after `close`.
    work_tx: Mutex<Option<mpsc::Sender<T>>>,
    /// Receiver side of the work queue. The async mutex lets `stop` and
    /// `drain` pull items while the dispatch loop is parked or gone.
    work_rx: AsyncMutex<mpsc::Receiver<T>>,
    finalizer: Mutex<Option<Finalizer<T, A>>>,
    errors: Mutex<Option<ErrorTx>>,
    shutdown: Mutex<Option<ShutdownRx>>,
}

/// Single concurrent executor with its own bounded work queue.
///
/// Cloning is cheap and all clones share the same queue and latch, which is
/// how pooled workers hand themselves around. [`Worker::start`] runs the
/// dispatch loop on the calling task and resolves only when the worker
/// stops, so callers typically spawn it and wait on
/// [`Worker::notify_started`] before enqueueing.
pub struct Worker<T, A> {
    inner: Arc<WorkerInner<T, A>>,
}

impl<T, A> Clone for Worker<T, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, A> fmt::Debug for Worker<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("state", &self.inner.latch.state())
            .field("max_work", &self.inner.config.max_work)
            .finish_non_exhaustive()
    }
}

impl<T, A> Worker<T, A>
where
    T: Send + 'static,
    A: WorkAction<T>,
{
    /// Creates a new worker with the given configuration and action.
    ///
    /// The work queue is allocated immediately, so items can be enqueued
    /// before the worker starts.
    pub fn new(config: WorkerConfig, action: A) -> Self {
        Self::with_shared_action(config, Arc::new(action))
    }

    /// Creates a worker over an already-shared action, used by pools that
    /// hand one action to several workers.
    pub(crate) fn with_shared_action(config: WorkerConfig, action: Arc<A>) -> Self {
        // Zero capacity would panic in the channel constructor; validate
        // reports it as a config error on start instead.
        let (work_tx, work_rx) = mpsc::channel(config.max_work.max(1));

        Self {
            inner: Arc::new(WorkerInner {
                latch: Latch::new(),
                config,
                action,
                work_tx: Mutex::new(Some(work_tx)),
                work_rx: AsyncMutex::new(work_rx),
                finalizer: Mutex::new(None),
                errors: Mutex::new(None),
                shutdown: Mutex::new(None),
            }),
        }
    }

    /// Wires the sink that receives action and finalizer errors.
    pub fn with_errors(self, errors: ErrorTx) -> Self {
        *self.inner.errors.lock().unwrap() = Some(errors);
        self
    }

    /// Wires a shutdown signal that stops the dispatch loop when fired.
    pub fn with_shutdown(self, shutdown: ShutdownRx) -> Self {
        *self.inner.shutdown.lock().unwrap() = Some(shutdown);
        self
    }

    /// Installs the per-item finalizer hook.
    pub(crate) fn with_finalizer(self, finalizer: Finalizer<T, A>) -> Self {
        *self.inner.finalizer.lock().unwrap() = Some(finalizer);
        self
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> LatchState {
        self.inner.latch.state()
    }

    /// Returns a wait handle for the next started transition.
    pub fn notify_started(&self) -> LatchWait {
        self.inner.latch.notify_started()
    }

    /// Returns a wait handle for the next paused transition.
    pub fn notify_paused(&self) -> LatchWait {
        self.inner.latch.notify_paused()
    }

    /// Returns a wait handle for the next stopped transition.
    pub fn notify_stopped(&self) -> LatchWait {
        self.inner.latch.notify_stopped()
    }

    /// Submits one work item, awaiting queue capacity when full.
    ///
    /// Backpressure is the contract: with the default capacity of one this
    /// is a handoff to the dispatch loop. Fails with
    /// [`ErrorKind::QueueClosed`] once the worker was closed.
    pub async fn enqueue(&self, item: T) -> CrewResult<()> {
        let work_tx = self.inner.work_tx.lock().unwrap().as_ref().cloned();

        let Some(work_tx) = work_tx else {
            bail!(ErrorKind::QueueClosed, "worker queue is closed");
        };

        if work_tx.send(item).await.is_err() {
            bail!(ErrorKind::QueueClosed, "worker queue is closed");
        }

        Ok(())
    }

    /// Runs the worker until it stops.
    ///
    /// Fails when the configuration is invalid or the worker is not in a
    /// startable state. The call resolves only when the dispatch loop
    /// exits, so callers run it on its own task.
    pub async fn start(&self) -> CrewResult<()> {
        if let Err(err) = self.inner.config.validate() {
            bail!(
                ErrorKind::ConfigError,
                "invalid worker configuration",
                source: err
            );
        }

        if !self.inner.latch.try_starting() {
            bail!(
                ErrorKind::CannotStart,
                "worker cannot start",
                detail = format!("worker is {}", self.state().as_str())
            );
        }

        info!(max_work = self.inner.config.max_work, "starting worker");

        self.dispatch().await;

        Ok(())
    }

    /// Dispatch loop: applies the action to items until stopped.
    async fn dispatch(&self) {
        let inner = &self.inner;

        let mut shutdown = inner.shutdown.lock().unwrap().clone();
        let mut pausing = inner.latch.notify_pausing();
        let mut stopping = inner.latch.notify_stopping();

        inner.latch.started();

        loop {
            tokio::select! {
                biased;

                _ = stopping.wait() => {
                    debug!("worker stopping");
                    inner.latch.stopped();
                    return;
                }
                _ = pausing.wait() => {
                    if !self.pause_until_resumed(&mut stopping, &mut shutdown).await {
                        inner.latch.stopped();
                        return;
                    }
                }
                _ = optional_future(shutdown.as_mut().map(|shutdown| shutdown.wait_for_shutdown())) => {
                    info!("worker received shutdown signal");
                    inner.latch.stopping();
                    inner.latch.stopped();
                    return;
                }
                item = async { inner.work_rx.lock().await.recv().await } => {
                    match item {
                        Some(item) => self.execute(item).await,
                        None => {
                            debug!("worker queue closed, stopping");
                            inner.latch.stopping();
                            inner.latch.stopped();
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Parks the loop until a resume, a stop, or a shutdown.
    ///
    /// The resume handle is taken before `paused` fires, so a caller that
    /// resumes immediately after observing the pause cannot be missed.
    /// Returns false when the park ended in a stop.
    async fn pause_until_resumed(
        &self,
        stopping: &mut LatchWait,
        shutdown: &mut Option<ShutdownRx>,
    ) -> bool {
        let inner = &self.inner;

        let mut resuming = inner.latch.notify_resuming();
        inner.latch.paused();
        debug!("worker paused");

        tokio::select! {
            biased;

            _ = stopping.wait() => {
                debug!("worker stopping while paused");
                false
            }
            _ = optional_future(shutdown.as_mut().map(|shutdown| shutdown.wait_for_shutdown())) => {
                info!("worker received shutdown signal while paused");
                inner.latch.stopping();
                false
            }
            _ = resuming.wait() => {
                inner.latch.started();
                debug!("worker resumed");
                true
            }
        }
    }

    /// Applies the action to one item behind the panic boundary, then runs
    /// the finalizer. Both failure paths forward to the error sink.
    async fn execute(&self, item: T) {
        counter!(CREW_ITEMS_PROCESSED_TOTAL, COMPONENT_LABEL => WORKER_COMPONENT).increment(1);

        let errors = self.inner.errors.lock().unwrap().clone();

        if let Err(err) = recover(self.inner.action.apply(item)).await {
            debug!(error = %err, "worker action failed");
            forward_error(errors.as_ref(), WORKER_COMPONENT, err).await;
        }

        let finalizer = self.inner.finalizer.lock().unwrap().clone();
        if let Some(finalizer) = finalizer {
            if let Err(err) = recover(finalizer(self.clone())).await {
                debug!(error = %err, "worker finalizer failed");
                forward_error(errors.as_ref(), WORKER_COMPONENT, err).await;
            }
        }
    }

    /// Stops the worker, then executes everything still queued.
    ///
    /// Waits for the dispatch loop to exit before draining, so no item is
    /// processed twice. Fails with [`ErrorKind::CannotStop`] unless the
    /// worker is started.
    pub async fn stop(&self) -> CrewResult<()> {
        let mut stopped = self.inner.latch.notify_stopped();

        if !self.inner.latch.try_stopping() {
            bail!(
                ErrorKind::CannotStop,
                "worker cannot stop",
                detail = format!("worker is {}", self.state().as_str())
            );
        }

        stopped.wait().await;

        let mut work_rx = self.inner.work_rx.lock().await;
        if !work_rx.is_empty() {
            debug!(remaining = work_rx.len(), "executing items queued at stop");
        }

        while let Ok(item) = work_rx.try_recv() {
            self.execute(item).await;
        }

        Ok(())
    }

    /// Stops the worker and closes its queue for good.
    ///
    /// Runs the same stop-time drain first when the worker is running.
    /// After close every `enqueue` fails, and a later `start` observes the
    /// closed queue and stops immediately.
    pub async fn close(&self) -> CrewResult<()> {
        if self.inner.latch.can_stop() {
            self.stop().await?;
        } else if !self.inner.latch.is_stopped() {
            bail!(
                ErrorKind::CannotClose,
                "worker cannot close",
                detail = format!("worker is {}", self.state().as_str())
            );
        }

        self.inner.work_tx.lock().unwrap().take();

        Ok(())
    }

    /// Pauses the worker, executes a snapshot of the queue, and resumes.
    ///
    /// The snapshot is the queue length at pause time; items enqueued later
    /// stay queued for the dispatch loop. A shutdown arriving while waiting
    /// for the pause cancels the drain and leaves the worker paused.
    pub async fn drain(&self, mut shutdown: ShutdownRx) -> CrewResult<()> {
        let mut paused = self.inner.latch.notify_paused();

        if !self.inner.latch.try_pausing() {
            bail!(
                ErrorKind::CannotDrain,
                "worker cannot drain",
                detail = format!("worker is {}", self.state().as_str())
            );
        }

        tokio::select! {
            biased;

            _ = shutdown.wait_for_shutdown() => {
                bail!(ErrorKind::Canceled, "worker drain canceled");
            }
            _ = paused.wait() => {}
        }

        {
            let mut work_rx = self.inner.work_rx.lock().await;
            let snapshot = work_rx.len();
            debug!(snapshot, "draining worker queue");

            for _ in 0..snapshot {
                let Ok(item) = work_rx.try_recv() else {
                    break;
                };

                self.execute(item).await;
            }
        }

        self.resume()
    }

    /// Requests a pause. The dispatch loop acknowledges by firing paused.
    pub fn pause(&self) -> CrewResult<()> {
        if !self.inner.latch.try_pausing() {
            bail!(
                ErrorKind::CannotPause,
                "worker cannot pause",
                detail = format!("worker is {}", self.state().as_str())
            );
        }

        Ok(())
    }

    /// Requests a resume after a pause.
    pub fn resume(&self) -> CrewResult<()> {
        if !self.inner.latch.try_resuming() {
            bail!(
                ErrorKind::CannotResume,
                "worker cannot resume",
                detail = format!("worker is {}", self.state().as_str())
            );
        }

        Ok(())
    }
}

impl<A> ErrorWorker<A>
where
    A: WorkAction<CrewError>,
{
    /// Returns a sender that feeds errors into this worker's queue,
    /// suitable for other components' `with_errors` option.
    pub fn error_sink(&self) -> CrewResult<ErrorTx> {
        let Some(sink) = self.inner.work_tx.lock().unwrap().as_ref().cloned() else {
            bail!(ErrorKind::SinkClosed, "error worker queue is closed");
        };

        Ok(sink)
    }
}
