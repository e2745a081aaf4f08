//! Fan-out dispatcher over a fixed pool of workers.
//!
//! A [`Queue`] owns a bounded input channel and `parallelism` workers. Its
//! dispatch loop pulls one item at a time and hands it to the next idle
//! worker; each worker returns itself to the availability pool through its
//! finalizer after finishing an item. A worker is idle exactly when it sits
//! in the availability channel.

use std::fmt;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use metrics::counter;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::action::{Finalizer, WorkAction};
use crate::bail;
use crate::config::{QueueConfig, WorkerConfig};
use crate::crew_error;
use crate::error::{CrewError, CrewResult, ErrorKind};
use crate::future::optional_future;
use crate::latch::{Latch, LatchState, LatchWait};
use crate::metrics::{COMPONENT_LABEL, CREW_ITEMS_DROPPED_TOTAL};
use crate::shutdown::ShutdownRx;
use crate::sink::ErrorTx;
use crate::worker::Worker;

/// Component label value for queue metrics.
const QUEUE_COMPONENT: &str = "queue";

/// Queue whose items are [`CrewError`]s.
///
/// Intended as the sink that other components' error channels feed into, so
/// error handling itself is parallelized and rate limited.
pub type ErrorQueue<A> = Queue<CrewError, A>;

/// Receiver shared between the dispatch loop and the stop path.
type SharedReceiver<T> = Arc<AsyncMutex<mpsc::Receiver<T>>>;

/// Channels and workers allocated by [`Queue::start`].
enum QueueState<T, A> {
    NotStarted,
    Started {
        work_tx: mpsc::Sender<T>,
        work_rx: SharedReceiver<T>,
        available_tx: mpsc::Sender<Worker<T, A>>,
        available_rx: SharedReceiver<Worker<T, A>>,
    },
}

/// Borrowed view of the started allocation handed to the dispatch loop.
struct Allocation<T, A> {
    work_rx: SharedReceiver<T>,
    available_tx: mpsc::Sender<Worker<T, A>>,
    available_rx: SharedReceiver<Worker<T, A>>,
    /// Workers created by this call. Empty when a previous allocation was
    /// reused.
    fresh_workers: Vec<Worker<T, A>>,
}

/// Internal state of [`Queue`].
struct QueueInner<T, A> {
    latch: Latch,
    config: QueueConfig,
    action: Arc<A>,
    state: Mutex<QueueState<T, A>>,
    errors: Mutex<Option<ErrorTx>>,
    shutdown: Mutex<Option<ShutdownRx>>,
}

/// Dispatcher that fans work out across a fixed worker pool.
///
/// Cloning is cheap and all clones share the same channels, workers, and
/// latch. [`Queue::start`] runs the dispatch loop on the calling task and
/// resolves only when the queue stops, so callers spawn it and wait on
/// [`Queue::notify_started`] before enqueueing.
pub struct Queue<T, A> {
    inner: Arc<QueueInner<T, A>>,
}

impl<T, A> Clone for Queue<T, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, A> fmt::Debug for Queue<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("state", &self.inner.latch.state())
            .field("parallelism", &self.inner.config.parallelism)
            .field("max_work", &self.inner.config.max_work)
            .finish_non_exhaustive()
    }
}

impl<T, A> Queue<T, A>
where
    T: Send + 'static,
    A: WorkAction<T>,
{
    /// Creates a new queue with the given configuration and action.
    ///
    /// Channels and workers are allocated on [`Queue::start`].
    pub fn new(config: QueueConfig, action: A) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                latch: Latch::new(),
                config,
                action: Arc::new(action),
                state: Mutex::new(QueueState::NotStarted),
                errors: Mutex::new(None),
                shutdown: Mutex::new(None),
            }),
        }
    }

    /// Wires the sink that receives worker action errors.
    ///
    /// Takes effect for workers allocated afterwards, so it is wired before
    /// the first start.
    pub fn with_errors(self, errors: ErrorTx) -> Self {
        *self.inner.errors.lock().unwrap() = Some(errors);
        self
    }

    /// Wires a shutdown signal that stops the dispatch loop when fired.
    pub fn with_shutdown(self, shutdown: ShutdownRx) -> Self {
        *self.inner.shutdown.lock().unwrap() = Some(shutdown);
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

    /// Submits one item, awaiting channel capacity when full.
    ///
    /// A full channel is the backpressure surface: producers wait here while
    /// every worker is busy. Fails until the queue was started.
    pub async fn enqueue(&self, item: T) -> CrewResult<()> {
        let work_tx = {
            let state = self.inner.state.lock().unwrap();

            let QueueState::Started { work_tx, .. } = &*state else {
                bail!(ErrorKind::QueueClosed, "queue is not started");
            };

            work_tx.clone()
        };

        if work_tx.send(item).await.is_err() {
            bail!(ErrorKind::QueueClosed, "queue input channel is closed");
        }

        Ok(())
    }

    /// Runs the queue until it stops.
    ///
    /// Allocates channels and workers on first start, spawns every worker
    /// and waits for each to report started, then runs the dispatch loop on
    /// the calling task. The call resolves only when the queue stops.
    pub async fn start(&self) -> CrewResult<()> {
        if let Err(err) = self.inner.config.validate() {
            bail!(
                ErrorKind::ConfigError,
                "invalid queue configuration",
                source: err
            );
        }

        if !self.inner.latch.try_starting() {
            bail!(
                ErrorKind::CannotStart,
                "queue cannot start",
                detail = format!("queue is {}", self.state().as_str())
            );
        }

        let allocation = self.allocate();

        for worker in allocation.fresh_workers {
            let mut started = worker.notify_started();

            let task = worker.clone();
            tokio::spawn(async move {
                if let Err(err) = task.start().await {
                    error!(error = %err, "pooled worker failed to start");
                }
            });

            started.wait().await;

            if allocation.available_tx.send(worker).await.is_err() {
                bail!(
                    ErrorKind::CannotStart,
                    "queue availability channel closed during start"
                );
            }
        }

        info!(
            parallelism = self.inner.config.parallelism,
            max_work = self.inner.config.max_work,
            "starting queue"
        );

        self.dispatch(allocation.work_rx, allocation.available_rx)
            .await;

        Ok(())
    }

    /// Creates the channels and workers on first start.
    ///
    /// A start after a stop reuses the previous allocation, which still
    /// holds the stopped workers; `stop` documents that it is terminal for
    /// exactly this reason.
    fn allocate(&self) -> Allocation<T, A> {
        let mut state = self.inner.state.lock().unwrap();

        if let QueueState::Started {
            work_rx,
            available_tx,
            available_rx,
            ..
        } = &*state
        {
            return Allocation {
                work_rx: Arc::clone(work_rx),
                available_tx: available_tx.clone(),
                available_rx: Arc::clone(available_rx),
                fresh_workers: Vec::new(),
            };
        }

        let config = &self.inner.config;
        let (work_tx, work_rx) = mpsc::channel(config.max_work);
        let (available_tx, available_rx) = mpsc::channel(config.parallelism);
        let errors = self.inner.errors.lock().unwrap().clone();

        let fresh_workers = (0..config.parallelism)
            .map(|_| {
                let worker = Worker::with_shared_action(
                    WorkerConfig { max_work: 1 },
                    Arc::clone(&self.inner.action),
                )
                .with_finalizer(pool_finalizer(available_tx.clone()));

                match errors.clone() {
                    Some(errors) => worker.with_errors(errors),
                    None => worker,
                }
            })
            .collect::<Vec<_>>();

        let work_rx = Arc::new(AsyncMutex::new(work_rx));
        let available_rx = Arc::new(AsyncMutex::new(available_rx));

        *state = QueueState::Started {
            work_tx,
            work_rx: Arc::clone(&work_rx),
            available_tx: available_tx.clone(),
            available_rx: Arc::clone(&available_rx),
        };

        Allocation {
            work_rx,
            available_tx,
            available_rx,
            fresh_workers,
        }
    }

    /// Dispatch loop: assigns items to idle workers until stopped.
    async fn dispatch(
        &self,
        work_rx: SharedReceiver<T>,
        available_rx: SharedReceiver<Worker<T, A>>,
    ) {
        let inner = &self.inner;

        let mut shutdown = inner.shutdown.lock().unwrap().clone();
        let mut pausing = inner.latch.notify_pausing();
        let mut stopping = inner.latch.notify_stopping();

        inner.latch.started();

        loop {
            tokio::select! {
                biased;

                _ = stopping.wait() => {
                    debug!("queue stopping");
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
                    info!("queue received shutdown signal");
                    inner.latch.stopping();
                    inner.latch.stopped();
                    return;
                }
                item = async { work_rx.lock().await.recv().await } => {
                    let Some(item) = item else {
                        debug!("queue input channel closed, stopping");
                        inner.latch.stopping();
                        inner.latch.stopped();
                        return;
                    };

                    if !self.assign(item, &available_rx, &mut stopping).await {
                        inner.latch.stopping();
                        inner.latch.stopped();
                        return;
                    }
                }
            }
        }
    }

    /// Parks the loop until a resume, a stop, or a shutdown.
    ///
    /// Returns false when the park ended in a stop.
    async fn pause_until_resumed(
        &self,
        stopping: &mut LatchWait,
        shutdown: &mut Option<ShutdownRx>,
    ) -> bool {
        let inner = &self.inner;

        let mut resuming = inner.latch.notify_resuming();
        inner.latch.paused();
        debug!("queue paused");

        tokio::select! {
            biased;

            _ = stopping.wait() => {
                debug!("queue stopping while paused");
                false
            }
            _ = optional_future(shutdown.as_mut().map(|shutdown| shutdown.wait_for_shutdown())) => {
                info!("queue received shutdown signal while paused");
                inner.latch.stopping();
                false
            }
            _ = resuming.wait() => {
                inner.latch.started();
                debug!("queue resumed");
                true
            }
        }
    }

    /// Hands one item to the next idle worker, racing a stop request.
    ///
    /// A stop that wins the race drops the in-hand item, trading item loss
    /// for shutdown latency. Returns false when the queue should stop.
    async fn assign(
        &self,
        item: T,
        available_rx: &SharedReceiver<Worker<T, A>>,
        stopping: &mut LatchWait,
    ) -> bool {
        tokio::select! {
            biased;

            _ = stopping.wait() => {
                counter!(CREW_ITEMS_DROPPED_TOTAL, COMPONENT_LABEL => QUEUE_COMPONENT).increment(1);
                debug!("queue stopping, dropping in-hand item");
                false
            }
            worker = async { available_rx.lock().await.recv().await } => {
                let Some(worker) = worker else {
                    debug!("queue availability channel closed, stopping");
                    return false;
                };

                if let Err(err) = worker.enqueue(item).await {
                    debug!(error = %err, "failed to hand item to worker");
                }

                true
            }
        }
    }

    /// Stops the queue, then stops each pooled worker.
    ///
    /// Every worker is pulled from the availability pool, stopped (which
    /// executes the items left in its own queue), and pushed back. Items
    /// still in the queue's input channel are not processed. Stop is
    /// terminal: the pool now holds stopped workers, so a queue is
    /// reconstructed for a further run rather than started again.
    pub async fn stop(&self) -> CrewResult<()> {
        let mut stopped = self.inner.latch.notify_stopped();

        if !self.inner.latch.try_stopping() {
            bail!(
                ErrorKind::CannotStop,
                "queue cannot stop",
                detail = format!("queue is {}", self.state().as_str())
            );
        }

        stopped.wait().await;

        let (available_tx, available_rx) = {
            let state = self.inner.state.lock().unwrap();

            let QueueState::Started {
                available_tx,
                available_rx,
                ..
            } = &*state
            else {
                return Ok(());
            };

            (available_tx.clone(), Arc::clone(available_rx))
        };

        let mut errors = Vec::new();
        let mut available_rx = available_rx.lock().await;

        for _ in 0..self.inner.config.parallelism {
            let Some(worker) = available_rx.recv().await else {
                break;
            };

            match worker.stop().await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::CannotStop => {
                    // A worker whose stop-time drain ran its finalizer comes
                    // back through the pool a second time, already stopped.
                    debug!("pooled worker was already stopped");
                }
                Err(err) => errors.push(err),
            }

            if available_tx.try_send(worker).is_err() {
                debug!("availability channel full, dropping stopped worker handle");
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    /// Waits for a stop in progress to finish; remaining input is discarded.
    ///
    /// Fails unless the queue is stopping or already stopped.
    pub async fn close(&self) -> CrewResult<()> {
        let mut stopped = self.inner.latch.notify_stopped();

        if self.inner.latch.is_stopped() {
            return Ok(());
        }

        if !self.inner.latch.is_stopping() {
            bail!(
                ErrorKind::CannotClose,
                "queue cannot close",
                detail = format!("queue is {}", self.state().as_str())
            );
        }

        stopped.wait().await;

        Ok(())
    }

    /// Requests a pause. The dispatch loop acknowledges by firing paused.
    pub fn pause(&self) -> CrewResult<()> {
        if !self.inner.latch.try_pausing() {
            bail!(
                ErrorKind::CannotPause,
                "queue cannot pause",
                detail = format!("queue is {}", self.state().as_str())
            );
        }

        Ok(())
    }

    /// Requests a resume after a pause.
    pub fn resume(&self) -> CrewResult<()> {
        if !self.inner.latch.try_resuming() {
            bail!(
                ErrorKind::CannotResume,
                "queue cannot resume",
                detail = format!("queue is {}", self.state().as_str())
            );
        }

        Ok(())
    }
}

impl<A> ErrorQueue<A>
where
    A: WorkAction<CrewError>,
{
    /// Returns a sender that feeds errors into this queue's input channel,
    /// suitable for other components' `with_errors` option. Available once
    /// the queue was started.
    pub fn error_sink(&self) -> CrewResult<ErrorTx> {
        let state = self.inner.state.lock().unwrap();

        let QueueState::Started { work_tx, .. } = &*state else {
            bail!(ErrorKind::SinkClosed, "error queue is not started");
        };

        Ok(work_tx.clone())
    }
}

/// Builds the finalizer that returns a pooled worker to the availability
/// channel after each item.
pub(crate) fn pool_finalizer<T, A>(available_tx: mpsc::Sender<Worker<T, A>>) -> Finalizer<T, A>
where
    T: Send + 'static,
    A: WorkAction<T>,
{
    Arc::new(move |worker| {
        let available_tx = available_tx.clone();

        async move {
            available_tx.send(worker).await.map_err(|_| {
                crew_error!(
                    ErrorKind::SinkClosed,
                    "queue availability channel is closed"
                )
            })
        }
        .boxed()
    })
}
