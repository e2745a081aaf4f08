//! One-shot fan-out of a pre-populated work channel.
//!
//! A [`Batch`] processes the items already sitting in a channel across a
//! fixed pool of workers and resolves when they are done. Unlike
//! [`crate::queue::Queue`] it is not a service loop: the quantity of work is
//! fixed when processing begins, and the batch consumes itself.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::action::WorkAction;
use crate::bail;
use crate::config::{BatchConfig, WorkerConfig};
use crate::error::{CrewResult, ErrorKind};
use crate::metrics::{COMPONENT_LABEL, CREW_ITEMS_DROPPED_TOTAL};
use crate::queue::pool_finalizer;
use crate::shutdown::ShutdownRx;
use crate::sink::ErrorTx;
use crate::worker::Worker;

/// Component label value for batch metrics.
const BATCH_COMPONENT: &str = "batch";

/// One-shot fan-out over a fixed quantity of work.
pub struct Batch<T, A> {
    config: BatchConfig,
    action: Arc<A>,
    work_rx: mpsc::Receiver<T>,
    errors: Option<ErrorTx>,
}

impl<T, A> fmt::Debug for Batch<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("parallelism", &self.config.parallelism)
            .field("pending", &self.work_rx.len())
            .finish_non_exhaustive()
    }
}

impl<T, A> Batch<T, A>
where
    T: Send + 'static,
    A: WorkAction<T>,
{
    /// Creates a new batch over a channel the caller has already populated.
    pub fn new(config: BatchConfig, action: A, work_rx: mpsc::Receiver<T>) -> Self {
        Self {
            config,
            action: Arc::new(action),
            work_rx,
            errors: None,
        }
    }

    /// Wires the sink that receives worker action errors.
    pub fn with_errors(mut self, errors: ErrorTx) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Processes the channel's current contents across the worker pool.
    ///
    /// The quantity of work is the channel length at call time; items sent
    /// afterwards are ignored. Each item goes to whichever worker becomes
    /// idle next, so completion order is unordered. A shutdown signal stops
    /// the distribution early, dropping the item in hand; items already
    /// handed to workers still finish. Resolves once every worker has
    /// stopped.
    pub async fn process(mut self, mut shutdown: ShutdownRx) -> CrewResult<()> {
        if let Err(err) = self.config.validate() {
            bail!(
                ErrorKind::ConfigError,
                "invalid batch configuration",
                source: err
            );
        }

        let count = self.work_rx.len();
        if count == 0 {
            debug!("batch work channel is empty, nothing to process");
            return Ok(());
        }

        let parallelism = self.config.parallelism;
        let (available_tx, mut available_rx) = mpsc::channel(parallelism);

        for _ in 0..parallelism {
            let worker =
                Worker::with_shared_action(WorkerConfig { max_work: 1 }, Arc::clone(&self.action))
                    .with_finalizer(pool_finalizer(available_tx.clone()));

            let worker = match self.errors.clone() {
                Some(errors) => worker.with_errors(errors),
                None => worker,
            };

            let mut started = worker.notify_started();

            let task = worker.clone();
            tokio::spawn(async move {
                if let Err(err) = task.start().await {
                    error!(error = %err, "batch worker failed to start");
                }
            });

            started.wait().await;

            if available_tx.send(worker).await.is_err() {
                bail!(
                    ErrorKind::CannotStart,
                    "batch availability channel closed during start"
                );
            }
        }

        info!(parallelism, count, "processing batch");

        for _ in 0..count {
            let Ok(item) = self.work_rx.try_recv() else {
                break;
            };

            tokio::select! {
                biased;

                _ = shutdown.wait_for_shutdown() => {
                    counter!(CREW_ITEMS_DROPPED_TOTAL, COMPONENT_LABEL => BATCH_COMPONENT).increment(1);
                    info!("batch received shutdown signal, stopping early");
                    break;
                }
                worker = available_rx.recv() => {
                    let Some(worker) = worker else {
                        debug!("batch availability channel closed");
                        break;
                    };

                    if let Err(err) = worker.enqueue(item).await {
                        debug!(error = %err, "failed to hand item to batch worker");
                    }
                }
            }
        }

        self.stop_workers(&available_tx, &mut available_rx).await
    }

    /// Stops every worker, which executes the items they still hold.
    async fn stop_workers(
        &self,
        available_tx: &mpsc::Sender<Worker<T, A>>,
        available_rx: &mut mpsc::Receiver<Worker<T, A>>,
    ) -> CrewResult<()> {
        let mut errors = Vec::new();

        for _ in 0..self.config.parallelism {
            let Some(worker) = available_rx.recv().await else {
                break;
            };

            match worker.stop().await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::CannotStop => {
                    // A worker whose stop-time drain ran its finalizer comes
                    // back through the pool a second time, already stopped.
                    debug!("batch worker was already stopped");
                }
                Err(err) => errors.push(err),
            }

            if available_tx.try_send(worker).is_err() {
                debug!("batch availability channel full, dropping stopped worker handle");
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}
