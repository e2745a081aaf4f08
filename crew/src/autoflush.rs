//! Accumulating buffer that flushes on a size threshold or a timer.
//!
//! An [`AutoflushBuffer`] collects items and hands them to its handler in
//! batches, whichever of two triggers fires first: the store reaching
//! `max_len`, or the flush interval elapsing. Draining is atomic under the
//! store's lock and the handler always runs outside it, so the two triggers
//! can race but never share an item.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

use crate::action::FlushHandler;
use crate::bail;
use crate::config::BufferConfig;
use crate::error::{CrewResult, ErrorKind};
use crate::future::optional_future;
use crate::latch::{Latch, LatchState, LatchWait};
use crate::metrics::{COMPONENT_LABEL, CREW_FLUSHED_ITEMS_TOTAL, CREW_FLUSHES_TOTAL};
use crate::recover::recover;
use crate::shutdown::ShutdownRx;
use crate::sink::{ErrorTx, forward_error};

/// Component label value for buffer metrics and error forwarding.
const BUFFER_COMPONENT: &str = "autoflush_buffer";

/// Internal state of [`AutoflushBuffer`].
struct BufferInner<T, H> {
    latch: Latch,
    config: BufferConfig,
    handler: H,
    /// Content store. `None` until the buffer starts; a start allocates a
    /// fresh store and discards whatever a previous run left behind.
    contents: Mutex<Option<VecDeque<T>>>,
    errors: Mutex<Option<ErrorTx>>,
    shutdown: Mutex<Option<ShutdownRx>>,
}

/// Size-or-time batching buffer.
///
/// Cloning is cheap and all clones share the same store and latch.
/// [`AutoflushBuffer::start`] runs the timer loop on the calling task and
/// resolves only when the buffer stops, so callers spawn it and wait on
/// [`AutoflushBuffer::notify_started`] before adding.
pub struct AutoflushBuffer<T, H> {
    inner: Arc<BufferInner<T, H>>,
}

impl<T, H> Clone for AutoflushBuffer<T, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, H> fmt::Debug for AutoflushBuffer<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self
            .inner
            .contents
            .lock()
            .unwrap()
            .as_ref()
            .map(VecDeque::len);

        f.debug_struct("AutoflushBuffer")
            .field("state", &self.inner.latch.state())
            .field("pending", &pending)
            .finish_non_exhaustive()
    }
}

impl<T, H> AutoflushBuffer<T, H>
where
    T: Send + 'static,
    H: FlushHandler<T>,
{
    /// Creates a new buffer with the given configuration and flush handler.
    pub fn new(config: BufferConfig, handler: H) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                latch: Latch::new(),
                config,
                handler,
                contents: Mutex::new(None),
                errors: Mutex::new(None),
                shutdown: Mutex::new(None),
            }),
        }
    }

    /// Wires the sink that receives handler errors.
    pub fn with_errors(self, errors: ErrorTx) -> Self {
        *self.inner.errors.lock().unwrap() = Some(errors);
        self
    }

    /// Wires a shutdown signal that stops the timer loop when fired.
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

    /// Appends one item, flushing in the background at the size threshold.
    ///
    /// The threshold drain happens under the same lock as the append, so
    /// racing adds and timer flushes never share an item, and `add` never
    /// waits on the handler. Fails until the buffer was started.
    pub fn add(&self, item: T) -> CrewResult<()> {
        let batch = {
            let mut contents = self.inner.contents.lock().unwrap();

            let Some(contents) = contents.as_mut() else {
                bail!(ErrorKind::QueueClosed, "buffer is not started");
            };

            contents.push_back(item);

            if contents.len() >= self.inner.config.max_len {
                contents.drain(..).collect::<Vec<_>>()
            } else {
                Vec::new()
            }
        };

        if !batch.is_empty() {
            self.spawn_flush(batch);
        }

        Ok(())
    }

    /// Appends many items, flushing in the background each time the size
    /// threshold is crossed.
    pub fn add_many<I>(&self, items: I) -> CrewResult<()>
    where
        I: IntoIterator<Item = T>,
    {
        let mut batches = Vec::new();

        {
            let mut contents = self.inner.contents.lock().unwrap();

            let Some(contents) = contents.as_mut() else {
                bail!(ErrorKind::QueueClosed, "buffer is not started");
            };

            for item in items {
                contents.push_back(item);

                if contents.len() >= self.inner.config.max_len {
                    batches.push(contents.drain(..).collect::<Vec<_>>());
                }
            }
        }

        for batch in batches {
            self.spawn_flush(batch);
        }

        Ok(())
    }

    /// Drains the store and runs the handler inline.
    ///
    /// Empty drains do not invoke the handler. Handler failures are
    /// forwarded to the error sink, never returned.
    pub async fn flush(&self) {
        let batch = self.drain();
        if batch.is_empty() {
            return;
        }

        self.run_handler(batch).await;
    }

    /// Drains the store and flushes the batch on a separate task.
    ///
    /// Returns without waiting on the handler.
    pub fn flush_async(&self) {
        let batch = self.drain();
        if batch.is_empty() {
            return;
        }

        self.spawn_flush(batch);
    }

    /// Runs the buffer until it stops.
    ///
    /// Allocates a fresh content store (discarding anything a previous run
    /// left unflushed) and runs the timer loop on the calling task. The
    /// call resolves only when the buffer stops.
    pub async fn start(&self) -> CrewResult<()> {
        if let Err(err) = self.inner.config.validate() {
            bail!(
                ErrorKind::ConfigError,
                "invalid buffer configuration",
                source: err
            );
        }

        if !self.inner.latch.try_starting() {
            bail!(
                ErrorKind::CannotStart,
                "buffer cannot start",
                detail = format!("buffer is {}", self.state().as_str())
            );
        }

        *self.inner.contents.lock().unwrap() =
            Some(VecDeque::with_capacity(self.inner.config.max_len));

        info!(
            max_len = self.inner.config.max_len,
            interval_ms = self.inner.config.interval_ms,
            "starting autoflush buffer"
        );

        self.dispatch().await;

        Ok(())
    }

    /// Timer loop: flushes on every interval tick until stopped.
    async fn dispatch(&self) {
        let inner = &self.inner;

        let mut shutdown = inner.shutdown.lock().unwrap().clone();
        let mut pausing = inner.latch.notify_pausing();
        let mut stopping = inner.latch.notify_stopping();

        let period = Duration::from_millis(inner.config.interval_ms);
        let mut ticker = interval_at(Instant::now() + period, period);

        inner.latch.started();

        loop {
            tokio::select! {
                biased;

                _ = stopping.wait() => {
                    debug!("buffer stopping");
                    self.final_flush().await;
                    inner.latch.stopped();
                    return;
                }
                _ = pausing.wait() => {
                    if !self.pause_until_resumed(&mut stopping, &mut shutdown).await {
                        self.final_flush().await;
                        inner.latch.stopped();
                        return;
                    }
                }
                _ = optional_future(shutdown.as_mut().map(|shutdown| shutdown.wait_for_shutdown())) => {
                    info!("buffer received shutdown signal");
                    inner.latch.stopping();
                    self.final_flush().await;
                    inner.latch.stopped();
                    return;
                }
                _ = ticker.tick() => {
                    self.flush_async();
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
        debug!("buffer paused");

        tokio::select! {
            biased;

            _ = stopping.wait() => {
                debug!("buffer stopping while paused");
                false
            }
            _ = optional_future(shutdown.as_mut().map(|shutdown| shutdown.wait_for_shutdown())) => {
                info!("buffer received shutdown signal while paused");
                inner.latch.stopping();
                false
            }
            _ = resuming.wait() => {
                inner.latch.started();
                debug!("buffer resumed");
                true
            }
        }
    }

    /// Synchronous flush run in the stop path when `flush_on_stop` is set.
    ///
    /// Runs before the stopped transition fires, so a caller awaiting
    /// `stop` observes the flush completed.
    async fn final_flush(&self) {
        if self.inner.config.flush_on_stop {
            debug!("flushing buffer on stop");
            self.flush().await;
        }
    }

    /// Stops the buffer.
    ///
    /// When `flush_on_stop` is configured, the final flush completes inside
    /// the timer loop before this call resolves.
    pub async fn stop(&self) -> CrewResult<()> {
        let mut stopped = self.inner.latch.notify_stopped();

        if !self.inner.latch.try_stopping() {
            bail!(
                ErrorKind::CannotStop,
                "buffer cannot stop",
                detail = format!("buffer is {}", self.state().as_str())
            );
        }

        stopped.wait().await;

        Ok(())
    }

    /// Requests a pause. The timer loop acknowledges by firing paused.
    pub fn pause(&self) -> CrewResult<()> {
        if !self.inner.latch.try_pausing() {
            bail!(
                ErrorKind::CannotPause,
                "buffer cannot pause",
                detail = format!("buffer is {}", self.state().as_str())
            );
        }

        Ok(())
    }

    /// Requests a resume after a pause.
    pub fn resume(&self) -> CrewResult<()> {
        if !self.inner.latch.try_resuming() {
            bail!(
                ErrorKind::CannotResume,
                "buffer cannot resume",
                detail = format!("buffer is {}", self.state().as_str())
            );
        }

        Ok(())
    }

    /// Drains the entire store under the lock, returning the batch.
    fn drain(&self) -> Vec<T> {
        let mut contents = self.inner.contents.lock().unwrap();

        match contents.as_mut() {
            Some(contents) => contents.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Flushes one already-drained batch on a separate task.
    fn spawn_flush(&self, batch: Vec<T>) {
        let buffer = self.clone();

        tokio::spawn(async move {
            buffer.run_handler(batch).await;
        });
    }

    /// Runs the handler on one batch behind the panic boundary.
    async fn run_handler(&self, items: Vec<T>) {
        counter!(CREW_FLUSHES_TOTAL, COMPONENT_LABEL => BUFFER_COMPONENT).increment(1);
        counter!(CREW_FLUSHED_ITEMS_TOTAL, COMPONENT_LABEL => BUFFER_COMPONENT)
            .increment(items.len() as u64);

        let errors = self.inner.errors.lock().unwrap().clone();

        if let Err(err) = recover(self.inner.handler.flush(items)).await {
            debug!(error = %err, "buffer flush handler failed");
            forward_error(errors.as_ref(), BUFFER_COMPONENT, err).await;
        }
    }
}
