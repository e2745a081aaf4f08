//! Periodic action runner.
//!
//! An [`Interval`] invokes its action once per period until stopped, with an
//! optional delay before the first tick. Invocations are serialized behind a
//! lock held for the duration of the call, so the action never overlaps
//! itself from the same instance.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, info};

use crate::action::TriggerAction;
use crate::bail;
use crate::config::IntervalConfig;
use crate::error::{CrewResult, ErrorKind};
use crate::future::optional_future;
use crate::latch::{Latch, LatchState, LatchWait};
use crate::metrics::{COMPONENT_LABEL, CREW_TRIGGER_FIRES_TOTAL};
use crate::recover::recover;
use crate::shutdown::ShutdownRx;
use crate::sink::{ErrorTx, forward_error};

/// Component label value for interval metrics and error forwarding.
const INTERVAL_COMPONENT: &str = "interval";

/// Internal state of [`Interval`].
struct IntervalInner<A> {
    latch: Latch,
    config: IntervalConfig,
    action: A,
    /// Held across the action call. Keeps invocations from overlapping.
    fire_lock: AsyncMutex<()>,
    errors: Mutex<Option<ErrorTx>>,
    shutdown: Mutex<Option<ShutdownRx>>,
}

/// Timer-driven action runner.
///
/// Cloning is cheap and all clones share the same latch and timer loop.
/// [`Interval::start`] runs the loop on the calling task and resolves only
/// when the interval stops.
pub struct Interval<A> {
    inner: Arc<IntervalInner<A>>,
}

impl<A> Clone for Interval<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Interval<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interval")
            .field("state", &self.inner.latch.state())
            .field("period_ms", &self.inner.config.period_ms)
            .finish_non_exhaustive()
    }
}

impl<A> Interval<A>
where
    A: TriggerAction,
{
    /// Creates a new interval with the given configuration and action.
    pub fn new(config: IntervalConfig, action: A) -> Self {
        Self {
            inner: Arc::new(IntervalInner {
                latch: Latch::new(),
                config,
                action,
                fire_lock: AsyncMutex::new(()),
                errors: Mutex::new(None),
                shutdown: Mutex::new(None),
            }),
        }
    }

    /// Wires the sink that receives action errors.
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

    /// Runs the interval until it stops.
    ///
    /// The timer loop runs on the calling task and the call resolves only
    /// when the interval stops.
    pub async fn start(&self) -> CrewResult<()> {
        if let Err(err) = self.inner.config.validate() {
            bail!(
                ErrorKind::ConfigError,
                "invalid interval configuration",
                source: err
            );
        }

        if !self.inner.latch.try_starting() {
            bail!(
                ErrorKind::CannotStart,
                "interval cannot start",
                detail = format!("interval is {}", self.state().as_str())
            );
        }

        info!(
            period_ms = self.inner.config.period_ms,
            delay_ms = self.inner.config.delay_ms,
            "starting interval"
        );

        self.dispatch().await;

        Ok(())
    }

    /// Timer loop: fires the action once per period until stopped.
    async fn dispatch(&self) {
        let inner = &self.inner;

        let mut shutdown = inner.shutdown.lock().unwrap().clone();
        let mut pausing = inner.latch.notify_pausing();
        let mut stopping = inner.latch.notify_stopping();

        inner.latch.started();

        // The delay postpones the first tick. Stop and shutdown still win;
        // a pause requested during the delay lands right after it.
        if inner.config.delay_ms > 0 {
            tokio::select! {
                biased;

                _ = stopping.wait() => {
                    debug!("interval stopping during start delay");
                    inner.latch.stopped();
                    return;
                }
                _ = optional_future(shutdown.as_mut().map(|shutdown| shutdown.wait_for_shutdown())) => {
                    info!("interval received shutdown signal during start delay");
                    inner.latch.stopping();
                    inner.latch.stopped();
                    return;
                }
                _ = sleep(Duration::from_millis(inner.config.delay_ms)) => {}
            }
        }

        let period = Duration::from_millis(inner.config.period_ms);
        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;

                _ = stopping.wait() => {
                    debug!("interval stopping");
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
                    info!("interval received shutdown signal");
                    inner.latch.stopping();
                    inner.latch.stopped();
                    return;
                }
                _ = ticker.tick() => {
                    self.fire().await;
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
        debug!("interval paused");

        tokio::select! {
            biased;

            _ = stopping.wait() => {
                debug!("interval stopping while paused");
                false
            }
            _ = optional_future(shutdown.as_mut().map(|shutdown| shutdown.wait_for_shutdown())) => {
                info!("interval received shutdown signal while paused");
                inner.latch.stopping();
                false
            }
            _ = resuming.wait() => {
                inner.latch.started();
                debug!("interval resumed");
                true
            }
        }
    }

    /// Runs the action once behind the serialization lock and the panic
    /// boundary.
    async fn fire(&self) {
        let _guard = self.inner.fire_lock.lock().await;

        counter!(CREW_TRIGGER_FIRES_TOTAL, COMPONENT_LABEL => INTERVAL_COMPONENT).increment(1);

        let errors = self.inner.errors.lock().unwrap().clone();

        if let Err(err) = recover(self.inner.action.fire()).await {
            debug!(error = %err, "interval action failed");
            forward_error(errors.as_ref(), INTERVAL_COMPONENT, err).await;
        }
    }

    /// Stops the interval.
    pub async fn stop(&self) -> CrewResult<()> {
        let mut stopped = self.inner.latch.notify_stopped();

        if !self.inner.latch.try_stopping() {
            bail!(
                ErrorKind::CannotStop,
                "interval cannot stop",
                detail = format!("interval is {}", self.state().as_str())
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
                "interval cannot pause",
                detail = format!("interval is {}", self.state().as_str())
            );
        }

        Ok(())
    }

    /// Requests a resume after a pause.
    pub fn resume(&self) -> CrewResult<()> {
        if !self.inner.latch.try_resuming() {
            bail!(
                ErrorKind::CannotResume,
                "interval cannot resume",
                detail = format!("interval is {}", self.state().as_str())
            );
        }

        Ok(())
    }
}
