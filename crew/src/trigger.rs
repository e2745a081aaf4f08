//! Count-based action trigger.
//!
//! An [`AutoTrigger`] counts [`AutoTrigger::increment`] calls and fires its
//! action once the count reaches the configured threshold, atomically
//! resetting the counter. It can additionally fire on a fixed period
//! regardless of count, and once more on stop. All fire paths share one
//! serialization lock, so the action never overlaps itself.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

use crate::action::TriggerAction;
use crate::bail;
use crate::config::TriggerConfig;
use crate::error::{CrewResult, ErrorKind};
use crate::future::optional_future;
use crate::latch::{Latch, LatchState, LatchWait};
use crate::metrics::{COMPONENT_LABEL, CREW_TRIGGER_FIRES_TOTAL};
use crate::recover::recover;
use crate::shutdown::ShutdownRx;
use crate::sink::{ErrorTx, forward_error};

/// Component label value for trigger metrics and error forwarding.
const TRIGGER_COMPONENT: &str = "auto_trigger";

/// Internal state of [`AutoTrigger`].
struct TriggerInner<A> {
    latch: Latch,
    config: TriggerConfig,
    action: A,
    count: AtomicU64,
    /// Held across the action call. Keeps the increment-path and the
    /// timer-path fires from overlapping.
    fire_lock: AsyncMutex<()>,
    errors: Mutex<Option<ErrorTx>>,
    shutdown: Mutex<Option<ShutdownRx>>,
}

/// Increment-driven action runner.
///
/// Cloning is cheap and all clones share the same counter and latch.
/// [`AutoTrigger::start`] runs the dispatch loop on the calling task and
/// resolves only when the trigger stops; counting and threshold fires work
/// whether or not the loop is running.
pub struct AutoTrigger<A> {
    inner: Arc<TriggerInner<A>>,
}

impl<A> Clone for AutoTrigger<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for AutoTrigger<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoTrigger")
            .field("state", &self.inner.latch.state())
            .field("count", &self.inner.count.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<A> AutoTrigger<A>
where
    A: TriggerAction,
{
    /// Creates a new trigger with the given configuration and action.
    pub fn new(config: TriggerConfig, action: A) -> Self {
        Self {
            inner: Arc::new(TriggerInner {
                latch: Latch::new(),
                config,
                action,
                count: AtomicU64::new(0),
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

    /// Wires a shutdown signal that stops the dispatch loop when fired.
    pub fn with_shutdown(self, shutdown: ShutdownRx) -> Self {
        *self.inner.shutdown.lock().unwrap() = Some(shutdown);
        self
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> LatchState {
        self.inner.latch.state()
    }

    /// Returns the current increment count.
    pub fn count(&self) -> u64 {
        self.inner.count.load(Ordering::SeqCst)
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

    /// Bumps the counter, firing the action when it reaches the threshold.
    ///
    /// Exactly one caller observes the crossing: the counter is bumped
    /// atomically and only the increment that lands on `max_count` subtracts
    /// it back out and fires, so concurrent increments past the threshold
    /// carry over into the next round. The firing call resolves once the
    /// action completed.
    pub async fn increment(&self) {
        let count = self.inner.count.fetch_add(1, Ordering::SeqCst) + 1;

        if count == self.inner.config.max_count {
            self.inner
                .count
                .fetch_sub(self.inner.config.max_count, Ordering::SeqCst);
            self.fire().await;
        }
    }

    /// Runs the trigger until it stops.
    ///
    /// The dispatch loop only adds the optional periodic fire and the
    /// stop-time fire; threshold fires ride on [`AutoTrigger::increment`]
    /// callers. The call resolves only when the trigger stops.
    pub async fn start(&self) -> CrewResult<()> {
        if let Err(err) = self.inner.config.validate() {
            bail!(
                ErrorKind::ConfigError,
                "invalid trigger configuration",
                source: err
            );
        }

        if !self.inner.latch.try_starting() {
            bail!(
                ErrorKind::CannotStart,
                "trigger cannot start",
                detail = format!("trigger is {}", self.state().as_str())
            );
        }

        info!(
            max_count = self.inner.config.max_count,
            period_ms = ?self.inner.config.period_ms,
            trigger_on_stop = self.inner.config.trigger_on_stop,
            "starting auto trigger"
        );

        self.dispatch().await;

        Ok(())
    }

    /// Dispatch loop: periodic fires when configured, stop-time fire, and
    /// pause handling.
    async fn dispatch(&self) {
        let inner = &self.inner;

        let mut shutdown = inner.shutdown.lock().unwrap().clone();
        let mut pausing = inner.latch.notify_pausing();
        let mut stopping = inner.latch.notify_stopping();

        // Periodic fires leave the counter untouched.
        let mut ticker = inner.config.period_ms.map(|period_ms| {
            let period = Duration::from_millis(period_ms);
            interval_at(Instant::now() + period, period)
        });

        inner.latch.started();

        loop {
            tokio::select! {
                biased;

                _ = stopping.wait() => {
                    debug!("auto trigger stopping");
                    self.final_fire().await;
                    inner.latch.stopped();
                    return;
                }
                _ = pausing.wait() => {
                    if !self.pause_until_resumed(&mut stopping, &mut shutdown).await {
                        self.final_fire().await;
                        inner.latch.stopped();
                        return;
                    }
                }
                _ = optional_future(shutdown.as_mut().map(|shutdown| shutdown.wait_for_shutdown())) => {
                    info!("auto trigger received shutdown signal");
                    inner.latch.stopping();
                    self.final_fire().await;
                    inner.latch.stopped();
                    return;
                }
                _ = optional_future(ticker.as_mut().map(|ticker| ticker.tick())) => {
                    self.fire().await;
                }
            }
        }
    }

    /// Parks the loop until a resume, a stop, or a shutdown.
    ///
    /// Returns false when the park ended in a stop. Threshold fires from
    /// increment callers keep working while paused.
    async fn pause_until_resumed(
        &self,
        stopping: &mut LatchWait,
        shutdown: &mut Option<ShutdownRx>,
    ) -> bool {
        let inner = &self.inner;

        let mut resuming = inner.latch.notify_resuming();
        inner.latch.paused();
        debug!("auto trigger paused");

        tokio::select! {
            biased;

            _ = stopping.wait() => {
                debug!("auto trigger stopping while paused");
                false
            }
            _ = optional_future(shutdown.as_mut().map(|shutdown| shutdown.wait_for_shutdown())) => {
                info!("auto trigger received shutdown signal while paused");
                inner.latch.stopping();
                false
            }
            _ = resuming.wait() => {
                inner.latch.started();
                debug!("auto trigger resumed");
                true
            }
        }
    }

    /// Stop-time fire when `trigger_on_stop` is set.
    ///
    /// Runs before the stopped transition fires, so a caller awaiting
    /// `stop` observes the fire completed.
    async fn final_fire(&self) {
        if self.inner.config.trigger_on_stop {
            debug!("firing trigger on stop");
            self.fire().await;
        }
    }

    /// Runs the action once behind the serialization lock and the panic
    /// boundary.
    async fn fire(&self) {
        let _guard = self.inner.fire_lock.lock().await;

        counter!(CREW_TRIGGER_FIRES_TOTAL, COMPONENT_LABEL => TRIGGER_COMPONENT).increment(1);

        let errors = self.inner.errors.lock().unwrap().clone();

        if let Err(err) = recover(self.inner.action.fire()).await {
            debug!(error = %err, "trigger action failed");
            forward_error(errors.as_ref(), TRIGGER_COMPONENT, err).await;
        }
    }

    /// Stops the trigger.
    ///
    /// When `trigger_on_stop` is configured, the final fire completes inside
    /// the dispatch loop before this call resolves.
    pub async fn stop(&self) -> CrewResult<()> {
        let mut stopped = self.inner.latch.notify_stopped();

        if !self.inner.latch.try_stopping() {
            bail!(
                ErrorKind::CannotStop,
                "trigger cannot stop",
                detail = format!("trigger is {}", self.state().as_str())
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
                "trigger cannot pause",
                detail = format!("trigger is {}", self.state().as_str())
            );
        }

        Ok(())
    }

    /// Requests a resume after a pause.
    pub fn resume(&self) -> CrewResult<()> {
        if !self.inner.latch.try_resuming() {
            bail!(
                ErrorKind::CannotResume,
                "trigger cannot resume",
                detail = format!("trigger is {}", self.state().as_str())
            );
        }

        Ok(())
    }
}
