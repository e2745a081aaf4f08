//! Lifecycle state machine shared by all components.
//!
//! A [`Latch`] tracks which lifecycle state a component is in and exposes one
//! notification per state transition. Transitions are idempotent and each
//! notification fires exactly once per generation: observers take a
//! [`LatchWait`] handle and block on it until the corresponding transition
//! happens after the handle was taken.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

/// Lifecycle states a [`Latch`] can be in.
///
/// `Stopped` is the initial state. `Active` is a declared state with a full
/// transition surface but none of the shipped dispatch loops enter it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LatchState {
    Stopped = 0,
    Starting = 1,
    Resuming = 2,
    Started = 3,
    Active = 4,
    Pausing = 5,
    Paused = 6,
    Stopping = 7,
}

impl LatchState {
    /// Returns the state for a raw stored value.
    fn from_u8(value: u8) -> LatchState {
        match value {
            1 => LatchState::Starting,
            2 => LatchState::Resuming,
            3 => LatchState::Started,
            4 => LatchState::Active,
            5 => LatchState::Pausing,
            6 => LatchState::Paused,
            7 => LatchState::Stopping,
            _ => LatchState::Stopped,
        }
    }

    /// Returns a human-readable name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            LatchState::Stopped => "stopped",
            LatchState::Starting => "starting",
            LatchState::Resuming => "resuming",
            LatchState::Started => "started",
            LatchState::Active => "active",
            LatchState::Pausing => "pausing",
            LatchState::Paused => "paused",
            LatchState::Stopping => "stopping",
        }
    }
}

/// Internal state of [`Latch`].
#[derive(Debug)]
struct LatchInner {
    /// Current state, readable without taking the transition lock.
    state: AtomicU8,
    /// Serializes transitions so that the already-in-state check and the
    /// signal fire happen in one critical section.
    transition: Mutex<()>,
    starting: watch::Sender<u64>,
    resuming: watch::Sender<u64>,
    started: watch::Sender<u64>,
    active: watch::Sender<u64>,
    pausing: watch::Sender<u64>,
    paused: watch::Sender<u64>,
    stopping: watch::Sender<u64>,
    stopped: watch::Sender<u64>,
}

/// Lifecycle state machine with one-shot, per-generation transition signals.
///
/// Every component owns a [`Latch`] and drives it from its dispatch loop;
/// callers observe transitions through [`Latch::notify_started`] and friends.
/// Transition methods are no-ops when the latch is already in the target
/// state, so concurrent callers cannot double-fire a signal.
///
/// Cloning is cheap and all clones share the same state.
#[derive(Debug, Clone)]
pub struct Latch {
    inner: Arc<LatchInner>,
}

impl Latch {
    /// Creates a new latch in the `Stopped` state.
    pub fn new() -> Self {
        let signal = || watch::channel(0u64).0;

        Self {
            inner: Arc::new(LatchInner {
                state: AtomicU8::new(LatchState::Stopped as u8),
                transition: Mutex::new(()),
                starting: signal(),
                resuming: signal(),
                started: signal(),
                active: signal(),
                pausing: signal(),
                paused: signal(),
                stopping: signal(),
                stopped: signal(),
            }),
        }
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> LatchState {
        LatchState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Returns whether `start` is allowed, true only in `Stopped`.
    pub fn can_start(&self) -> bool {
        self.state() == LatchState::Stopped
    }

    /// Returns whether `pause` is allowed, true only in `Started`.
    pub fn can_pause(&self) -> bool {
        self.state() == LatchState::Started
    }

    /// Returns whether `stop` is allowed, true only in `Started`.
    pub fn can_stop(&self) -> bool {
        self.state() == LatchState::Started
    }

    /// Returns whether the latch is in `Stopped`.
    pub fn is_stopped(&self) -> bool {
        self.state() == LatchState::Stopped
    }

    /// Returns whether the latch is in `Starting`.
    pub fn is_starting(&self) -> bool {
        self.state() == LatchState::Starting
    }

    /// Returns whether the latch is in `Resuming`.
    pub fn is_resuming(&self) -> bool {
        self.state() == LatchState::Resuming
    }

    /// Returns whether the latch is in `Started`.
    pub fn is_started(&self) -> bool {
        self.state() == LatchState::Started
    }

    /// Returns whether the latch is in `Active`.
    pub fn is_active(&self) -> bool {
        self.state() == LatchState::Active
    }

    /// Returns whether the latch is in `Pausing`.
    pub fn is_pausing(&self) -> bool {
        self.state() == LatchState::Pausing
    }

    /// Returns whether the latch is in `Paused`.
    pub fn is_paused(&self) -> bool {
        self.state() == LatchState::Paused
    }

    /// Returns whether the latch is in `Stopping`.
    pub fn is_stopping(&self) -> bool {
        self.state() == LatchState::Stopping
    }

    /// Moves the latch to `Starting` and fires the starting signal.
    pub fn starting(&self) {
        self.apply(LatchState::Starting, &self.inner.starting);
    }

    /// Moves the latch to `Resuming` and fires the resuming signal.
    pub fn resuming(&self) {
        self.apply(LatchState::Resuming, &self.inner.resuming);
    }

    /// Moves the latch to `Started` and fires the started signal.
    pub fn started(&self) {
        self.apply(LatchState::Started, &self.inner.started);
    }

    /// Moves the latch to `Active` and fires the active signal.
    pub fn active(&self) {
        self.apply(LatchState::Active, &self.inner.active);
    }

    /// Moves the latch to `Pausing` and fires the pausing signal.
    pub fn pausing(&self) {
        self.apply(LatchState::Pausing, &self.inner.pausing);
    }

    /// Moves the latch to `Paused` and fires the paused signal.
    pub fn paused(&self) {
        self.apply(LatchState::Paused, &self.inner.paused);
    }

    /// Moves the latch to `Stopping` and fires the stopping signal.
    pub fn stopping(&self) {
        self.apply(LatchState::Stopping, &self.inner.stopping);
    }

    /// Moves the latch to `Stopped` and fires the stopped signal.
    pub fn stopped(&self) {
        self.apply(LatchState::Stopped, &self.inner.stopped);
    }

    /// Returns a wait handle for the next `Starting` transition.
    pub fn notify_starting(&self) -> LatchWait {
        LatchWait::new(self.inner.starting.subscribe())
    }

    /// Returns a wait handle for the next `Resuming` transition.
    pub fn notify_resuming(&self) -> LatchWait {
        LatchWait::new(self.inner.resuming.subscribe())
    }

    /// Returns a wait handle for the next `Started` transition.
    pub fn notify_started(&self) -> LatchWait {
        LatchWait::new(self.inner.started.subscribe())
    }

    /// Returns a wait handle for the next `Active` transition.
    pub fn notify_active(&self) -> LatchWait {
        LatchWait::new(self.inner.active.subscribe())
    }

    /// Returns a wait handle for the next `Pausing` transition.
    pub fn notify_pausing(&self) -> LatchWait {
        LatchWait::new(self.inner.pausing.subscribe())
    }

    /// Returns a wait handle for the next `Paused` transition.
    pub fn notify_paused(&self) -> LatchWait {
        LatchWait::new(self.inner.paused.subscribe())
    }

    /// Returns a wait handle for the next `Stopping` transition.
    pub fn notify_stopping(&self) -> LatchWait {
        LatchWait::new(self.inner.stopping.subscribe())
    }

    /// Returns a wait handle for the next `Stopped` transition.
    pub fn notify_stopped(&self) -> LatchWait {
        LatchWait::new(self.inner.stopped.subscribe())
    }

    /// Moves `Stopped` to `Starting`, returning false from any other state.
    ///
    /// The precondition check and the fire happen in one critical section, so
    /// concurrent start attempts cannot both pass.
    pub fn try_starting(&self) -> bool {
        self.apply_from(LatchState::Stopped, LatchState::Starting, &self.inner.starting)
    }

    /// Moves `Started` to `Pausing`, returning false from any other state.
    pub fn try_pausing(&self) -> bool {
        self.apply_from(LatchState::Started, LatchState::Pausing, &self.inner.pausing)
    }

    /// Moves `Paused` to `Resuming`, returning false from any other state.
    pub fn try_resuming(&self) -> bool {
        self.apply_from(LatchState::Paused, LatchState::Resuming, &self.inner.resuming)
    }

    /// Moves `Started` to `Stopping`, returning false from any other state.
    pub fn try_stopping(&self) -> bool {
        self.apply_from(LatchState::Started, LatchState::Stopping, &self.inner.stopping)
    }

    /// Returns the latch to `Stopped` without firing any signal.
    ///
    /// Used when a component restarts after a full stop. Wait handles taken
    /// after the reset belong to the new generation and resolve on the next
    /// fire of their transition; handles still pending from the previous
    /// generation resolve at the same time.
    pub fn reset(&self) {
        let _guard = self.inner.transition.lock().unwrap();

        self.inner
            .state
            .store(LatchState::Stopped as u8, Ordering::SeqCst);
    }

    /// Applies a transition: no-op if already in `next`, otherwise stores the
    /// state and fires the signal, all inside the transition critical section.
    fn apply(&self, next: LatchState, signal: &watch::Sender<u64>) {
        let _guard = self.inner.transition.lock().unwrap();

        if self.state() == next {
            return;
        }

        self.inner.state.store(next as u8, Ordering::SeqCst);
        signal.send_modify(|generation| *generation += 1);
    }

    /// Applies a transition only from `from`, inside the same critical section
    /// as the fire, so exactly one of several concurrent callers wins.
    fn apply_from(&self, from: LatchState, next: LatchState, signal: &watch::Sender<u64>) -> bool {
        let _guard = self.inner.transition.lock().unwrap();

        if self.state() != from {
            return false;
        }

        self.inner.state.store(next as u8, Ordering::SeqCst);
        signal.send_modify(|generation| *generation += 1);

        true
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait handle for a single latch transition.
///
/// The handle remembers the signal generation at the time it was taken and
/// [`LatchWait::wait`] resolves once the transition fires after that point.
/// A handle taken after a fire waits for the next one. `wait` is cancel safe
/// and can be polled again across loop iterations, which is how dispatch
/// loops keep one pause handle and one stop handle armed while they process
/// work.
#[derive(Debug)]
pub struct LatchWait {
    rx: watch::Receiver<u64>,
    seen: u64,
}

impl LatchWait {
    fn new(rx: watch::Receiver<u64>) -> Self {
        let seen = *rx.borrow();

        Self { rx, seen }
    }

    /// Resolves once the transition has fired since this handle was taken.
    ///
    /// Each resolved wait consumes the fires seen so far, so the next call
    /// waits for a fresh fire. Rapid back-to-back fires between two waits
    /// coalesce into one resolution.
    pub async fn wait(&mut self) {
        let seen = self.seen;

        // A closed channel means the owning latch is gone; release the caller
        // in that case as well.
        if let Ok(generation) = self.rx.wait_for(|generation| *generation > seen).await {
            self.seen = *generation;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[test]
    fn starts_stopped_with_start_allowed() {
        let latch = Latch::new();

        assert_eq!(latch.state(), LatchState::Stopped);
        assert!(latch.can_start());
        assert!(!latch.can_pause());
        assert!(!latch.can_stop());
    }

    #[test]
    fn predicates_follow_transitions() {
        let latch = Latch::new();

        latch.starting();
        assert!(latch.is_starting());
        assert!(!latch.can_start());

        latch.started();
        assert!(latch.is_started());
        assert!(latch.can_pause());
        assert!(latch.can_stop());

        latch.stopping();
        assert!(latch.is_stopping());
        assert!(!latch.can_stop());

        latch.stopped();
        assert!(latch.is_stopped());
        assert!(latch.can_start());
    }

    #[test]
    fn reset_restores_start_permission() {
        let latch = Latch::new();

        latch.starting();
        latch.started();
        assert!(!latch.can_start());

        latch.reset();
        assert!(latch.is_stopped());
        assert!(latch.can_start());
    }

    #[tokio::test]
    async fn wait_resolves_after_fire() {
        let latch = Latch::new();
        let mut started = latch.notify_started();

        let fired = {
            let latch = latch.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                latch.starting();
                latch.started();
            })
        };

        started.wait().await;
        assert!(latch.is_started());

        fired.await.unwrap();
    }

    #[tokio::test]
    async fn repeated_transition_fires_once_per_generation() {
        let latch = Latch::new();

        latch.starting();
        let mut starting = latch.notify_starting();

        // Already in Starting, so these must not advance the generation.
        latch.starting();
        latch.starting();

        let waited =
            tokio::time::timeout(Duration::from_millis(50), starting.wait()).await;
        assert!(waited.is_err(), "no-op transitions must not fire the signal");

        // Leaving and re-entering the state fires a fresh generation.
        latch.started();
        latch.stopping();
        latch.stopped();
        latch.starting();

        tokio::time::timeout(Duration::from_millis(50), starting.wait())
            .await
            .expect("re-entering the state must fire the signal");
    }

    #[test]
    fn guarded_transitions_only_fire_from_their_precondition_state() {
        let latch = Latch::new();

        assert!(latch.try_starting());
        assert!(!latch.try_starting(), "second start attempt must lose");
        assert!(!latch.try_pausing(), "pause is only legal from started");

        latch.started();
        assert!(latch.try_pausing());
        assert!(!latch.try_stopping(), "stop is only legal from started");

        latch.paused();
        assert!(latch.try_resuming());

        latch.started();
        assert!(latch.try_stopping());
        assert!(latch.is_stopping());
    }

    #[tokio::test]
    async fn handle_resolves_once_per_fire_when_reused() {
        let latch = Latch::new();
        let mut stopping = latch.notify_stopping();

        latch.started();
        latch.stopping();
        tokio::time::timeout(Duration::from_millis(50), stopping.wait())
            .await
            .expect("first fire must resolve the handle");

        // The fire was consumed, so the handle waits again.
        let waited = tokio::time::timeout(Duration::from_millis(50), stopping.wait()).await;
        assert!(waited.is_err(), "handle must re-arm after a resolved wait");

        latch.stopped();
        latch.started();
        latch.stopping();
        tokio::time::timeout(Duration::from_millis(50), stopping.wait())
            .await
            .expect("second fire must resolve the re-armed handle");
    }

    #[tokio::test]
    async fn handle_taken_after_fire_waits_for_next_generation() {
        let latch = Latch::new();

        latch.pausing();
        let mut pausing = latch.notify_pausing();

        let waited = tokio::time::timeout(Duration::from_millis(50), pausing.wait()).await;
        assert!(waited.is_err(), "handle must wait for the next fire");

        latch.paused();
        latch.resuming();
        latch.started();
        latch.pausing();

        tokio::time::timeout(Duration::from_millis(50), pausing.wait())
            .await
            .expect("next pausing fire must resolve the handle");
    }
}
