use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::sleep;

use crate::action::{FlushHandler, TriggerAction, WorkAction};
use crate::bail;
use crate::error::{CrewResult, ErrorKind};
use crate::test_utils::notify::TimedNotify;

type ItemsCondition<T> = Box<dyn Fn(&[T]) -> bool + Send + Sync>;
type BatchesCondition<T> = Box<dyn Fn(&[Vec<T>]) -> bool + Send + Sync>;
type FiresCondition = Box<dyn Fn(usize) -> bool + Send + Sync>;

struct RecordingInner<T> {
    items: Vec<T>,
    conditions: Vec<(ItemsCondition<T>, Arc<Notify>)>,
}

impl<T> RecordingInner<T> {
    fn check_conditions(&mut self) {
        let items = &self.items;
        self.conditions.retain(|(condition, notify)| {
            let satisfied = condition(items);
            if satisfied {
                notify.notify_one();
            }
            !satisfied
        });
    }
}

/// Work action that records every item it was applied to.
///
/// All clones share the same recording, so a test can hand one clone to a
/// worker and keep another for assertions. Conditions registered through the
/// wait methods are re-checked after every recorded item.
pub struct RecordingAction<T> {
    inner: Arc<Mutex<RecordingInner<T>>>,
    delay: Option<Duration>,
}

impl<T> Clone for RecordingAction<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            delay: self.delay,
        }
    }
}

impl<T> fmt::Debug for RecordingAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingAction")
            .field("recorded", &self.inner.lock().unwrap().items.len())
            .finish_non_exhaustive()
    }
}

impl<T> Default for RecordingAction<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecordingAction<T> {
    /// Creates a new recording action.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecordingInner {
                items: Vec::new(),
                conditions: Vec::new(),
            })),
            delay: None,
        }
    }

    /// Sleeps for `delay` before recording each item.
    ///
    /// Lets tests keep a worker busy long enough to observe mid-flight
    /// states like drains and pauses.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Records one item directly.
    ///
    /// Lets closure actions share the recording state while adding their
    /// own behavior around it.
    pub fn record(&self, item: T) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.push(item);
        inner.check_conditions();
    }

    /// Returns a snapshot of all recorded items.
    pub fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.inner.lock().unwrap().items.clone()
    }

    /// Returns a wait handle that resolves once the condition holds.
    ///
    /// The condition is checked immediately and after every recorded item.
    pub fn wait_for<F>(&self, condition: F) -> TimedNotify
    where
        F: Fn(&[T]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());

        let mut inner = self.inner.lock().unwrap();
        if condition(&inner.items) {
            notify.notify_one();
        } else {
            inner
                .conditions
                .push((Box::new(condition), Arc::clone(&notify)));
        }

        TimedNotify::new(notify)
    }

    /// Returns a wait handle that resolves once `count` items were recorded.
    pub fn wait_for_count(&self, count: usize) -> TimedNotify {
        self.wait_for(move |items| items.len() >= count)
    }
}

impl<T> WorkAction<T> for RecordingAction<T>
where
    T: Send + 'static,
{
    async fn apply(&self, item: T) -> CrewResult<()> {
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }

        self.record(item);

        Ok(())
    }
}

struct RecordingHandlerInner<T> {
    batches: Vec<Vec<T>>,
    conditions: Vec<(BatchesCondition<T>, Arc<Notify>)>,
}

impl<T> RecordingHandlerInner<T> {
    fn check_conditions(&mut self) {
        let batches = &self.batches;
        self.conditions.retain(|(condition, notify)| {
            let satisfied = condition(batches);
            if satisfied {
                notify.notify_one();
            }
            !satisfied
        });
    }
}

/// Flush handler that records every batch it was handed.
///
/// All clones share the same recording. Batches are kept in flush order
/// with their item order intact.
pub struct RecordingHandler<T> {
    inner: Arc<Mutex<RecordingHandlerInner<T>>>,
}

impl<T> Clone for RecordingHandler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for RecordingHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingHandler")
            .field("batches", &self.inner.lock().unwrap().batches.len())
            .finish_non_exhaustive()
    }
}

impl<T> Default for RecordingHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecordingHandler<T> {
    /// Creates a new recording handler.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RecordingHandlerInner {
                batches: Vec::new(),
                conditions: Vec::new(),
            })),
        }
    }

    /// Returns a snapshot of all recorded batches.
    pub fn batches(&self) -> Vec<Vec<T>>
    where
        T: Clone,
    {
        self.inner.lock().unwrap().batches.clone()
    }

    /// Returns the total number of items across all recorded batches.
    pub fn total_items(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .batches
            .iter()
            .map(Vec::len)
            .sum()
    }

    /// Returns a wait handle that resolves once the condition holds.
    pub fn wait_for<F>(&self, condition: F) -> TimedNotify
    where
        F: Fn(&[Vec<T>]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());

        let mut inner = self.inner.lock().unwrap();
        if condition(&inner.batches) {
            notify.notify_one();
        } else {
            inner
                .conditions
                .push((Box::new(condition), Arc::clone(&notify)));
        }

        TimedNotify::new(notify)
    }

    /// Returns a wait handle that resolves once `count` batches arrived.
    pub fn wait_for_batches(&self, count: usize) -> TimedNotify {
        self.wait_for(move |batches| batches.len() >= count)
    }

    /// Returns a wait handle that resolves once `count` items arrived
    /// across all batches.
    pub fn wait_for_total_items(&self, count: usize) -> TimedNotify {
        self.wait_for(move |batches| batches.iter().map(Vec::len).sum::<usize>() >= count)
    }
}

impl<T> FlushHandler<T> for RecordingHandler<T>
where
    T: Send + 'static,
{
    async fn flush(&self, items: Vec<T>) -> CrewResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.batches.push(items);
        inner.check_conditions();

        Ok(())
    }
}

struct CountingTriggerInner {
    fires: usize,
    conditions: Vec<(FiresCondition, Arc<Notify>)>,
}

impl CountingTriggerInner {
    fn check_conditions(&mut self) {
        let fires = self.fires;
        self.conditions.retain(|(condition, notify)| {
            let satisfied = condition(fires);
            if satisfied {
                notify.notify_one();
            }
            !satisfied
        });
    }
}

/// Trigger action that counts how many times it fired.
#[derive(Clone)]
pub struct CountingTrigger {
    inner: Arc<Mutex<CountingTriggerInner>>,
}

impl fmt::Debug for CountingTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingTrigger")
            .field("fires", &self.fires())
            .finish_non_exhaustive()
    }
}

impl Default for CountingTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl CountingTrigger {
    /// Creates a new counting trigger.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(CountingTriggerInner {
                fires: 0,
                conditions: Vec::new(),
            })),
        }
    }

    /// Returns the number of fires so far.
    pub fn fires(&self) -> usize {
        self.inner.lock().unwrap().fires
    }

    /// Returns a wait handle that resolves once `count` fires happened.
    pub fn wait_for_fires(&self, count: usize) -> TimedNotify {
        let notify = Arc::new(Notify::new());

        let mut inner = self.inner.lock().unwrap();
        if inner.fires >= count {
            notify.notify_one();
        } else {
            inner
                .conditions
                .push((Box::new(move |fires| fires >= count), Arc::clone(&notify)));
        }

        TimedNotify::new(notify)
    }
}

impl TriggerAction for CountingTrigger {
    async fn fire(&self) -> CrewResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.fires += 1;
        inner.check_conditions();

        Ok(())
    }
}

/// Work action that fails every item with [`ErrorKind::ActionFailed`].
#[derive(Debug, Clone)]
pub struct FailingAction {
    description: &'static str,
}

impl FailingAction {
    /// Creates a failing action with the given error description.
    pub fn new(description: &'static str) -> Self {
        Self { description }
    }
}

impl<T> WorkAction<T> for FailingAction
where
    T: Send + 'static,
{
    async fn apply(&self, _item: T) -> CrewResult<()> {
        bail!(ErrorKind::ActionFailed, self.description);
    }
}

/// Work action that panics on every item.
///
/// Exercises the panic boundary: components survive the panic and convert
/// it into an [`ErrorKind::ActionPanic`] error.
#[derive(Debug, Clone)]
pub struct PanickingAction {
    message: &'static str,
}

impl PanickingAction {
    /// Creates a panicking action with the given panic message.
    pub fn new(message: &'static str) -> Self {
        Self { message }
    }
}

impl<T> WorkAction<T> for PanickingAction
where
    T: Send + 'static,
{
    async fn apply(&self, _item: T) -> CrewResult<()> {
        panic!("{}", self.message);
    }
}
