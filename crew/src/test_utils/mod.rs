//! Testing utilities for latch-governed components.
//!
//! Lifecycle tests are timing-sensitive by nature: a worker is started on
//! one task and observed from another. The utilities here keep those tests
//! deterministic instead of sleep-based:
//!
//! 1. **Recording seams**: [`actions::RecordingAction`],
//!    [`actions::RecordingHandler`] and [`actions::CountingTrigger`] capture
//!    everything a component fed them, shared across clones.
//! 2. **Condition waits**: tests wait on registered conditions
//!    ("5 items recorded") rather than sleeping and hoping.
//! 3. **Fail-fast timeouts**: every wait goes through
//!    [`notify::TimedNotify`], so a wait on an unreachable condition fails
//!    the test with a message instead of hanging the suite.
//!
//! Failure injection is covered by [`actions::FailingAction`] and
//! [`actions::PanickingAction`] for the error-forwarding and panic-recovery
//! paths. [`lifecycle::spawn_started`] handles the spawn-and-wait dance that
//! every test starting a component would otherwise repeat.

pub mod actions;
pub mod lifecycle;
pub mod notify;
