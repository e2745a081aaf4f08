pub mod action;
pub mod autoflush;
pub mod batch;
pub mod config;
pub mod error;
pub mod future;
pub mod graceful;
pub mod interval;
pub mod latch;
pub mod macros;
pub mod metrics;
pub mod queue;
pub mod recover;
pub mod shutdown;
pub mod sink;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod trigger;
pub mod worker;
