//! Configuration types for coordination components.
//!
//! Each component takes its own config struct. All fields have serde defaults
//! so partial deserialization works, and every config exposes a `validate`
//! method that components call before allocating resources on start.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field value violates its constraint.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}

/// Returns the number of CPUs available to the process, with a floor of one.
fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|parallelism| parallelism.get())
        .unwrap_or(1)
}

/// Configuration for a single work-item worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Maximum number of enqueued items before `enqueue` exerts backpressure.
    #[serde(default = "default_worker_max_work")]
    pub max_work: usize,
}

impl WorkerConfig {
    /// Default work queue capacity. One slot makes enqueue a handoff.
    pub const DEFAULT_MAX_WORK: usize = 1;

    /// Validates worker configuration settings.
    ///
    /// Ensures max_work is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_work == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "worker.max_work".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_work: default_worker_max_work(),
        }
    }
}

/// Configuration for a parallel work queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Number of workers processing items concurrently.
    #[serde(default = "default_queue_parallelism")]
    pub parallelism: usize,
    /// Maximum number of enqueued items before `enqueue` exerts backpressure.
    #[serde(default = "default_queue_max_work")]
    pub max_work: usize,
}

impl QueueConfig {
    /// Default maximum number of queued items.
    pub const DEFAULT_MAX_WORK: usize = 1024;

    /// Validates queue configuration settings.
    ///
    /// Ensures parallelism and max_work are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.parallelism == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "queue.parallelism".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.max_work == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "queue.max_work".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            parallelism: default_queue_parallelism(),
            max_work: default_queue_max_work(),
        }
    }
}

/// Configuration for a one-shot batch fan-out.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Number of workers processing the batch concurrently.
    #[serde(default = "default_batch_parallelism")]
    pub parallelism: usize,
}

impl BatchConfig {
    /// Validates batch configuration settings.
    ///
    /// Ensures parallelism is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.parallelism == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.parallelism".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            parallelism: default_batch_parallelism(),
        }
    }
}

/// Configuration for an autoflushing buffer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BufferConfig {
    /// Number of buffered items that triggers a synchronous flush on add.
    #[serde(default = "default_buffer_max_len")]
    pub max_len: usize,
    /// Maximum time, in milliseconds, items sit in the buffer before a
    /// background flush.
    #[serde(default = "default_buffer_interval_ms")]
    pub interval_ms: u64,
    /// Whether remaining items are flushed when the buffer stops.
    #[serde(default = "default_buffer_flush_on_stop")]
    pub flush_on_stop: bool,
}

impl BufferConfig {
    /// Default flush threshold.
    pub const DEFAULT_MAX_LEN: usize = 1024;

    /// Default background flush interval in milliseconds.
    pub const DEFAULT_INTERVAL_MS: u64 = 500;

    /// Validates buffer configuration settings.
    ///
    /// Ensures max_len and interval_ms are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_len == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "buffer.max_len".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "buffer.interval_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_len: default_buffer_max_len(),
            interval_ms: default_buffer_interval_ms(),
            flush_on_stop: default_buffer_flush_on_stop(),
        }
    }
}

/// Configuration for a periodic interval runner.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IntervalConfig {
    /// Time, in milliseconds, between action invocations.
    #[serde(default = "default_interval_period_ms")]
    pub period_ms: u64,
    /// Delay, in milliseconds, before the first invocation. Zero means the
    /// first invocation waits one full period.
    #[serde(default = "default_interval_delay_ms")]
    pub delay_ms: u64,
}

impl IntervalConfig {
    /// Default invocation period in milliseconds.
    pub const DEFAULT_PERIOD_MS: u64 = 500;

    /// Default startup delay in milliseconds.
    pub const DEFAULT_DELAY_MS: u64 = 0;

    /// Validates interval configuration settings.
    ///
    /// Ensures period_ms is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.period_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "interval.period_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            period_ms: default_interval_period_ms(),
            delay_ms: default_interval_delay_ms(),
        }
    }
}

/// Configuration for a count-based automatic trigger.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TriggerConfig {
    /// Number of recorded increments that fires the action.
    #[serde(default = "default_trigger_max_count")]
    pub max_count: u64,
    /// Optional time, in milliseconds, between periodic background fires.
    /// Periodic fires do not reset the increment counter.
    #[serde(default)]
    pub period_ms: Option<u64>,
    /// Whether the action fires one final time when the trigger stops.
    #[serde(default = "default_trigger_on_stop")]
    pub trigger_on_stop: bool,
}

impl TriggerConfig {
    /// Default increment threshold.
    pub const DEFAULT_MAX_COUNT: u64 = 1024;

    /// Validates trigger configuration settings.
    ///
    /// Ensures max_count is non-zero and period_ms, when set, is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_count == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "trigger.max_count".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.period_ms == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "trigger.period_ms".to_string(),
                constraint: "must be greater than 0 when set".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            max_count: default_trigger_max_count(),
            period_ms: None,
            trigger_on_stop: default_trigger_on_stop(),
        }
    }
}

fn default_worker_max_work() -> usize {
    WorkerConfig::DEFAULT_MAX_WORK
}

fn default_queue_parallelism() -> usize {
    available_cpus()
}

fn default_queue_max_work() -> usize {
    QueueConfig::DEFAULT_MAX_WORK
}

fn default_batch_parallelism() -> usize {
    available_cpus()
}

fn default_buffer_max_len() -> usize {
    BufferConfig::DEFAULT_MAX_LEN
}

fn default_buffer_interval_ms() -> u64 {
    BufferConfig::DEFAULT_INTERVAL_MS
}

fn default_buffer_flush_on_stop() -> bool {
    true
}

fn default_interval_period_ms() -> u64 {
    IntervalConfig::DEFAULT_PERIOD_MS
}

fn default_interval_delay_ms() -> u64 {
    IntervalConfig::DEFAULT_DELAY_MS
}

fn default_trigger_max_count() -> u64 {
    TriggerConfig::DEFAULT_MAX_COUNT
}

fn default_trigger_on_stop() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_work, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_worker_zero_max_work() {
        let config = WorkerConfig { max_work: 0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_queue_config() {
        let config = QueueConfig::default();
        assert!(config.parallelism >= 1);
        assert_eq!(config.max_work, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_queue_zero_parallelism() {
        let config = QueueConfig {
            parallelism: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_batch_zero_parallelism() {
        let config = BatchConfig { parallelism: 0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_buffer_config() {
        let config = BufferConfig::default();
        assert_eq!(config.max_len, 1024);
        assert_eq!(config.interval_ms, 500);
        assert!(config.flush_on_stop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_buffer_zero_interval() {
        let config = BufferConfig {
            interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_interval_zero_period() {
        let config = IntervalConfig {
            period_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_trigger_config() {
        let config = TriggerConfig::default();
        assert_eq!(config.max_count, 1024);
        assert_eq!(config.period_ms, None);
        assert!(config.trigger_on_stop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_trigger_zero_period() {
        let config = TriggerConfig {
            period_ms: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: BufferConfig = serde_json::from_str(r#"{"max_len": 16}"#)
            .expect("partial config must deserialize");
        assert_eq!(config.max_len, 16);
        assert_eq!(config.interval_ms, BufferConfig::DEFAULT_INTERVAL_MS);
        assert!(config.flush_on_stop);
    }
}
