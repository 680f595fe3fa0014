//! Execution options attached to tasks, poll monitors and batches.
//!
//! All option types deserialize with defaults so a host can describe them in
//! JSON and leave out what it doesn't care about.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::FlowError;

/// Retry / timeout budget of a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteOption {
    /// Retries after the first attempt (`n` retries = `n + 1` attempts).
    pub max_retry: u32,

    /// Delay before a retry is submitted.
    pub retry_delay_ms: u64,

    /// Overall deadline for the task, armed at first submission. 0 = none.
    pub timeout_ms: u64,

    /// Multiplier applied to the retry delay on each further retry.
    /// 1.0 keeps the delay fixed.
    pub backoff_multiplier: f64,
}

impl ExecuteOption {
    pub fn new(max_retry: u32, retry_delay_ms: u64) -> Self {
        Self {
            max_retry,
            retry_delay_ms,
            ..Self::default()
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn has_timeout(&self) -> bool {
        self.timeout_ms > 0
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.has_timeout()
            .then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(FlowError::Config(format!(
                "backoff_multiplier must be a finite number >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

impl Default for ExecuteOption {
    fn default() -> Self {
        Self {
            max_retry: 0,
            retry_delay_ms: 0,
            timeout_ms: 0,
            backoff_multiplier: 1.0,
        }
    }
}

/// Polling cadence and poll-error budget of a poll-capable task.
///
/// The poll-retry budget is independent of the submit budget in
/// [`ExecuteOption`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorOption {
    pub monitor_interval_ms: u64,
    pub max_poll_retry: u32,
}

impl MonitorOption {
    pub fn new(monitor_interval_ms: u64, max_poll_retry: u32) -> Result<Self, FlowError> {
        let option = Self {
            monitor_interval_ms,
            max_poll_retry,
        };
        option.validate()?;
        Ok(option)
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.monitor_interval_ms == 0 {
            return Err(FlowError::Config(
                "monitor_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

impl Default for MonitorOption {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 1000,
            max_poll_retry: 0,
        }
    }
}

/// Fan-out limits for a batch of tasks run as one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOption {
    /// How many tasks of the batch may run at once. `None` = all of them.
    pub max_concurrency: Option<usize>,
}

impl BatchOption {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_concurrency(max_concurrency: usize) -> Result<Self, FlowError> {
        let option = Self {
            max_concurrency: Some(max_concurrency),
        };
        option.validate()?;
        Ok(option)
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.max_concurrency == Some(0) {
            return Err(FlowError::Config(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
