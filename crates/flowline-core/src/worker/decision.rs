//! Retry decision: what a worker does after a failed submit or poll.
//!
//! Workers count failures and ask a [`RetryBudget`] for the next [`Decision`].
//! The budget is a pure function of the failure count, so the same type serves
//! both the submit phase and the poll phase with separate counters.

use std::time::Duration;

use crate::domain::{ExecuteOption, MonitorOption};

/// Upper bound for a computed backoff delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Which phase a failure belongs to; names the terminal message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Request,
    Poll,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Request => "request",
            Phase::Poll => "poll",
        }
    }
}

/// The next action after a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Try again after `delay`.
    Retry { delay: Duration, reason: String },

    /// Budget exhausted; deliver a terminal Failed result with `reason`.
    GiveUp { reason: String },
}

/// Retry budget of one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryBudget {
    phase: Phase,

    /// Retries allowed after the first attempt.
    pub max_retry: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for later retries.
    pub multiplier: f64,
}

impl RetryBudget {
    pub fn for_request(option: &ExecuteOption) -> Self {
        Self {
            phase: Phase::Request,
            max_retry: option.max_retry,
            base_delay: option.retry_delay(),
            multiplier: option.backoff_multiplier,
        }
    }

    /// Poll retries run on the regular poll cadence.
    pub fn for_poll(option: &MonitorOption) -> Self {
        Self {
            phase: Phase::Poll,
            max_retry: option.max_poll_retry,
            base_delay: option.interval(),
            multiplier: 1.0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Delay before the retry that follows the `failures`-th failure.
    ///
    /// `delay = base_delay * multiplier^(failures - 1)`
    ///
    /// With base 100ms and multiplier 2.0: 100ms, 200ms, 400ms, ...
    ///
    /// A multiplier below 1.0 or not finite counts as 1.0. Growth stops at
    /// [`MAX_RETRY_DELAY`], or at `base_delay` if that is larger.
    pub fn next_delay(&self, failures: u32) -> Duration {
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let cap = MAX_RETRY_DELAY.max(self.base_delay);
        let delay_secs = self.base_delay.as_secs_f64() * multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs).map_or(cap, |delay| delay.min(cap))
    }

    /// Decide after the `failures`-th failure of this phase (1-indexed).
    pub fn decide(&self, failures: u32, last_error: &str) -> Decision {
        if failures > self.max_retry {
            Decision::GiveUp {
                reason: format!(
                    "{} retry limit reached, last error: {}",
                    self.phase.as_str(),
                    last_error
                ),
            }
        } else {
            let delay = self.next_delay(failures);
            Decision::Retry {
                delay,
                reason: format!(
                    "{} retry {}/{} after {:?}: {}",
                    self.phase.as_str(),
                    failures,
                    self.max_retry,
                    delay,
                    last_error
                ),
            }
        }
    }
}
