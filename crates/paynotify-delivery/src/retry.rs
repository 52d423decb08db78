//! Exponential backoff with upward-only jitter.
//!
//! The pre-jitter delay after attempt `n` (0-based) is
//! `min(initial_delay * backoff_factor^n, max_delay)`. Jitter then adds half
//! of a uniform draw from `[0, base/4)`, so the final delay always lies in
//! `[base, base * 1.125)` and never drops below the unjittered value.

use std::time::Duration;

use rand::Rng;

use crate::error::{DeliveryError, FailureClass};

/// Retry parameters taken from the delivery policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts (including initial attempt).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum pre-jitter delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
}

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resubmit after `delay` with the attempt counter incremented.
    Retry {
        /// Attempt index the resubmitted job will carry
        next_attempt: u32,
        /// Jittered delay before resubmission
        delay: Duration,
    },
    /// The job is terminal.
    GiveUp {
        /// Error the job's callback receives
        error: DeliveryError,
    },
}

impl RetryPolicy {
    /// Pre-jitter delay after the given 0-based attempt.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);

        // Compare in floating point so huge exponents saturate instead of overflowing.
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        Duration::from_secs_f64(scaled).min(self.max_delay)
    }

    /// Jittered delay after the given 0-based attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        apply_jitter(self.base_delay(attempt))
    }

    /// Decides whether a job whose attempt `attempt` just failed with `error`
    /// gets another try.
    ///
    /// Fatal errors end the job at any attempt. Retryable errors are retried
    /// while `attempt + 1 < max_attempts`; after that the job ends with
    /// [`DeliveryError::RetriesExhausted`].
    pub fn decide(&self, attempt: u32, error: DeliveryError) -> RetryDecision {
        if error.classify() == FailureClass::Fatal {
            return RetryDecision::GiveUp { error };
        }

        let attempts_made = attempt.saturating_add(1);
        if attempts_made >= self.max_attempts {
            return RetryDecision::GiveUp {
                error: DeliveryError::RetriesExhausted { attempts: attempts_made },
            };
        }

        RetryDecision::Retry { next_attempt: attempts_made, delay: self.delay_for(attempt) }
    }
}

/// Adds `u/2` to `base`, where `u` is drawn uniformly from `[0, base/4)`.
///
/// Returns `base` unchanged when it is too small to jitter.
pub fn apply_jitter(base: Duration) -> Duration {
    let quarter = base.as_nanos() / 4;
    let Ok(quarter) = u64::try_from(quarter) else {
        return base;
    };
    if quarter == 0 {
        return base;
    }

    let u = rand::rng().random_range(0..quarter);
    base.saturating_add(Duration::from_nanos(u / 2))
}
