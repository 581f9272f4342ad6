use std::time::Duration;

use thiserror::Error;

use crate::error::SdkError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetryPolicyError {
    #[error("max_attempts must be >= 1, got {0}")]
    BadMaxAttempts(u32),
    #[error("initial_delay must be > 0 and finite, got {0}")]
    BadInitialDelay(f64),
    #[error("backoff_factor must be >= 1.0, got {0}")]
    BadBackoffFactor(f64),
    #[error("max_delay ({max_delay}) must be >= initial_delay ({initial_delay})")]
    BadMaxDelay { max_delay: f64, initial_delay: f64 },
}

/// Exponential backoff schedule: `delays[i] = min(initial_delay * factor^i, max_delay)`
/// for `i` in `0 .. max_attempts - 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_factor: f64,
        max_delay: Duration,
    ) -> Result<Self, RetryPolicyError> {
        if max_attempts < 1 {
            return Err(RetryPolicyError::BadMaxAttempts(max_attempts));
        }
        let initial_secs = initial_delay.as_secs_f64();
        if !(initial_secs.is_finite() && initial_secs > 0.0) {
            return Err(RetryPolicyError::BadInitialDelay(initial_secs));
        }
        if !(backoff_factor >= 1.0) {
            return Err(RetryPolicyError::BadBackoffFactor(backoff_factor));
        }
        let max_secs = max_delay.as_secs_f64();
        if max_secs < initial_secs {
            return Err(RetryPolicyError::BadMaxDelay {
                max_delay: max_secs,
                initial_delay: initial_secs,
            });
        }
        Ok(RetryPolicy {
            max_attempts,
            initial_delay,
            backoff_factor,
            max_delay,
        })
    }

    /// The `max_attempts - 1` sleep durations between successive attempts.
    pub fn delays(&self) -> Vec<Duration> {
        let initial = self.initial_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        (0..self.max_attempts.saturating_sub(1))
            .map(|i| {
                let secs = (initial * self.backoff_factor.powi(i as i32)).min(max);
                Duration::from_secs_f64(secs)
            })
            .collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_secs(1), 2.0, Duration::from_secs(30)).unwrap()
    }
}

/// Run `op` under this retry policy. `TransportError`s are retried after the
/// computed delay; `ParserError`/`ProtocolError`/`DeviceError` fail fast.
/// `sleep` is injected so tests can run the schedule without wall-clock waits.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    mut sleep: impl FnMut(Duration),
    mut op: impl FnMut() -> Result<T, SdkError>,
) -> Result<T, SdkError> {
    let delays = policy.delays();
    let mut last_err = None;
    for attempt in 0..policy.max_attempts {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() => {
                last_err = Some(e);
                if let Some(delay) = delays.get(attempt as usize) {
                    sleep(*delay);
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.expect("retry loop always runs at least once"))
}
