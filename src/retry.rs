use std::time::Duration;

use tracing::debug;

use crate::error::{CaptureError, CaptureResult};

/// Bounded fixed-delay retry policy.
///
/// Used for both session recovery (reopen after the platform invalidates
/// the duplication) and for re-polling short acquire timeouts.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one.
    pub delay: Duration,
    /// Which errors are worth another attempt.
    pub retry_on: fn(&CaptureError) -> bool,
}

impl RetryPolicy {
    pub const DEFAULT_RECOVERY_ATTEMPTS: u32 = 10;
    pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_millis(250);
    pub const DEFAULT_TIMEOUT_ATTEMPTS: u32 = 4;

    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            retry_on: CaptureError::is_retryable,
        }
    }

    /// Reopen policy after a lost session: 10 attempts, 250 ms apart.
    /// Only errors that say "not yet" are retried; a missing output or
    /// device fails the recovery straight away.
    pub fn session_recovery() -> Self {
        Self {
            retry_on: recoverable_while_reopening,
            ..Self::new(Self::DEFAULT_RECOVERY_ATTEMPTS, Self::DEFAULT_RECOVERY_DELAY)
        }
    }

    /// Acquire re-poll policy: 4 immediate attempts on timeout.
    pub fn acquire_timeouts() -> Self {
        Self {
            retry_on: |error| matches!(error, CaptureError::Timeout),
            ..Self::new(Self::DEFAULT_TIMEOUT_ATTEMPTS, Duration::ZERO)
        }
    }

    pub fn with_predicate(mut self, retry_on: fn(&CaptureError) -> bool) -> Self {
        self.retry_on = retry_on;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn should_retry(&self, error: &CaptureError) -> bool {
        (self.retry_on)(error)
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    /// The last error is returned when every attempt fails.
    pub fn run<T>(&self, mut op: impl FnMut(u32) -> CaptureResult<T>) -> CaptureResult<T> {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(error) if attempt < attempts && self.should_retry(&error) => {
                    debug!(attempt, attempts, %error, "retrying after failed attempt");
                    if !self.delay.is_zero() {
                        std::thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::session_recovery()
    }
}

/// While a mode change or secure-desktop switch is in flight, reopening
/// the duplication reports the output as unavailable or the session as
/// lost again; both clear up on their own.
fn recoverable_while_reopening(error: &CaptureError) -> bool {
    matches!(
        error,
        CaptureError::SessionLost | CaptureError::OutputUnavailable(_) | CaptureError::Timeout
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[test]
    fn stops_at_first_success() -> CaptureResult<()> {
        let mut calls = 0;
        let value = instant_policy(5).run(|attempt| {
            calls += 1;
            if attempt < 3 {
                Err(CaptureError::Timeout)
            } else {
                Ok(attempt)
            }
        })?;
        assert_eq!(value, 3);
        assert_eq!(calls, 3);
        Ok(())
    }

    #[test]
    fn returns_last_error_when_budget_is_spent() {
        let mut calls = 0;
        let result: CaptureResult<()> = instant_policy(4).run(|_| {
            calls += 1;
            Err(CaptureError::SessionLost)
        });
        assert!(matches!(result, Err(CaptureError::SessionLost)));
        assert_eq!(calls, 4);
    }

    #[test]
    fn non_retryable_errors_short_circuit() {
        let mut calls = 0;
        let result: CaptureResult<()> = instant_policy(10).run(|_| {
            calls += 1;
            Err(CaptureError::DeviceUnavailable("no driver".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn recovery_policy_retries_busy_outputs() {
        let policy = RetryPolicy::session_recovery();
        assert!(policy.should_retry(&CaptureError::OutputUnavailable("busy".into())));
        assert!(!policy.should_retry(&CaptureError::DeviceUnavailable("gone".into())));
        assert_eq!(policy.attempts(), 10);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let mut calls = 0;
        let _ = instant_policy(0).run(|_| -> CaptureResult<()> {
            calls += 1;
            Err(CaptureError::Timeout)
        });
        assert_eq!(calls, 1);
    }
}
