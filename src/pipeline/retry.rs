//! Per-call retry state machine.
//!
//! ```text
//! Pending -> (attempt) -> Ok
//!                      -> Retrying(n) -> (attempt) -> ...
//!                      -> Failed
//! ```
//!
//! Unavailable errors back off exponentially until `max_retries` is spent.
//! A malformed response is retried once, immediately; a second one fails the
//! call whatever budget is left.

use std::time::Duration;

use crate::backend::BackendError;

/// Retry budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based): base doubled per retry, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    Pending,
    /// Retry number `retry` is scheduled after `delay`.
    Retrying { retry: u32, delay: Duration },
    Ok,
    Failed,
}

/// Tracks attempts for a single input.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    attempts: u32,
    malformed_retried: bool,
    state: CallState,
    last_error: Option<BackendError>,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            malformed_retried: false,
            state: CallState::Pending,
            last_error: None,
        }
    }

    /// Count a new attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn on_success(&mut self) -> &CallState {
        self.state = CallState::Ok;
        &self.state
    }

    pub fn on_error(&mut self, error: BackendError) -> &CallState {
        let budget_left = self.attempts < self.policy.max_attempts();
        let retry = self.attempts;

        self.state = match &error {
            _ if !budget_left => CallState::Failed,
            BackendError::Unavailable { .. } => CallState::Retrying {
                retry,
                delay: self.policy.backoff(retry),
            },
            BackendError::MalformedResponse { .. } if !self.malformed_retried => {
                self.malformed_retried = true;
                CallState::Retrying {
                    retry,
                    delay: Duration::ZERO,
                }
            }
            BackendError::MalformedResponse { .. } => CallState::Failed,
        };
        self.last_error = Some(error);
        &self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    pub fn last_error(&self) -> Option<&BackendError> {
        self.last_error.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        }
    }

    fn unavailable() -> BackendError {
        BackendError::unavailable("connection refused")
    }

    fn malformed() -> BackendError {
        BackendError::malformed("not json")
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
        assert_eq!(p.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_unavailable_then_success() {
        let mut machine = RetryMachine::new(policy(1));
        assert_eq!(machine.state(), &CallState::Pending);

        machine.begin_attempt();
        assert_eq!(
            machine.on_error(unavailable()),
            &CallState::Retrying {
                retry: 1,
                delay: Duration::from_millis(100)
            }
        );

        machine.begin_attempt();
        assert_eq!(machine.on_success(), &CallState::Ok);
        assert_eq!(machine.attempts(), 2);
    }

    #[test]
    fn test_unavailable_exhausts_budget() {
        let mut machine = RetryMachine::new(policy(2));
        for _ in 0..2 {
            machine.begin_attempt();
            assert!(matches!(
                machine.on_error(unavailable()),
                CallState::Retrying { .. }
            ));
        }
        machine.begin_attempt();
        assert_eq!(machine.on_error(unavailable()), &CallState::Failed);
        assert_eq!(machine.attempts(), 3);
        assert!(machine.last_error().is_some_and(|e| e.is_transient()));
    }

    #[test]
    fn test_malformed_retries_once_immediately() {
        let mut machine = RetryMachine::new(policy(2));
        machine.begin_attempt();
        assert_eq!(
            machine.on_error(malformed()),
            &CallState::Retrying {
                retry: 1,
                delay: Duration::ZERO
            }
        );
        machine.begin_attempt();
        assert_eq!(machine.on_error(malformed()), &CallState::Failed);
        assert_eq!(machine.attempts(), 2);
    }

    #[test]
    fn test_malformed_with_no_retries() {
        let mut machine = RetryMachine::new(policy(0));
        machine.begin_attempt();
        assert_eq!(machine.on_error(malformed()), &CallState::Failed);
        assert_eq!(machine.attempts(), 1);
    }

    #[test]
    fn test_mixed_errors_share_budget() {
        let mut machine = RetryMachine::new(policy(3));
        machine.begin_attempt();
        assert!(matches!(machine.on_error(malformed()), CallState::Retrying { .. }));
        machine.begin_attempt();
        assert!(matches!(machine.on_error(unavailable()), CallState::Retrying { .. }));
        machine.begin_attempt();
        assert_eq!(machine.on_error(malformed()), &CallState::Failed);
        assert_eq!(machine.attempts(), 3);
    }
}
