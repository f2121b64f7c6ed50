// Retry/backoff policy for the request executor
//
// Classification is kept separate from the HTTP loop so the policy can be
// driven with synthetic outcome sequences.

use rand::Rng;
use std::time::Duration;

/// What happened on one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The server answered with a non-success status
    Status(u16),
    /// Connection could not be established; the request never left
    ConnectFailed,
    /// No response within the timeout; the server may have the request
    TimedOut,
    /// Any other transport error after the connection was made
    Transport,
}

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retryable,
    Reauthenticate,
    Fatal,
}

/// Next step for the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry(Duration),
    Reauthenticate,
    Fail,
}

/// Exponential backoff with an attempt ceiling
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for retryable failures, first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    /// Add up to 10% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy without delays, for tests and fail-fast callers
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            factor: 1,
            jitter: false,
        }
    }

    /// Classify a failed attempt
    ///
    /// Non-idempotent requests are retried only when the connection was never
    /// established. A 5xx or a timeout means the server may have acted on it.
    pub fn classify(&self, outcome: AttemptOutcome, idempotent: bool) -> Verdict {
        match outcome {
            AttemptOutcome::ConnectFailed => Verdict::Retryable,
            AttemptOutcome::TimedOut | AttemptOutcome::Transport => {
                if idempotent {
                    Verdict::Retryable
                } else {
                    Verdict::Fatal
                }
            }
            AttemptOutcome::Status(401) => Verdict::Reauthenticate,
            AttemptOutcome::Status(500..=599) if idempotent => Verdict::Retryable,
            AttemptOutcome::Status(_) => Verdict::Fatal,
        }
    }

    /// Decide the next step after `attempts_made` backoff-counted attempts
    pub fn decide(
        &self,
        outcome: AttemptOutcome,
        idempotent: bool,
        attempts_made: u32,
        already_reauthenticated: bool,
    ) -> Decision {
        match self.classify(outcome, idempotent) {
            Verdict::Reauthenticate if !already_reauthenticated => Decision::Reauthenticate,
            Verdict::Retryable if attempts_made < self.max_attempts => {
                Decision::Retry(self.backoff_delay(attempts_made.saturating_sub(1)))
            }
            _ => Decision::Fail,
        }
    }

    /// Delay before retry number `retry` (0-based): base * factor^retry
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let multiplier = self.factor.saturating_pow(retry);
        let delay = self.base_delay.saturating_mul(multiplier);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let max_jitter_ms = (delay.as_millis() / 10) as u64;
        let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
        delay + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replay outcomes through the policy the way the executor does.
    /// Returns the number of requests sent and whether the final one was reached by a
    /// retry decision (true) or by Fail (false).
    fn replay(
        policy: &RetryPolicy,
        outcomes: &[AttemptOutcome],
        idempotent: bool,
    ) -> (usize, bool) {
        let mut attempts = 0u32;
        let mut sent = 0usize;
        let mut reauthed = false;

        for outcome in outcomes {
            sent += 1;
            attempts += 1;
            match policy.decide(*outcome, idempotent, attempts, reauthed) {
                Decision::Retry(_) => continue,
                Decision::Reauthenticate => {
                    reauthed = true;
                    attempts -= 1;
                    continue;
                }
                Decision::Fail => return (sent, false),
            }
        }
        (sent, true)
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = RetryPolicy::default();

        let delay0 = policy.backoff_delay(0).as_millis();
        let delay1 = policy.backoff_delay(1).as_millis();
        let delay2 = policy.backoff_delay(2).as_millis();

        // Each delay should be roughly double the previous (with jitter)
        assert!((1000..=1100).contains(&delay0));
        assert!((2000..=2200).contains(&delay1));
        assert!((4000..=4400).contains(&delay2));
    }

    #[test]
    fn test_backoff_without_jitter_is_exact() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_server_errors_stop_at_ceiling() {
        let policy = RetryPolicy::immediate(3);
        let outcomes = [AttemptOutcome::Status(503); 10];
        let (sent, _) = replay(&policy, &outcomes, true);
        assert_eq!(sent, 3);
    }

    #[test]
    fn test_client_errors_never_retried() {
        let policy = RetryPolicy::immediate(3);
        for status in [400, 403, 404, 409, 429] {
            let (sent, _) = replay(&policy, &[AttemptOutcome::Status(status); 3], true);
            assert_eq!(sent, 1, "status {} must not be retried", status);
        }
    }

    #[test]
    fn test_single_reauth_then_unauthorized() {
        let policy = RetryPolicy::immediate(3);
        let outcomes = [AttemptOutcome::Status(401); 5];
        let (sent, _) = replay(&policy, &outcomes, true);
        assert_eq!(sent, 2);
    }

    #[test]
    fn test_reauth_does_not_consume_attempt() {
        let policy = RetryPolicy::immediate(3);
        let outcomes = [
            AttemptOutcome::Status(401),
            AttemptOutcome::Status(500),
            AttemptOutcome::Status(500),
            AttemptOutcome::Status(500),
            AttemptOutcome::Status(500),
        ];
        let (sent, _) = replay(&policy, &outcomes, true);
        assert_eq!(sent, 4);
    }

    #[test]
    fn test_non_idempotent_only_retried_on_connect_failure() {
        let policy = RetryPolicy::immediate(3);

        assert_eq!(
            policy.classify(AttemptOutcome::ConnectFailed, false),
            Verdict::Retryable
        );
        assert_eq!(policy.classify(AttemptOutcome::TimedOut, false), Verdict::Fatal);
        assert_eq!(policy.classify(AttemptOutcome::Transport, false), Verdict::Fatal);
        assert_eq!(policy.classify(AttemptOutcome::Status(502), false), Verdict::Fatal);

        let (sent, _) = replay(&policy, &[AttemptOutcome::ConnectFailed; 5], false);
        assert_eq!(sent, 3);
        let (sent, _) = replay(&policy, &[AttemptOutcome::TimedOut; 5], false);
        assert_eq!(sent, 1);
    }

    #[test]
    fn test_idempotent_retries_timeouts() {
        let policy = RetryPolicy::immediate(3);
        assert_eq!(policy.classify(AttemptOutcome::TimedOut, true), Verdict::Retryable);
        let (sent, _) = replay(
            &policy,
            &[AttemptOutcome::TimedOut, AttemptOutcome::Transport],
            true,
        );
        assert_eq!(sent, 2);
    }

    #[test]
    fn test_single_attempt_policy() {
        let policy = RetryPolicy::immediate(1);
        let (sent, _) = replay(&policy, &[AttemptOutcome::Status(500); 3], true);
        assert_eq!(sent, 1);
    }
}
