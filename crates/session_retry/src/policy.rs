// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use crate::{Backoff, Classification, RetryOptions, Retryability};

/// The outcome of [`RetryPolicy::should_continue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Sleep for `delay`, then make another attempt.
    Retry {
        /// How long to wait before the next attempt.
        delay: Duration,
    },
    /// End the loop with the last failure.
    Stop(StopReason),
}

/// Why [`RetryPolicy`] ended a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// The execution context was cancelled.
    Cancelled,
    /// Retrying can not fix the failure.
    NotRetryable,
    /// The failure is only retryable for idempotent operations and the operation is not idempotent.
    NotIdempotent,
    /// The maximum number of attempts was made.
    AttemptsExhausted,
    /// Waiting for the next attempt would exceed the time budget.
    TimeBudgetExhausted,
}

/// Decides whether a failed attempt is followed by another one, and after what delay.
///
/// The policy is stateless: every decision depends only on its inputs and the configuration,
/// so a single policy serves any number of concurrent loops.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use session_retry::{AttemptError, BackendError, Decision, ErrorClassifier, RetryOptions, RetryPolicy, StatusCode, StopReason};
///
/// let policy = RetryPolicy::new(&RetryOptions::new().max_attempts(3));
/// let error = AttemptError::from(BackendError::status(StatusCode::Overloaded, "busy"));
/// let classification = ErrorClassifier::new().classify(&error, false);
///
/// assert!(matches!(
///     policy.should_continue(&classification, false, 1, Duration::ZERO, false),
///     Decision::Retry { .. }
/// ));
/// assert_eq!(
///     policy.should_continue(&classification, false, 3, Duration::ZERO, false),
///     Decision::Stop(StopReason::AttemptsExhausted)
/// );
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    max_elapsed: Option<Duration>,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryOptions::default())
    }
}

impl RetryPolicy {
    /// Creates a policy from the attempt limit, backoff and time budget of `options`.
    #[must_use]
    pub fn new(options: &RetryOptions) -> Self {
        Self {
            max_attempts: options.get_max_attempts(),
            max_elapsed: options.get_max_elapsed(),
            backoff: Backoff::new(options.get_base_backoff(), options.get_max_backoff()),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the maximum number of attempts per loop.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the backoff schedule.
    #[must_use]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Decides how to proceed after the 1-based `attempt` failed.
    ///
    /// The checks run in order: cancellation, retryability of the failure for an operation with
    /// the given idempotency, the attempt limit, and finally the time budget, which is exceeded
    /// when `elapsed` plus the next backoff delay would cross it.
    #[must_use]
    pub fn should_continue(
        &self,
        classification: &Classification,
        idempotent: bool,
        attempt: u32,
        elapsed: Duration,
        cancelled: bool,
    ) -> Decision {
        if cancelled {
            return Decision::Stop(StopReason::Cancelled);
        }

        let retryability = classification.retryability();
        if !retryability.allows(idempotent) {
            return Decision::Stop(if retryability == Retryability::IdempotentOnly {
                StopReason::NotIdempotent
            } else {
                StopReason::NotRetryable
            });
        }

        if attempt >= self.max_attempts {
            return Decision::Stop(StopReason::AttemptsExhausted);
        }

        let delay = self.backoff.delay(attempt);
        match self.max_elapsed {
            Some(budget) if elapsed.saturating_add(delay) > budget => Decision::Stop(StopReason::TimeBudgetExhausted),
            _ => Decision::Retry { delay },
        }
    }
}
