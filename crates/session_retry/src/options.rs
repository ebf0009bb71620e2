// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::constants::{DEFAULT_BASE_BACKOFF, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_ELAPSED};

/// Configuration of a [`Retrier`][crate::Retrier].
///
/// Setters normalize invalid values instead of failing: the attempt limit is at least one and the
/// maximum backoff is never below the base backoff.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use session_retry::{RetryOptions, StatusCode};
///
/// let options = RetryOptions::new()
///     .max_attempts(5)
///     .base_backoff(Duration::from_millis(50))
///     .max_backoff(Duration::from_secs(2))
///     .retryable_status(StatusCode::Timeout, true);
///
/// assert_eq!(options.get_max_attempts(), 5);
/// assert_eq!(options.get_retryable_status(StatusCode::Timeout), Some(true));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryOptions {
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    max_elapsed: Option<Duration>,
    retryable_status_overrides: BTreeMap<u32, bool>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_elapsed: DEFAULT_MAX_ELAPSED,
            retryable_status_overrides: BTreeMap::new(),
        }
    }
}

impl RetryOptions {
    /// Creates options with the default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of attempts per loop, the first attempt included.
    ///
    /// Zero is treated as one.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self.max_backoff = self.max_backoff.max(base_backoff);
        self
    }

    /// Sets the upper bound of a single backoff delay.
    #[must_use]
    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff.max(self.base_backoff);
        self
    }

    /// Sets the time budget of a loop. A retry whose backoff would cross the budget is not started.
    #[must_use]
    pub fn max_elapsed(mut self, max_elapsed: impl Into<Option<Duration>>) -> Self {
        self.max_elapsed = max_elapsed.into();
        self
    }

    /// Overrides the built-in retryability of a status code.
    #[must_use]
    pub fn retryable_status(mut self, code: impl Into<u32>, retryable: bool) -> Self {
        self.retryable_status_overrides.insert(code.into(), retryable);
        self
    }

    /// Returns the maximum number of attempts per loop.
    #[must_use]
    pub fn get_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Returns the delay before the first retry.
    #[must_use]
    pub fn get_base_backoff(&self) -> Duration {
        self.base_backoff
    }

    /// Returns the upper bound of a single backoff delay.
    #[must_use]
    pub fn get_max_backoff(&self) -> Duration {
        self.max_backoff.max(self.base_backoff)
    }

    /// Returns the time budget of a loop, if any.
    #[must_use]
    pub fn get_max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed
    }

    /// Returns the override configured for a status code, if any.
    #[must_use]
    pub fn get_retryable_status(&self, code: impl Into<u32>) -> Option<bool> {
        self.retryable_status_overrides.get(&code.into()).copied()
    }

    /// Returns all status code overrides.
    #[must_use]
    pub fn get_retryable_status_overrides(&self) -> &BTreeMap<u32, bool> {
        &self.retryable_status_overrides
    }
}
