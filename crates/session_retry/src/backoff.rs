// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::min;
use std::time::Duration;

use crate::constants::{DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF};
use crate::jitter::Jitter;

const EXPONENTIAL_FACTOR: f64 = 2.0;

/// Capped exponential backoff with proportional jitter.
///
/// The delay after the `n`-th failed attempt is `min(max, base * 2^(n - 1))` scaled by a uniform
/// random factor in `[0.5, 1.0)`. A delay therefore never exceeds `max`, and the first delay never
/// exceeds `base`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: Jitter,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF)
    }
}

impl Backoff {
    /// Creates a backoff schedule. A `max` below `base` is raised to `base`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: Jitter::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the base delay.
    #[must_use]
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Returns the upper bound of a single delay.
    #[must_use]
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Returns the upper bound of the delay after the given 1-based attempt, before jitter.
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        if self.base.is_zero() {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let grown = secs_to_duration_saturating(self.base.as_secs_f64() * EXPONENTIAL_FACTOR.powi(exponent));

        min(grown, self.max)
    }

    /// Returns the jittered delay to sleep after the given 1-based attempt failed.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }

        min(secs_to_duration_saturating(ceiling.as_secs_f64() * self.jitter.factor()), ceiling)
    }
}

fn secs_to_duration_saturating(secs: f64) -> Duration {
    if secs <= 0.0 {
        return Duration::ZERO;
    }

    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
