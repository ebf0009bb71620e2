// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
#[cfg(test)]
use std::sync::Arc;

use crate::constants::JITTER_FLOOR;

/// Scales backoff delays by a random factor so that loops failing together do not retry together.
///
/// Factors are uniform in `[JITTER_FLOOR, 1)`. Not cryptographically secure.
#[derive(Clone, Default)]
pub(crate) enum Jitter {
    #[default]
    Uniform,

    /// Draws samples in `[0, 1]` from a function; samples outside the range are clamped.
    #[cfg(test)]
    Sampled(Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl Debug for Jitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uniform => f.write_str("Uniform"),
            #[cfg(test)]
            Self::Sampled(_) => f.write_str("Sampled"),
        }
    }
}

impl Jitter {
    #[cfg(test)]
    pub fn fixed(sample: f64) -> Self {
        Self::Sampled(Arc::new(move || sample))
    }

    #[cfg(test)]
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self::Sampled(Arc::new(f))
    }

    /// Returns the factor to scale the next delay by.
    pub fn factor(&self) -> f64 {
        (1.0 - JITTER_FLOOR).mul_add(self.sample(), JITTER_FLOOR)
    }

    fn sample(&self) -> f64 {
        match self {
            Self::Uniform => fastrand::f64(),
            #[cfg(test)]
            Self::Sampled(sample) => sample().clamp(0.0, 1.0),
        }
    }
}
