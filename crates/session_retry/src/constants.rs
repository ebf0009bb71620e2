// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

/// Default number of attempts per retry loop, the first attempt included.
///
/// Four attempts ride out a session being invalidated and a short burst of
/// overload without holding a caller for long.
pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default delay before the first retry.
pub(crate) const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Default upper bound of a single backoff delay.
pub(crate) const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Default time budget of a retry loop: none, only the attempt limit applies.
pub(crate) const DEFAULT_MAX_ELAPSED: Option<Duration> = None;

/// Lower bound of the jitter multiplier applied to each backoff delay.
///
/// Delays are scaled by a uniform value in `[JITTER_FLOOR, 1.0)`.
pub(crate) const JITTER_FLOOR: f64 = 0.5;

/// Name used by [`StructuredLogger`][crate::StructuredLogger] when none is configured.
pub(crate) const DEFAULT_LOGGER_NAME: &str = "retry";
