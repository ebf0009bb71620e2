// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::{AttemptError, BoxError};

/// Whether retrying a failed request can help, before the caller's idempotency is considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Retryability {
    /// The failure is transient and the request had no effect; retrying is always safe.
    Always,
    /// The request may have been applied; retrying is only safe for idempotent operations.
    IdempotentOnly,
    /// Retrying can not fix the failure.
    Never,
}

impl Retryability {
    /// Resolves the retryability for an operation with the given idempotency.
    #[must_use]
    pub const fn allows(self, idempotent: bool) -> bool {
        match self {
            Self::Always => true,
            Self::IdempotentOnly => idempotent,
            Self::Never => false,
        }
    }
}

/// The verdict on a failed attempt that drives retry decisions.
///
/// A classification is derived, never stored: [`ErrorClassifier::classify`] computes it for
/// each failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Classification {
    backend: bool,
    retryable: bool,
    retryability: Retryability,
    status_code: Option<u32>,
    discard_session: bool,
}

impl Classification {
    pub(crate) const fn backend(status_code: u32, retryability: Retryability, retryable: bool, discard_session: bool) -> Self {
        Self {
            backend: true,
            retryable,
            retryability,
            status_code: Some(status_code),
            discard_session,
        }
    }

    pub(crate) const fn local(retryability: Retryability, retryable: bool) -> Self {
        Self {
            backend: false,
            retryable,
            retryability,
            status_code: None,
            discard_session: false,
        }
    }

    /// Returns `true` if the failure originated in the backend or its transport.
    #[must_use]
    pub const fn is_backend_error(&self) -> bool {
        self.backend
    }

    /// Returns `true` if the failed attempt may be retried, given the idempotency of the operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Returns the effective retryability, after configured overrides were applied.
    #[must_use]
    pub const fn retryability(&self) -> Retryability {
        self.retryability
    }

    /// Returns `true` if the failure is retryable in principle but the operation's lack of
    /// idempotency forbids it.
    #[must_use]
    pub const fn blocked_by_idempotency(&self) -> bool {
        matches!(self.retryability, Retryability::IdempotentOnly) && !self.retryable
    }

    /// Returns the numeric status code of a backend failure.
    #[must_use]
    pub const fn status_code(&self) -> Option<u32> {
        self.status_code
    }

    /// Returns `true` if the session used by the failed attempt must be discarded.
    #[must_use]
    pub const fn must_discard_session(&self) -> bool {
        self.discard_session
    }
}

#[derive(Clone)]
struct RetryLocal(Arc<dyn Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync>);

impl Debug for RetryLocal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryLocal").finish()
    }
}

/// Maps attempt failures to [`Classification`]s.
///
/// Backend failures are classified by their status code. Configured overrides replace the
/// built-in retryability of a code: `true` makes it always retryable, `false` never. Session
/// discarding is not affected by overrides.
///
/// Failures that did not involve the backend are never retried unless a predicate registered
/// with [`retry_local_when`][Self::retry_local_when] accepts them. Cancellations are never retried.
///
/// # Examples
///
/// ```
/// use session_retry::{AttemptError, BackendError, ErrorClassifier, StatusCode};
///
/// let classifier = ErrorClassifier::new().retryable_status(StatusCode::Timeout, true);
/// let error = AttemptError::from(BackendError::status(StatusCode::Timeout, "slow"));
///
/// assert!(classifier.classify(&error, false).is_retryable());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    overrides: BTreeMap<u32, bool>,
    retry_local: Option<RetryLocal>,
}

impl ErrorClassifier {
    /// Creates a classifier that uses the built-in mapping of every status code.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the retryability of a status code.
    #[must_use]
    pub fn retryable_status(mut self, code: impl Into<u32>, retryable: bool) -> Self {
        self.overrides.insert(code.into(), retryable);
        self
    }

    /// Overrides the retryability of several status codes at once.
    #[must_use]
    pub fn status_overrides(mut self, overrides: impl IntoIterator<Item = (u32, bool)>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    /// Registers a predicate that marks matching local failures as retryable.
    #[must_use]
    pub fn retry_local_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&(dyn std::error::Error + 'static)) -> bool + Send + Sync + 'static,
    {
        self.retry_local = Some(RetryLocal(Arc::new(predicate)));
        self
    }

    /// Classifies a failed attempt of an operation with the given idempotency.
    #[must_use]
    pub fn classify(&self, error: &AttemptError, idempotent: bool) -> Classification {
        match error {
            AttemptError::Backend(backend) => {
                let code = backend.status_code();
                let retryability = match self.overrides.get(&code) {
                    Some(true) => Retryability::Always,
                    Some(false) => Retryability::Never,
                    None => backend.retryability(),
                };

                Classification::backend(code, retryability, retryability.allows(idempotent), backend.invalidates_session())
            }
            AttemptError::Local(local) => {
                let retryability = if self.retries_local(local) {
                    Retryability::Always
                } else {
                    Retryability::Never
                };

                Classification::local(retryability, retryability.allows(idempotent))
            }
            AttemptError::Cancelled(_) => Classification::local(Retryability::Never, false),
        }
    }

    fn retries_local(&self, error: &BoxError) -> bool {
        self.retry_local
            .as_ref()
            .is_some_and(|predicate| (predicate.0)(error.as_ref()))
    }
}
