// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Display, Formatter};

use recoverable::{Recovery, RecoveryInfo};
use thiserror::Error;

use crate::{Cancellation, Classification, Retryability};

/// Boxed error produced by code outside of the backend, e.g. a local encoding failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Status codes reported by the backend for a failed request.
///
/// The set is closed: codes the client does not recognize are reported through
/// [`BackendError::Unrecognized`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum StatusCode {
    /// The transaction was aborted before it applied any change, e.g. its locks were invalidated.
    Aborted,
    /// The backend is temporarily unable to serve the request.
    Unavailable,
    /// The backend rejected the request because it is overloaded.
    Overloaded,
    /// The session is no longer known to the backend.
    BadSession,
    /// The session outlived its lifetime on the backend.
    SessionExpired,
    /// The session is still executing a previous request.
    SessionBusy,
    /// The outcome of the request is unknown; it may or may not have been applied.
    Undetermined,
    /// The backend gave up waiting for the request to complete.
    Timeout,
    /// The backend cancelled the request.
    Cancelled,
    /// The backend failed with an internal error.
    InternalError,
    /// The request is malformed.
    BadRequest,
    /// The caller is not allowed to perform the request.
    Unauthorized,
    /// The request does not match the schema of the referenced objects.
    SchemeError,
    /// A precondition of the request does not hold.
    PreconditionFailed,
    /// A referenced object does not exist.
    NotFound,
    /// The object to create already exists.
    AlreadyExists,
    /// The request uses a feature the backend does not support.
    Unsupported,
    /// A generic failure without further details.
    GenericError,
}

impl StatusCode {
    /// Returns the numeric code reported in telemetry and used as the key of status overrides.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Aborted => 1010,
            Self::Unavailable => 1020,
            Self::Overloaded => 1030,
            Self::BadSession => 1040,
            Self::SessionExpired => 1050,
            Self::SessionBusy => 1060,
            Self::Undetermined => 2010,
            Self::Timeout => 2020,
            Self::Cancelled => 2030,
            Self::InternalError => 2040,
            Self::BadRequest => 3010,
            Self::Unauthorized => 3020,
            Self::SchemeError => 3030,
            Self::PreconditionFailed => 3040,
            Self::NotFound => 3050,
            Self::AlreadyExists => 3060,
            Self::Unsupported => 3070,
            Self::GenericError => 3080,
        }
    }

    /// Returns whether retrying a request that failed with this status can help.
    #[must_use]
    pub const fn retryability(self) -> Retryability {
        match self {
            Self::Aborted | Self::Unavailable | Self::Overloaded | Self::BadSession | Self::SessionExpired | Self::SessionBusy => {
                Retryability::Always
            }
            Self::Undetermined | Self::Timeout | Self::Cancelled | Self::InternalError => Retryability::IdempotentOnly,
            Self::BadRequest
            | Self::Unauthorized
            | Self::SchemeError
            | Self::PreconditionFailed
            | Self::NotFound
            | Self::AlreadyExists
            | Self::Unsupported
            | Self::GenericError => Retryability::Never,
        }
    }

    /// Returns `true` if the session that produced this status must not be reused.
    #[must_use]
    pub const fn invalidates_session(self) -> bool {
        matches!(self, Self::BadSession | Self::SessionExpired | Self::SessionBusy)
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Aborted => "aborted",
            Self::Unavailable => "unavailable",
            Self::Overloaded => "overloaded",
            Self::BadSession => "bad_session",
            Self::SessionExpired => "session_expired",
            Self::SessionBusy => "session_busy",
            Self::Undetermined => "undetermined",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::InternalError => "internal_error",
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::SchemeError => "scheme_error",
            Self::PreconditionFailed => "precondition_failed",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Unsupported => "unsupported",
            Self::GenericError => "generic_error",
        };

        f.write_str(name)
    }
}

impl From<StatusCode> for u32 {
    fn from(status: StatusCode) -> Self {
        status.code()
    }
}

/// Failures of the transport that carries requests to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TransportKind {
    /// The connection was severed while the request was in flight.
    ConnectionLost,
    /// No endpoint could be reached.
    Unavailable,
    /// The transport ran out of resources, e.g. a stream or message quota.
    ResourceExhausted,
    /// The transport deadline elapsed before a response arrived.
    DeadlineExceeded,
    /// The transport failed internally.
    Internal,
    /// The transport refused the caller's credentials.
    Unauthenticated,
}

impl TransportKind {
    /// Returns the numeric code reported in telemetry and used as the key of status overrides.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::ConnectionLost => 4010,
            Self::Unavailable => 4020,
            Self::ResourceExhausted => 4030,
            Self::DeadlineExceeded => 4040,
            Self::Internal => 4050,
            Self::Unauthenticated => 4060,
        }
    }

    /// Returns whether retrying a request that failed with this transport error can help.
    #[must_use]
    pub const fn retryability(self) -> Retryability {
        match self {
            Self::ConnectionLost | Self::Unavailable | Self::ResourceExhausted => Retryability::Always,
            Self::DeadlineExceeded | Self::Internal => Retryability::IdempotentOnly,
            Self::Unauthenticated => Retryability::Never,
        }
    }

    /// Returns `true` if the session bound to the failed connection must not be reused.
    #[must_use]
    pub const fn invalidates_session(self) -> bool {
        matches!(self, Self::ConnectionLost | Self::Unavailable | Self::DeadlineExceeded | Self::Internal)
    }
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ConnectionLost => "connection_lost",
            Self::Unavailable => "unavailable",
            Self::ResourceExhausted => "resource_exhausted",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Internal => "internal",
            Self::Unauthenticated => "unauthenticated",
        };

        f.write_str(name)
    }
}

/// An error that originated in the backend or in the transport leading to it.
///
/// # Examples
///
/// ```
/// use session_retry::{BackendError, Retryability, StatusCode};
///
/// let error = BackendError::status(StatusCode::SessionExpired, "session idle for too long");
///
/// assert_eq!(error.status_code(), 1050);
/// assert_eq!(error.retryability(), Retryability::Always);
/// assert!(error.invalidates_session());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// The backend processed the request and answered with a failure status.
    #[error("backend status {status} ({}): {message}", .status.code())]
    Status {
        /// The reported status.
        status: StatusCode,
        /// Issues reported alongside the status.
        message: String,
    },

    /// The request did not make it to the backend, or its response did not make it back.
    #[error("transport error {kind} ({}): {message}", .kind.code())]
    Transport {
        /// The kind of transport failure.
        kind: TransportKind,
        /// Details about the failure.
        message: String,
    },

    /// The backend answered with a status code this client does not know.
    #[error("unrecognized backend status ({code}): {message}")]
    Unrecognized {
        /// The raw status code.
        code: u32,
        /// Issues reported alongside the status.
        message: String,
    },
}

impl BackendError {
    /// Creates an error for a failure status reported by the backend.
    #[must_use]
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Creates an error for a transport failure.
    #[must_use]
    pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Creates an error for a status code this client does not know.
    #[must_use]
    pub fn unrecognized(code: u32, message: impl Into<String>) -> Self {
        Self::Unrecognized {
            code,
            message: message.into(),
        }
    }

    /// Returns the numeric status code carried by this error.
    #[must_use]
    pub fn status_code(&self) -> u32 {
        match self {
            Self::Status { status, .. } => status.code(),
            Self::Transport { kind, .. } => kind.code(),
            Self::Unrecognized { code, .. } => *code,
        }
    }

    /// Returns the built-in retryability of this error, before any configured override.
    #[must_use]
    pub fn retryability(&self) -> Retryability {
        match self {
            Self::Status { status, .. } => status.retryability(),
            Self::Transport { kind, .. } => kind.retryability(),
            Self::Unrecognized { .. } => Retryability::Never,
        }
    }

    /// Returns `true` if the session that produced this error must be discarded.
    #[must_use]
    pub fn invalidates_session(&self) -> bool {
        match self {
            Self::Status { status, .. } => status.invalidates_session(),
            Self::Transport { kind, .. } => kind.invalidates_session(),
            Self::Unrecognized { .. } => false,
        }
    }
}

impl Recovery for BackendError {
    fn recovery(&self) -> RecoveryInfo {
        match self.retryability() {
            Retryability::Always => RecoveryInfo::retry(),
            // Whether the request applied is unknown, so only the caller can decide.
            Retryability::IdempotentOnly => RecoveryInfo::unknown(),
            Retryability::Never => RecoveryInfo::never(),
        }
    }
}

/// The failure of a single attempt: acquiring a session or running the operation body.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AttemptError {
    /// The backend, or the transport leading to it, reported a failure.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The execution context was cancelled while the attempt was in progress.
    #[error("attempt cancelled: {0}")]
    Cancelled(#[from] Cancellation),

    /// A failure that did not involve the backend, e.g. encoding a parameter.
    #[error(transparent)]
    Local(BoxError),
}

impl AttemptError {
    /// Wraps an error that did not originate in the backend.
    #[must_use]
    pub fn local(error: impl Into<BoxError>) -> Self {
        Self::Local(error.into())
    }

    /// Returns `true` if the error originated in the backend or its transport.
    #[must_use]
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    /// Returns the backend error, if this is one.
    #[must_use]
    pub fn as_backend(&self) -> Option<&BackendError> {
        match self {
            Self::Backend(error) => Some(error),
            Self::Cancelled(_) | Self::Local(_) => None,
        }
    }
}

impl Recovery for AttemptError {
    fn recovery(&self) -> RecoveryInfo {
        match self {
            Self::Backend(error) => error.recovery(),
            Self::Cancelled(_) | Self::Local(_) => RecoveryInfo::never(),
        }
    }
}

/// Why a retry loop gave up while the failure was still retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exhaustion {
    /// The configured maximum number of attempts was reached.
    Attempts,
    /// Sleeping the next backoff would have exceeded the configured time budget.
    TimeBudget,
}

impl Display for Exhaustion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Attempts => f.write_str("attempt limit reached"),
            Self::TimeBudget => f.write_str("time budget exceeded"),
        }
    }
}

/// Discriminant of [`RetryError`], for callers that only need to branch on the kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryErrorKind {
    /// The failure can not be fixed by retrying.
    Permanent,
    /// The failure may have had a partial effect and the operation was not declared idempotent.
    NotIdempotent,
    /// The failure was retryable but the retry budget ran out.
    Exhausted,
    /// The execution context was cancelled or its deadline elapsed.
    Cancelled,
}

/// The terminal error of a retry loop.
///
/// Each variant carries the number of attempts made and, where an attempt failed, the
/// underlying error and its classification, so callers can decide on further action.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RetryError {
    /// The last attempt failed with an error that retrying can not fix.
    #[error("operation failed after {attempts} attempt(s): {source}")]
    Permanent {
        /// The error of the last attempt.
        source: AttemptError,
        /// The classification of `source`.
        classification: Classification,
        /// The number of attempts made.
        attempts: u32,
    },

    /// The last attempt may have applied partially; it was not retried because the
    /// operation is not idempotent.
    #[error("not retried: operation is not idempotent, effect of the failed attempt is uncertain: {source}")]
    NotIdempotent {
        /// The error of the last attempt.
        source: AttemptError,
        /// The classification of `source`.
        classification: Classification,
        /// The number of attempts made.
        attempts: u32,
    },

    /// Every attempt failed with a retryable error until the retry budget ran out.
    #[error("retries exhausted after {attempts} attempt(s), {reason}: {source}")]
    Exhausted {
        /// The error of the last attempt.
        source: AttemptError,
        /// The classification of `source`.
        classification: Classification,
        /// The number of attempts made.
        attempts: u32,
        /// Which budget ran out.
        reason: Exhaustion,
    },

    /// The execution context was cancelled or its deadline elapsed.
    #[error("retry loop cancelled after {attempts} attempt(s): {reason}")]
    Cancelled {
        /// What cancelled the loop.
        reason: Cancellation,
        /// The number of attempts made, including an interrupted one.
        attempts: u32,
        /// The error of the last failed attempt, if the loop was cancelled after one.
        last_error: Option<AttemptError>,
    },
}

impl RetryError {
    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> RetryErrorKind {
        match self {
            Self::Permanent { .. } => RetryErrorKind::Permanent,
            Self::NotIdempotent { .. } => RetryErrorKind::NotIdempotent,
            Self::Exhausted { .. } => RetryErrorKind::Exhausted,
            Self::Cancelled { .. } => RetryErrorKind::Cancelled,
        }
    }

    /// Returns the number of attempts made by the loop.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Permanent { attempts, .. }
            | Self::NotIdempotent { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Returns the error of the last failed attempt.
    #[must_use]
    pub fn last_error(&self) -> Option<&AttemptError> {
        match self {
            Self::Permanent { source, .. } | Self::NotIdempotent { source, .. } | Self::Exhausted { source, .. } => Some(source),
            Self::Cancelled { last_error, .. } => last_error.as_ref(),
        }
    }

    /// Returns the classification of the last failed attempt.
    ///
    /// Cancelled loops carry no classification: the cancellation, not the last error, ended them.
    #[must_use]
    pub fn classification(&self) -> Option<&Classification> {
        match self {
            Self::Permanent { classification, .. }
            | Self::NotIdempotent { classification, .. }
            | Self::Exhausted { classification, .. } => Some(classification),
            Self::Cancelled { .. } => None,
        }
    }

    /// Returns `true` if the last failed attempt originated in the backend.
    #[must_use]
    pub fn is_backend(&self) -> bool {
        self.last_error().is_some_and(AttemptError::is_backend)
    }
}

impl Recovery for RetryError {
    fn recovery(&self) -> RecoveryInfo {
        match self {
            Self::Permanent { .. } | Self::Cancelled { .. } => RecoveryInfo::never(),
            Self::NotIdempotent { .. } => RecoveryInfo::unknown(),
            Self::Exhausted { .. } => RecoveryInfo::unavailable(),
        }
    }
}
