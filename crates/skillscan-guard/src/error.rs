//! Error types for the install guard.
//!
//! [`GuardError`] is the failure taxonomy of one install request. Apart from
//! [`GuardError::LimitReached`], which the orchestrator recovers from through
//! billing, every variant ends the request with ABORT. [`ErrorKind`] is the
//! stable name logged next to the BLOCKED line.

use std::fmt;

use skillscan_api::ApiError;
use skillscan_store::StoreError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, GuardError>;

/// Everything that can stop an install request short of a decision.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// The service refused to issue a credential.
    #[error("registration failed: {reason}")]
    RegistrationFailed { reason: String },

    /// The skill could not be scanned (bad locator, unreachable source, non-402 error).
    #[error("scan failed: {reason}")]
    ScanFailed { reason: String },

    /// The plan has no scans left and no upgrade recovered it.
    #[error("scan limit reached")]
    LimitReached,

    /// The upgrade request itself was rejected.
    #[error("billing upgrade request failed: {reason}")]
    BillingRequestFailed { reason: String },

    /// Payment was not confirmed before the billing deadline.
    #[error("payment not confirmed within {waited_secs}s")]
    BillingTimeout { waited_secs: u64 },

    /// The verdict was out of range or could not be read.
    #[error("invalid verdict: {reason}")]
    InvalidVerdict { reason: String },

    /// Network-level failure talking to the service.
    #[error("transport error during {operation}: {reason}")]
    Transport {
        operation: &'static str,
        reason: String,
    },

    /// The service answered a read-only call with something unexpected.
    #[error(transparent)]
    Service(ApiError),

    /// Local state could not be read or written.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// The host cancelled the request.
    #[error("install request cancelled")]
    Cancelled,
}

impl GuardError {
    /// The taxonomy name of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RegistrationFailed { .. } => ErrorKind::RegistrationFailed,
            Self::ScanFailed { .. } => ErrorKind::ScanFailed,
            Self::LimitReached => ErrorKind::LimitReached,
            Self::BillingRequestFailed { .. } => ErrorKind::BillingRequestFailed,
            Self::BillingTimeout { .. } => ErrorKind::BillingTimeout,
            Self::InvalidVerdict { .. } => ErrorKind::InvalidVerdict,
            Self::Transport { .. } => ErrorKind::TransportError,
            Self::Service(_) => ErrorKind::ServiceError,
            Self::Store(_) => ErrorKind::StoreError,
            Self::Config { .. } => ErrorKind::ConfigError,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Wrap a client error raised by `operation`.
    pub(crate) fn from_api(operation: &'static str, err: ApiError) -> Self {
        match err {
            ApiError::RegistrationFailed { status, body } => Self::RegistrationFailed {
                reason: format!("HTTP {status}: {body}"),
            },
            ApiError::LimitReached => Self::LimitReached,
            ApiError::ScanFailed { status, reason } => Self::ScanFailed {
                reason: format!("HTTP {status}: {reason}"),
            },
            ApiError::InvalidSkillUrl { .. } => Self::ScanFailed {
                reason: err.to_string(),
            },
            ApiError::BillingRequestFailed { status, reason } => Self::BillingRequestFailed {
                reason: format!("HTTP {status}: {reason}"),
            },
            ApiError::Decode { operation: "scan", source } => Self::InvalidVerdict {
                reason: source.to_string(),
            },
            ApiError::Transport(source) => Self::Transport {
                operation,
                reason: source.to_string(),
            },
            other => Self::Service(other),
        }
    }
}

/// Stable, loggable name of a [`GuardError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RegistrationFailed,
    ScanFailed,
    LimitReached,
    BillingRequestFailed,
    BillingTimeout,
    InvalidVerdict,
    TransportError,
    ServiceError,
    StoreError,
    ConfigError,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegistrationFailed => "registration_failed",
            Self::ScanFailed => "scan_failed",
            Self::LimitReached => "limit_reached",
            Self::BillingRequestFailed => "billing_request_failed",
            Self::BillingTimeout => "billing_timeout",
            Self::InvalidVerdict => "invalid_verdict",
            Self::TransportError => "transport_error",
            Self::ServiceError => "service_error",
            Self::StoreError => "store_error",
            Self::ConfigError => "config_error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
