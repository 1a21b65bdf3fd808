//! Error types for the SecurityScan API client.
//!
//! Every client operation surfaces errors through [`ApiError`]. Variants map
//! one-to-one onto the failure modes of the remote contract so the caller can
//! tell a recoverable scan limit apart from a fatal scan failure without
//! inspecting status codes.

/// Unified error type for the SecurityScan client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// `POST /auth/register/agent` returned a non-2xx status.
    #[error("registration failed: HTTP {status}: {body}")]
    RegistrationFailed {
        /// HTTP status returned by the service.
        status: u16,
        /// Raw response body, for diagnostics.
        body: String,
    },

    /// `POST /scan` returned 402: the plan has no scans left.
    #[error("scan limit reached for the current plan")]
    LimitReached,

    /// `POST /scan` returned a non-2xx status other than 402.
    #[error("scan failed: HTTP {status}: {reason}")]
    ScanFailed {
        /// HTTP status returned by the service.
        status: u16,
        /// Detail extracted from the response body.
        reason: String,
    },

    /// `POST /billing/upgrade` returned a non-2xx status.
    #[error("billing upgrade request failed: HTTP {status}: {reason}")]
    BillingRequestFailed {
        /// HTTP status returned by the service.
        status: u16,
        /// Detail extracted from the response body.
        reason: String,
    },

    /// A read-only endpoint (`/usage`, `/billing/status`, `/report`) returned
    /// an unexpected status.
    #[error("{operation} failed: HTTP {status}: {body}")]
    UnexpectedStatus {
        /// Which client operation failed.
        operation: &'static str,
        /// HTTP status returned by the service.
        status: u16,
        /// Raw response body, for diagnostics.
        body: String,
    },

    /// No public report exists for the requested skill.
    #[error("no public report for {skill}")]
    ReportNotFound {
        /// The skill URL that was looked up.
        skill: String,
    },

    /// The skill source locator could not be parsed as a URL.
    #[error("invalid skill url `{url}`: {reason}")]
    InvalidSkillUrl {
        /// The rejected input.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A 2xx response body did not match the documented shape.
    #[error("malformed {operation} response: {source}")]
    Decode {
        /// Which client operation produced the body.
        operation: &'static str,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {reason}")]
    ClientBuild {
        /// Why the builder failed.
        reason: String,
    },

    /// Network-level failure (connect, timeout, TLS, body read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ApiError {
    /// Whether this error is a transport-level failure rather than a
    /// structured response from the service.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_limit_reached() {
        assert_eq!(
            ApiError::LimitReached.to_string(),
            "scan limit reached for the current plan"
        );
    }

    #[test]
    fn error_display_scan_failed() {
        let err = ApiError::ScanFailed {
            status: 422,
            reason: "unreachable source".to_string(),
        };
        assert_eq!(err.to_string(), "scan failed: HTTP 422: unreachable source");
    }

    #[test]
    fn error_display_unexpected_status() {
        let err = ApiError::UnexpectedStatus {
            operation: "usage",
            status: 401,
            body: "Invalid API key".to_string(),
        };
        assert_eq!(err.to_string(), "usage failed: HTTP 401: Invalid API key");
    }

    #[test]
    fn error_display_client_build() {
        let err = ApiError::ClientBuild {
            reason: "no TLS backend".to_string(),
        };
        assert_eq!(err.to_string(), "failed to build HTTP client: no TLS backend");
    }

    #[test]
    fn structured_errors_are_not_transport() {
        assert!(!ApiError::LimitReached.is_transport());
        assert!(
            !ApiError::ReportNotFound {
                skill: "https://github.com/a/b".to_string()
            }
            .is_transport()
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ApiError>();
    }
}
