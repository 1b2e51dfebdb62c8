//! Error types for Shepherd data-layer operations
//!
//! Classification happens on the stable `BackendErrorCode` carried by every
//! backend failure, never on human-readable message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes emitted by the backend service.
///
/// The backend guarantees these codes are stable across releases and
/// locales; the taxonomy below is derived from them alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendErrorCode {
    /// Backend unreachable or connection dropped mid-request.
    ConnectionFailed,

    /// Request exceeded the backend's deadline.
    Timeout,

    /// The session token is no longer valid.
    SessionExpired,

    /// Insert violated a unique constraint.
    DuplicateKey,

    /// Write referenced a row that does not exist.
    ForeignKeyViolation,

    /// Requested row does not exist.
    NotFound,

    /// Unclassified server-side failure (5xx-equivalent).
    Internal,
}

impl BackendErrorCode {
    /// Whether a request failing with this code may be retried as-is.
    ///
    /// Only transport-level failures qualify; everything else either needs
    /// a new session or a change to the request itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed | Self::Timeout)
    }
}

/// A structured failure from the backend service.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("[{code:?}] {message}")]
pub struct BackendError {
    pub code: BackendErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::ConnectionFailed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(BackendErrorCode::Timeout, message)
    }

    pub fn session_expired() -> Self {
        Self::new(BackendErrorCode::SessionExpired, "session expired")
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

/// Client-facing error taxonomy for the data layer.
///
/// `Connection` is the only retryable kind, and only the connection manager
/// retries it; stores surface everything unmodified.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataError {
    #[error("Backend unreachable: {reason}")]
    Connection { reason: String },

    #[error("Session expired; re-authentication required")]
    AuthExpired,

    #[error("Conflict ({code:?}): {reason}")]
    Conflict {
        code: BackendErrorCode,
        reason: String,
    },

    #[error("Data layer not initialized; call ConnectionManager::initialize first")]
    NotInitialized,

    #[error("Unexpected backend failure ({code:?}): {reason}")]
    Unknown {
        code: BackendErrorCode,
        reason: String,
    },
}

impl DataError {
    /// Whether the connection manager may transparently retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// True for errors the UI should treat as a data problem at the point
    /// of action (a failed optimistic write), not a connectivity banner.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<BackendError> for DataError {
    fn from(err: BackendError) -> Self {
        match err.code {
            BackendErrorCode::ConnectionFailed | BackendErrorCode::Timeout => {
                Self::Connection {
                    reason: err.message,
                }
            }
            BackendErrorCode::SessionExpired => Self::AuthExpired,
            BackendErrorCode::DuplicateKey | BackendErrorCode::ForeignKeyViolation => {
                Self::Conflict {
                    code: err.code,
                    reason: err.message,
                }
            }
            BackendErrorCode::NotFound | BackendErrorCode::Internal => Self::Unknown {
                code: err.code,
                reason: err.message,
            },
        }
    }
}

/// Result type alias for data-layer operations.
pub type DataResult<T> = Result<T, DataError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_codes() {
        assert!(BackendErrorCode::ConnectionFailed.is_retryable());
        assert!(BackendErrorCode::Timeout.is_retryable());
        assert!(!BackendErrorCode::SessionExpired.is_retryable());
        assert!(!BackendErrorCode::DuplicateKey.is_retryable());
        assert!(!BackendErrorCode::ForeignKeyViolation.is_retryable());
        assert!(!BackendErrorCode::Internal.is_retryable());
    }

    #[test]
    fn test_classification_by_code_not_message() {
        // A misleading message must not change classification.
        let err = BackendError::new(BackendErrorCode::DuplicateKey, "connection reset");
        let classified = DataError::from(err);
        assert!(matches!(classified, DataError::Conflict { .. }));
        assert!(!classified.is_retryable());
    }

    #[test]
    fn test_connection_errors_are_retryable() {
        let classified = DataError::from(BackendError::timeout("deadline exceeded"));
        assert!(classified.is_retryable());

        let classified = DataError::from(BackendError::connection("refused"));
        assert!(matches!(classified, DataError::Connection { .. }));
    }

    #[test]
    fn test_session_expiry_maps_to_auth_expired() {
        let classified = DataError::from(BackendError::session_expired());
        assert_eq!(classified, DataError::AuthExpired);
        assert!(!classified.is_retryable());
    }

    #[test]
    fn test_conflict_display_carries_code() {
        let err = DataError::Conflict {
            code: BackendErrorCode::ForeignKeyViolation,
            reason: "journey does not exist".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("ForeignKeyViolation"));
        assert!(msg.contains("journey does not exist"));
        assert!(err.is_conflict());
    }

    #[test]
    fn test_backend_error_code_serde_screaming_snake() {
        let json = serde_json::to_string(&BackendErrorCode::ForeignKeyViolation).unwrap();
        assert_eq!(json, "\"FOREIGN_KEY_VIOLATION\"");
    }
}
