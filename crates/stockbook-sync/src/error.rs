//! # Sync Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Local store   │  │     Remote (server)     │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Database(..)   │  │  Unreachable  → retry   │ │
//! │  │  MissingDeviceId│  │  Serialization  │  │  Rejected     → operator│ │
//! │  │  ConfigLoad/Save│  │                 │  │  Internal     → retry   │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`RemoteError`] is what crosses the [`SyncServer`](crate::server::SyncServer)
//! boundary. Its split between "will retry" and "needs a person" decides the
//! state a queue item lands in.

use stockbook_core::{CoreError, ErrorKind, ValidationError};
use stockbook_db::DbError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// The local database refused the operation (including business rules
    /// checked against the mirror, such as an offline oversell).
    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    #[error(transparent)]
    Remote(#[from] RemoteError),

    // =========================================================================
    // Agent Errors
    // =========================================================================
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        SyncError::Database(DbError::Domain(err))
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Database(DbError::from(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl SyncError {
    /// Machine-distinguishable kind, when the failure has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            SyncError::Database(err) => Some(err.kind()),
            SyncError::Remote(err) => err.kind(),
            _ => None,
        }
    }

    /// True when a later attempt may succeed without anyone intervening.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(err) => err.is_retryable(),
            SyncError::Database(err) => !err.kind().is_business_rule(),
            SyncError::ChannelError(_) => true,
            _ => false,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

// =============================================================================
// Remote Error
// =============================================================================

/// A failure reported by (or on the way to) the server.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// The server could not be reached. Nothing was applied.
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    /// The server evaluated the intent and refused it.
    ///
    /// ## When This Occurs
    /// - A replayed sale oversells at the server (`OutOfStock`)
    /// - Approving a change someone already resolved (`NotPending`)
    /// - A product deleted or unknown at the server (`NotFound`)
    #[error("Rejected ({kind}): {message}")]
    Rejected { kind: ErrorKind, message: String },

    /// The server failed for a reason unrelated to the intent (busy,
    /// sequence contention, storage trouble).
    #[error("Server error: {0}")]
    Internal(String),
}

impl RemoteError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RemoteError::Rejected { kind, .. } => Some(*kind),
            RemoteError::Internal(_) => Some(ErrorKind::Internal),
            RemoteError::Unreachable(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, RemoteError::Rejected { .. })
    }
}

/// Server-side engine errors, classified for the client.
impl From<DbError> for RemoteError {
    fn from(err: DbError) -> Self {
        let kind = err.kind();
        if kind.is_business_rule() {
            RemoteError::Rejected {
                kind,
                message: err.to_string(),
            }
        } else {
            RemoteError::Internal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_errors_classify_by_kind() {
        let oversell = DbError::from(CoreError::OutOfStock {
            item: "Cola".into(),
            available: 10,
            requested: 12,
        });
        let remote = RemoteError::from(oversell);
        assert_eq!(remote.kind(), Some(ErrorKind::OutOfStock));
        assert!(!remote.is_retryable());
        assert!(remote.to_string().contains("available 10"));

        let busy = RemoteError::from(DbError::Busy("database is locked".into()));
        assert_eq!(busy, RemoteError::Internal("Database busy: database is locked".into()));
        assert!(busy.is_retryable());

        let missing = RemoteError::from(DbError::not_found("Transfer", 9));
        assert_eq!(missing.kind(), Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::from(RemoteError::Unreachable("timeout".into())).is_retryable());
        assert!(SyncError::from(RemoteError::Internal("busy".into())).is_retryable());
        assert!(!SyncError::from(RemoteError::Rejected {
            kind: ErrorKind::NotPending,
            message: "approved".into(),
        })
        .is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(SyncError::MissingDeviceId.is_config_error());
    }
}
