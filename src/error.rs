//! Unified error hierarchy for RecoveryRS
//!
//! Only genuine failures (storage, I/O, unreadable snapshots) surface as errors.
//! Missing biometric or activity data is modelled as `Option::None` at the
//! component boundary, and degenerate calculations fall back to documented
//! defaults instead of failing.

use thiserror::Error;

/// Top-level error type for all RecoveryRS operations
#[derive(Debug, Error)]
pub enum RecoveryRsError {
    /// Persistence collaborator errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Biometric or activity provider errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors for the cooldown store
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored row could not be mapped back to a value
    #[error("Corrupted record in {table}: {reason}")]
    Corrupted { table: String, reason: String },

    /// Store lock was poisoned by a panicking writer
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Errors reported by external data collaborators
///
/// These never abort scoring: the engine logs them and treats the source
/// as having returned nothing.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Platform refused access to the data
    #[error("Authorization denied by {source_name}")]
    AuthorizationDenied { source_name: String },

    /// Source is temporarily unreachable
    #[error("Source {source_name} unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    /// Source returned data that could not be decoded
    #[error("Malformed data from {source_name}: {reason}")]
    Malformed { source_name: String, reason: String },
}

/// Result type alias for RecoveryRS operations
pub type Result<T> = std::result::Result<T, RecoveryRsError>;

impl RecoveryRsError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RecoveryRsError::Provider(ProviderError::Unavailable { .. })
                | RecoveryRsError::Database(DatabaseError::Unavailable { .. })
                | RecoveryRsError::Io(_)
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RecoveryRsError::Provider(_) => ErrorSeverity::Warning,
            RecoveryRsError::Database(_) | RecoveryRsError::Io(_) => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RecoveryRsError::Provider(ProviderError::AuthorizationDenied { source_name }) => {
                format!(
                    "Access to {} was denied. Scores will use the data that is available.",
                    source_name
                )
            }
            RecoveryRsError::Provider(ProviderError::Malformed { source_name, .. }) => {
                format!(
                    "Could not read {}. Check that it is a valid JSON data snapshot.",
                    source_name
                )
            }
            RecoveryRsError::Database(DatabaseError::Sqlite(_)) => {
                "Unable to read or save recovery state. Please check the database path."
                    .to_string()
            }
            RecoveryRsError::Database(DatabaseError::Corrupted { table, .. }) => {
                format!(
                    "Saved recovery state in {} is damaged. Remove the database to start fresh.",
                    table
                )
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Error that prevents the operation
    Error,
    /// Warning that doesn't prevent operation
    Warning,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
        }
    }
}
