//! Error types for the rota engine.

use chrono::NaiveDate;
use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Errors raised by a single (domain, date) generation pass.
///
/// Unresolved rotating tasks are *not* errors — they ride in the run summary.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The domain's catalog is malformed (fatal to this domain's run).
    #[error("Catalog inconsistency in domain {domain_id}: {reason}")]
    CatalogInconsistency { domain_id: Uuid, reason: String },

    /// Another generation pass for the same (domain, date) is in flight or
    /// already committed rows this pass raced against. Retryable.
    #[error("Concurrent generation for domain {domain_id} on {date}")]
    Conflict { domain_id: Uuid, date: NaiveDate },

    /// Storage failed mid-pass; the domain is left at its pre-run state.
    #[error("Storage failure: {0}")]
    Storage(#[from] DatabaseError),
}

impl GenerationError {
    /// Whether the batch driver should retry the whole pass.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::Conflict { .. })
    }
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
