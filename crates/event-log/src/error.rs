use thiserror::Error;

/// Errors that can occur when interacting with the event log.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// The caller passed an argument the log cannot act on.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for event log operations.
pub type Result<T> = std::result::Result<T, EventLogError>;
