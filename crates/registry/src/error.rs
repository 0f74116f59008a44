use thiserror::Error;

/// Errors that can occur when interacting with the registry or queue store.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested destination or queue item does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The claim's lease was taken over by another worker; nothing was written.
    #[error("Claim lost for {id}")]
    ClaimLost { id: String },

    /// The operation is not allowed from the item's current state.
    #[error("Invalid transition for {id}: {reason}")]
    InvalidTransition { id: String, reason: String },

    /// The caller passed an argument the store cannot act on.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A stored row could not be mapped back into a domain value.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    pub(crate) fn destination_not_found(id: impl ToString) -> Self {
        RegistryError::NotFound {
            kind: "Destination",
            id: id.to_string(),
        }
    }

    pub(crate) fn queue_item_not_found(id: impl ToString) -> Self {
        RegistryError::NotFound {
            kind: "Queue item",
            id: id.to_string(),
        }
    }

    pub(crate) fn claim_lost(id: impl ToString) -> Self {
        RegistryError::ClaimLost { id: id.to_string() }
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
