use std::time::Duration;

use thiserror::Error;

/// Errors raised by the delivery pipeline outside of a single send attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Event log error: {0}")]
    EventLog(#[from] event_log::EventLogError),

    #[error("Registry error: {0}")]
    Registry(#[from] registry::RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Worker settings that cannot keep a send inside its lease.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called on a scheduler that is already running.
    #[error("Scheduler already started")]
    AlreadyStarted,

    /// Pipeline loops did not stop within the shutdown timeout.
    #[error("Shutdown timed out after {timeout:?}")]
    ShutdownTimeout { timeout: Duration },

    /// A pipeline loop panicked.
    #[error("Pipeline {pipeline} panicked: {error}")]
    PipelinePanic { pipeline: String, error: String },
}

/// Result type for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;
