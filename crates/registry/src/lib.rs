//! Destination registry and ERP queue store.
//!
//! Both stores hand out work as leases: a claim stamps a random token and an
//! expiry, and every write made on behalf of a claim is conditional on that
//! token. Two backends implement each trait: in-memory (mutex-guarded
//! select-and-stamp) and PostgreSQL (`FOR UPDATE SKIP LOCKED`).

pub mod backoff;
pub mod destination;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod queue;

pub use backoff::BackoffPolicy;
pub use destination::{
    Destination, DestinationClaim, DestinationPolicy, DestinationRegistry, NewDestination,
};
pub use error::{RegistryError, Result};
pub use memory::{InMemoryDestinationRegistry, InMemoryQueueStore};
pub use postgres::{PostgresDestinationRegistry, PostgresQueueStore, run_migrations};
pub use queue::{NewQueueItem, QueueClaim, QueueItem, QueuePolicy, QueueReceipt, QueueStatus, QueueStore};
