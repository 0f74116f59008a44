//! Append-only event log with gapless per-category sequences.
//!
//! Producers append domain events; delivery workers read them back strictly
//! after a destination's cursor. Two backends share the [`EventLog`] trait:
//! [`InMemoryEventLog`] and [`PostgresEventLog`].

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use error::{EventLogError, Result};
pub use event::{Event, NewEvent, Sequence};
pub use memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;
pub use query::EventSelector;
pub use store::{EventLog, EventLogExt};
