//! Shared types for the outbound delivery subsystem.

pub mod clock;
pub mod erp;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use erp::{DocumentStatus, ErpOperation, ParseEnumError};
pub use types::{ClaimToken, DestinationId, DocumentId, QueueItemId};
