//! In-memory backends.
//!
//! Each store keeps its rows behind one mutex, so select-and-stamp is atomic
//! and a claim can never be handed to two workers.

mod destinations;
mod queue;

pub use destinations::InMemoryDestinationRegistry;
pub use queue::InMemoryQueueStore;
