//! Reliable outbound delivery.
//!
//! One generic pipeline, [`DeliveryWorker`], drives both outbound flows:
//!
//! 1. claim due units from a [`WorkSource`] (a lease, never a blocking lock)
//! 2. prepare each unit's signed request
//! 3. send it through a [`Transport`](transport::Transport) under a timeout
//! 4. record the outcome, which also releases the claim
//!
//! [`WebhookSource`] turns a destination's cursor into ordered event batches;
//! [`ErpQueueSource`] turns queue items into ERP operation calls. The
//! [`Scheduler`] owns the background loops that call
//! [`DeliveryWorker::tick`] on an interval.

pub mod envelope;
pub mod error;
pub mod scheduler;
pub mod source;
pub mod sources;
pub mod worker;

pub use envelope::{EnvelopeEvent, ErpRequest, ErpRequestPayload, WebhookEnvelope};
pub use error::{DeliveryError, Result};
pub use scheduler::{Pipeline, Scheduler, SchedulerConfig, SchedulerHandle};
pub use source::{DeliveryUnit, WorkSource};
pub use sources::{ErpConnection, ErpQueueSource, WebhookSource};
pub use worker::{DeliveryWorker, TickReport, UnitOutcome, WorkerConfig, WorkerStats};
