use async_trait::async_trait;
use event_log::Sequence;
use transport::{OutboundRequest, Receipt, TransportError};

use crate::Result;

/// One prepared send: the signed request plus what to record on success.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryUnit {
    pub request: OutboundRequest,
    /// Number of events (or documents) the request carries.
    pub event_count: usize,
    /// Cursor to record once the receiver accepts the request.
    pub advance_to: Option<Sequence>,
}

/// The pipeline-specific half of a [`DeliveryWorker`](crate::DeliveryWorker).
///
/// A source hands out claims, turns a claim into a [`DeliveryUnit`], and
/// records the outcome. Recording an outcome (or releasing) ends the claim.
#[async_trait]
pub trait WorkSource: Send + Sync {
    /// Lease on one unit of work.
    type Claim: Send + Sync;

    /// Pipeline name used in logs, metrics and the scheduler.
    fn pipeline(&self) -> &str;

    /// Identifier of the claimed destination or item, for logs.
    fn unit_id(&self, claim: &Self::Claim) -> String;

    /// Atomically claims up to `limit` due units.
    async fn claim_due(&self, limit: usize) -> Result<Vec<Self::Claim>>;

    /// Builds the request for a claim, or `None` when there is nothing to send.
    async fn prepare(&self, claim: &Self::Claim) -> Result<Option<DeliveryUnit>>;

    /// Records an accepted send.
    async fn on_success(&self, claim: &Self::Claim, unit: &DeliveryUnit, receipt: Receipt)
    -> Result<()>;

    /// Records a failed send and schedules the retry.
    async fn on_failure(
        &self,
        claim: &Self::Claim,
        unit: &DeliveryUnit,
        error: &TransportError,
    ) -> Result<()>;

    /// Gives the claim back without recording an attempt.
    async fn release(&self, claim: &Self::Claim) -> Result<()>;
}
