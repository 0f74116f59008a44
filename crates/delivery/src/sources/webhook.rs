use std::sync::Arc;

use async_trait::async_trait;
use event_log::EventLog;
use registry::{DestinationClaim, DestinationRegistry};
use transport::{OutboundRequest, Receipt, TransportError, signing};

use crate::{DeliveryUnit, Result, WebhookEnvelope, WorkSource};

/// Streams a category's events to its webhook destinations.
///
/// Each claim is one destination; each unit is the next batch of up to
/// `batch_size` subscribed events after the destination's cursor. A failed
/// batch leaves the cursor alone, so the same batch is offered again once the
/// destination's backoff expires.
pub struct WebhookSource {
    log: Arc<dyn EventLog>,
    registry: Arc<dyn DestinationRegistry>,
    category: String,
    batch_size: usize,
}

impl WebhookSource {
    pub fn new(
        log: Arc<dyn EventLog>,
        registry: Arc<dyn DestinationRegistry>,
        category: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            log,
            registry,
            category: category.into(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

#[async_trait]
impl WorkSource for WebhookSource {
    type Claim = DestinationClaim;

    fn pipeline(&self) -> &str {
        &self.category
    }

    fn unit_id(&self, claim: &DestinationClaim) -> String {
        claim.destination.id.to_string()
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<DestinationClaim>> {
        Ok(self.registry.select_due(&self.category, limit).await?)
    }

    async fn prepare(&self, claim: &DestinationClaim) -> Result<Option<DeliveryUnit>> {
        let destination = &claim.destination;
        let events = self
            .log
            .read_after(
                &self.category,
                &destination.selector(),
                destination.cursor,
                self.batch_size,
            )
            .await?;

        let Some(envelope) = WebhookEnvelope::from_events(destination.id, &events) else {
            return Ok(None);
        };

        let body = serde_json::to_vec(&envelope)?;
        let key = signing::webhook_idempotency_key(destination.id, envelope.from_seq, envelope.to_seq);
        let request = OutboundRequest::signed(
            destination.endpoint.as_str(),
            self.category.as_str(),
            key,
            &destination.secret,
            body,
        )?;

        Ok(Some(DeliveryUnit {
            request,
            event_count: events.len(),
            advance_to: events.last().map(|e| e.sequence),
        }))
    }

    async fn on_success(
        &self,
        claim: &DestinationClaim,
        unit: &DeliveryUnit,
        _receipt: Receipt,
    ) -> Result<()> {
        let cursor = unit.advance_to.unwrap_or(claim.destination.cursor);
        let updated = self.registry.record_success(claim, cursor).await?;

        tracing::info!(
            destination_id = %updated.id,
            cursor = updated.cursor.as_i64(),
            events = unit.event_count,
            "Webhook batch delivered"
        );
        Ok(())
    }

    async fn on_failure(
        &self,
        claim: &DestinationClaim,
        _unit: &DeliveryUnit,
        error: &TransportError,
    ) -> Result<()> {
        // Webhook destinations retry every failure, permanent or not.
        let updated = self
            .registry
            .record_failure(claim, &error.to_string())
            .await?;

        tracing::warn!(
            destination_id = %updated.id,
            consecutive_failures = updated.consecutive_failures,
            next_retry_at = %updated.next_retry_at,
            error = %error,
            "Webhook batch failed"
        );
        Ok(())
    }

    async fn release(&self, claim: &DestinationClaim) -> Result<()> {
        Ok(self.registry.release(claim).await?)
    }
}
