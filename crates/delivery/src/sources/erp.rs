use std::sync::Arc;

use async_trait::async_trait;
use registry::{QueueClaim, QueueReceipt, QueueStatus, QueueStore};
use transport::{OutboundRequest, Receipt, TransportError, signing};

use crate::{DeliveryUnit, ErpRequest, ErpRequestPayload, Result, WorkSource};

/// Where and how to reach the ERP.
#[derive(Debug, Clone)]
pub struct ErpConnection {
    pub endpoint: String,
    /// Key for the `x-signature` HMAC.
    pub secret: String,
}

/// Delivers queued document operations to the ERP, one item per unit.
pub struct ErpQueueSource {
    queue: Arc<dyn QueueStore>,
    connection: ErpConnection,
}

impl ErpQueueSource {
    /// Pipeline name used by the scheduler and in metrics.
    pub const PIPELINE: &'static str = "erp";

    pub fn new(queue: Arc<dyn QueueStore>, connection: ErpConnection) -> Self {
        Self { queue, connection }
    }
}

#[async_trait]
impl WorkSource for ErpQueueSource {
    type Claim = QueueClaim;

    fn pipeline(&self) -> &str {
        Self::PIPELINE
    }

    fn unit_id(&self, claim: &QueueClaim) -> String {
        claim.item.id.to_string()
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<QueueClaim>> {
        Ok(self.queue.claim_due(limit).await?)
    }

    async fn prepare(&self, claim: &QueueClaim) -> Result<Option<DeliveryUnit>> {
        let item = &claim.item;
        let key = signing::erp_idempotency_key(item.document_id, item.operation, item.document_version);

        let body = serde_json::to_vec(&ErpRequest {
            operation_type: item.operation,
            document_id: item.document_id,
            payload: ErpRequestPayload {
                idempotency_key: key.clone(),
                version: item.document_version,
                document: item.payload.clone(),
            },
        })?;

        let request = OutboundRequest::signed(
            self.connection.endpoint.as_str(),
            item.operation.as_str(),
            key,
            &self.connection.secret,
            body,
        )?;

        Ok(Some(DeliveryUnit {
            request,
            event_count: 1,
            advance_to: None,
        }))
    }

    async fn on_success(&self, claim: &QueueClaim, _unit: &DeliveryUnit, receipt: Receipt) -> Result<()> {
        let item = self
            .queue
            .complete(
                claim,
                QueueReceipt {
                    external_reference: receipt.external_reference,
                    external_status: receipt.document_status.unwrap_or_default(),
                },
            )
            .await?;

        tracing::info!(
            item_id = %item.id,
            document_id = %item.document_id,
            operation = %item.operation,
            external_reference = item.external_reference.as_deref().unwrap_or(""),
            "ERP operation completed"
        );
        Ok(())
    }

    async fn on_failure(
        &self,
        claim: &QueueClaim,
        _unit: &DeliveryUnit,
        error: &TransportError,
    ) -> Result<()> {
        let item = self
            .queue
            .fail(claim, &error.to_string(), error.is_permanent())
            .await?;

        if item.status == QueueStatus::Failed {
            tracing::error!(
                item_id = %item.id,
                document_id = %item.document_id,
                retry_count = item.retry_count,
                error = %error,
                "ERP operation failed permanently"
            );
        } else {
            tracing::warn!(
                item_id = %item.id,
                retry_count = item.retry_count,
                next_attempt_at = %item.next_attempt_at,
                error = %error,
                "ERP operation failed, will retry"
            );
        }
        Ok(())
    }

    async fn release(&self, claim: &QueueClaim) -> Result<()> {
        self.queue.release(claim).await?;
        Ok(())
    }
}
