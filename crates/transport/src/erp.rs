use std::time::Duration;

use async_trait::async_trait;
use common::DocumentStatus;
use serde::{Deserialize, Serialize};

use crate::{
    ClientConfig, OutboundRequest, Receipt, Result, Transport, TransportError,
    client::{post_signed, status_error},
};

/// Body the ERP answers an operation call with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErpResponse {
    pub success: bool,
    pub external_reference: Option<String>,
    #[serde(default)]
    pub status: DocumentStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub permanent: bool,
}

impl ErpResponse {
    /// Maps the answer to a receipt, or to a rejection when the ERP refused it.
    pub fn into_receipt(self, status_code: u16) -> Result<Receipt> {
        if !self.success || self.status == DocumentStatus::Error {
            return Err(TransportError::Rejected {
                code: self.error_code.unwrap_or_else(|| "UNKNOWN".to_string()),
                message: self
                    .error_message
                    .unwrap_or_else(|| "operation rejected".to_string()),
                permanent: self.permanent,
            });
        }

        Ok(Receipt {
            status_code,
            external_reference: self.external_reference,
            document_status: Some(self.status),
        })
    }
}

/// Calls the ERP operation endpoint.
///
/// HTTP 5xx, 408, 429 and network errors are transient; other 4xx are
/// permanent; a 2xx whose body says `success: false` is a rejection whose
/// permanence the ERP decides.
#[derive(Debug, Clone)]
pub struct ErpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ErpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            client: config.build()?,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl Transport for ErpTransport {
    fn name(&self) -> &'static str {
        "erp"
    }

    #[tracing::instrument(skip(self, request), fields(operation = %request.event_type, idempotency_key = %request.idempotency_key))]
    async fn send(&self, request: &OutboundRequest) -> Result<Receipt> {
        let response = post_signed(&self.client, self.timeout, request).await?;
        let status = response.status();

        if !status.is_success() {
            return Err(status_error(response).await);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(format!("failed to read response body: {e}")))?;
        let answer: ErpResponse = serde_json::from_slice(&body)
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        let receipt = answer.into_receipt(status.as_u16());
        if let Err(error) = &receipt {
            tracing::warn!(error = %error, permanent = error.is_permanent(), "ERP rejected operation");
        }
        receipt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_answer_becomes_receipt() {
        let answer: ErpResponse = serde_json::from_str(
            r#"{"success": true, "externalReference": "ERP-7", "status": "Posted"}"#,
        )
        .unwrap();

        let receipt = answer.into_receipt(200).unwrap();
        assert_eq!(receipt.external_reference.as_deref(), Some("ERP-7"));
        assert_eq!(receipt.document_status, Some(DocumentStatus::Posted));
    }

    #[test]
    fn refusal_defaults_to_transient() {
        let answer: ErpResponse =
            serde_json::from_str(r#"{"success": false, "errorCode": "LOCKED"}"#).unwrap();

        let error = answer.into_receipt(200).unwrap_err();
        assert!(!error.is_permanent());
        assert!(matches!(error, TransportError::Rejected { ref code, .. } if code == "LOCKED"));
    }

    #[test]
    fn permanent_refusal_is_flagged() {
        let answer: ErpResponse = serde_json::from_str(
            r#"{"success": false, "errorCode": "INVALID_VENDOR", "errorMessage": "no such vendor", "permanent": true}"#,
        )
        .unwrap();

        assert!(answer.into_receipt(200).unwrap_err().is_permanent());
    }

    #[test]
    fn error_status_is_a_rejection_even_when_successful() {
        let answer: ErpResponse =
            serde_json::from_str(r#"{"success": true, "status": "Error"}"#).unwrap();
        assert!(answer.into_receipt(200).is_err());
    }
}
