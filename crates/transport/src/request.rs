use bytes::Bytes;
use common::DocumentStatus;

use crate::{Result, signing};

/// Header names set on every outbound request.
pub mod headers {
    pub const SIGNATURE: &str = "x-signature";
    pub const EVENT_TYPE: &str = "x-event-type";
    pub const IDEMPOTENCY_KEY: &str = "x-idempotency-key";
}

/// A serialized, signed request ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub endpoint: String,
    /// Pipeline discriminator sent as `x-event-type`.
    pub event_type: String,
    pub idempotency_key: String,
    /// Hex HMAC-SHA256 of `body`.
    pub signature: String,
    pub body: Bytes,
}

impl OutboundRequest {
    /// Builds a request whose signature is computed from `body` with `secret`.
    pub fn signed(
        endpoint: impl Into<String>,
        event_type: impl Into<String>,
        idempotency_key: impl Into<String>,
        secret: &str,
        body: impl Into<Bytes>,
    ) -> Result<Self> {
        let body = body.into();
        let signature = signing::sign(secret, &body)?;

        Ok(Self {
            endpoint: endpoint.into(),
            event_type: event_type.into(),
            idempotency_key: idempotency_key.into(),
            signature,
            body,
        })
    }
}

/// Confirmation that the receiver accepted a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    pub status_code: u16,
    /// Identifier the receiver assigned, when it reports one.
    pub external_reference: Option<String>,
    pub document_status: Option<DocumentStatus>,
}

impl Receipt {
    pub fn with_status(status_code: u16) -> Self {
        Self {
            status_code,
            ..Self::default()
        }
    }
}
