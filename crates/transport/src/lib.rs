//! Outbound transports and the idempotency/signing layer.
//!
//! A [`Transport`] takes a fully prepared [`OutboundRequest`] (body already
//! serialized, signed and keyed) and reports either a [`Receipt`] or a
//! categorized [`TransportError`]. The HTTP transports never retry on their
//! own; retry scheduling belongs to the caller.

pub mod client;
pub mod erp;
pub mod error;
pub mod memory;
pub mod request;
pub mod signing;
pub mod webhook;

use async_trait::async_trait;

pub use client::ClientConfig;
pub use erp::{ErpResponse, ErpTransport};
pub use error::{Result, TransportError};
pub use memory::RecordingTransport;
pub use request::{OutboundRequest, Receipt, headers};
pub use webhook::WebhookTransport;

/// Sends one prepared request to its receiver.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Sends the request once. Any non-success outcome is an error.
    async fn send(&self, request: &OutboundRequest) -> Result<Receipt>;
}
