use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::{
    ClientConfig, OutboundRequest, Receipt, Result, Transport,
    client::{post_signed, status_error},
};

/// Delivers signed event batches to subscriber endpoints.
///
/// Any 2xx is success; everything else, timeouts included, is a failure.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            client: config.build()?,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn name(&self) -> &'static str {
        "webhook"
    }

    #[tracing::instrument(skip(self, request), fields(endpoint = %request.endpoint, idempotency_key = %request.idempotency_key))]
    async fn send(&self, request: &OutboundRequest) -> Result<Receipt> {
        let started = Instant::now();
        let response = post_signed(&self.client, self.timeout, request).await?;
        let status = response.status();

        tracing::debug!(
            status = status.as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Webhook response"
        );

        if status.is_success() {
            Ok(Receipt::with_status(status.as_u16()))
        } else {
            Err(status_error(response).await)
        }
    }
}
