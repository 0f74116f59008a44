//! Shared reqwest plumbing for the HTTP transports.

use std::time::Duration;

use reqwest::{Response, header::CONTENT_TYPE};

use crate::{OutboundRequest, Result, TransportError, headers};

/// Response bodies longer than this are cut before being stored as errors.
const MAX_ERROR_BODY: usize = 1024;

/// Configuration for the outbound HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout enforced by reqwest.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: concat!("outbound-delivery/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    /// Builds a pooled client with this configuration.
    pub fn build(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::Configuration(format!("failed to build HTTP client: {e}")))
    }
}

/// POSTs the request body with the signing headers.
pub(crate) async fn post_signed(
    client: &reqwest::Client,
    timeout: Duration,
    request: &OutboundRequest,
) -> Result<Response> {
    client
        .post(&request.endpoint)
        .header(CONTENT_TYPE, "application/json")
        .header(headers::SIGNATURE, &request.signature)
        .header(headers::EVENT_TYPE, &request.event_type)
        .header(headers::IDEMPOTENCY_KEY, &request.idempotency_key)
        .body(request.body.clone())
        .send()
        .await
        .map_err(|e| categorize(e, timeout))
}

fn categorize(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else if error.is_builder() {
        TransportError::Configuration(error.to_string())
    } else {
        TransportError::Network(error.to_string())
    }
}

/// Turns a non-success response into a `Status` error carrying the body head.
pub(crate) async fn status_error(response: Response) -> TransportError {
    let status = response.status().as_u16();
    let body = match response.bytes().await {
        Ok(bytes) => {
            let end = bytes.len().min(MAX_ERROR_BODY);
            String::from_utf8_lossy(&bytes[..end]).into_owned()
        }
        Err(e) => format!("[failed to read response body: {e}]"),
    };
    TransportError::Status { status, body }
}
