//! Scriptable in-memory transport for tests and local runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::{OutboundRequest, Receipt, Result, Transport, TransportError};

#[derive(Debug, Default)]
struct RecordingState {
    sent: Vec<OutboundRequest>,
    script: VecDeque<Result<Receipt>>,
    fail_all: Option<TransportError>,
    delay: Option<Duration>,
}

/// Transport that records every request and answers from a script.
///
/// Scripted outcomes are consumed first; after that every request succeeds
/// with status 200 unless [`set_fail_all`](Self::set_fail_all) is set.
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues an outcome for the next unscripted request.
    pub fn push_outcome(&self, outcome: Result<Receipt>) {
        self.state().script.push_back(outcome);
    }

    /// Queues a failure for the next unscripted request.
    pub fn push_failure(&self, error: TransportError) {
        self.push_outcome(Err(error));
    }

    /// Makes every unscripted request fail with `error`, or succeed again with `None`.
    pub fn set_fail_all(&self, error: Option<TransportError>) {
        self.state().fail_all = error;
    }

    /// Delays every response, for exercising send timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state().delay = delay;
    }

    /// Requests received so far, in arrival order.
    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.state().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.state().sent.len()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, request: &OutboundRequest) -> Result<Receipt> {
        let (outcome, delay) = {
            let mut state = self.state();
            state.sent.push(request.clone());

            let outcome = match state.script.pop_front() {
                Some(outcome) => outcome,
                None => match &state.fail_all {
                    Some(error) => Err(error.clone()),
                    None => Ok(Receipt::with_status(200)),
                },
            };
            (outcome, state.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> OutboundRequest {
        OutboundRequest::signed("https://acme.test", "document.events", "key", "s", "{}").unwrap()
    }

    #[tokio::test]
    async fn scripted_outcomes_come_first() {
        let transport = RecordingTransport::new();
        transport.push_failure(TransportError::Network("refused".to_string()));

        assert!(transport.send(&request()).await.is_err());
        assert!(transport.send(&request()).await.is_ok());
        assert_eq!(transport.sent_count(), 2);
    }

    #[tokio::test]
    async fn fail_all_applies_until_cleared() {
        let transport = RecordingTransport::new();
        transport.set_fail_all(Some(TransportError::Status {
            status: 503,
            body: "down".to_string(),
        }));

        assert!(transport.send(&request()).await.is_err());
        assert!(transport.send(&request()).await.is_err());

        transport.set_fail_all(None);
        assert!(transport.send(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn clones_share_recorded_requests() {
        let transport = RecordingTransport::new();
        let clone = transport.clone();

        clone.send(&request()).await.unwrap();
        assert_eq!(transport.sent()[0], request());
    }
}
