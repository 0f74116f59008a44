use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ClaimToken, DestinationId};
use event_log::{EventSelector, Sequence};

use crate::{BackoffPolicy, RegistryError, Result};

/// A webhook subscriber and its delivery progress through one event category.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub id: DestinationId,
    pub category: String,
    pub name: String,
    pub endpoint: String,
    pub secret: String,
    /// Subscribed event types; empty means every type.
    pub event_types: Vec<String>,
    /// Last sequence confirmed by the receiver.
    pub cursor: Sequence,
    pub consecutive_failures: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub claimed_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Destination {
    /// Selector restricting reads to the subscribed event types.
    pub fn selector(&self) -> EventSelector {
        EventSelector::event_types(self.event_types.iter().cloned())
    }

    /// Whether a live lease is held on this destination at `now`.
    pub fn is_claimed(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.is_some_and(|until| until > now)
    }

    /// Whether the destination may be claimed at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_retry_at <= now && !self.is_claimed(now)
    }
}

/// Registration request for a new destination.
#[derive(Debug, Clone)]
pub struct NewDestination {
    pub category: String,
    pub name: String,
    pub endpoint: String,
    pub secret: String,
    pub event_types: Vec<String>,
}

impl NewDestination {
    /// Creates a registration subscribed to every event type in `category`.
    pub fn new(
        category: impl Into<String>,
        name: impl Into<String>,
        endpoint: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            endpoint: endpoint.into(),
            secret: secret.into(),
            event_types: Vec::new(),
        }
    }

    /// Restricts the subscription to the given event types.
    pub fn subscribe_to<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = event_types.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.category.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "category must not be empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "name must not be empty".to_string(),
            ));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(RegistryError::InvalidArgument(format!(
                "endpoint must be an http(s) URL, got {:?}",
                self.endpoint
            )));
        }
        if self.secret.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "secret must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn into_destination(self, now: DateTime<Utc>) -> Destination {
        Destination {
            id: DestinationId::new(),
            category: self.category,
            name: self.name,
            endpoint: self.endpoint,
            secret: self.secret,
            event_types: self.event_types,
            cursor: Sequence::zero(),
            consecutive_failures: 0,
            next_retry_at: now,
            last_error: None,
            last_success_at: None,
            is_active: true,
            claimed_until: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A lease on one destination, held by a single worker.
///
/// The `destination` is the snapshot taken at claim time.
#[derive(Debug, Clone)]
pub struct DestinationClaim {
    pub destination: Destination,
    pub token: ClaimToken,
}

/// Tuning shared by both registry backends.
#[derive(Debug, Clone, Copy)]
pub struct DestinationPolicy {
    pub backoff: BackoffPolicy,
    pub claim_ttl: Duration,
}

impl Default for DestinationPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            claim_ttl: Duration::from_secs(60),
        }
    }
}

/// Storage for webhook destinations and their cursors.
#[async_trait]
pub trait DestinationRegistry: Send + Sync {
    /// Registers a destination; it starts active with cursor 0 and is due immediately.
    async fn register(&self, destination: NewDestination) -> Result<Destination>;

    async fn get(&self, id: DestinationId) -> Result<Option<Destination>>;

    /// Lists destinations, optionally restricted to one category, oldest first.
    async fn list(&self, category: Option<&str>) -> Result<Vec<Destination>>;

    /// Atomically claims up to `limit` due destinations in `category`.
    ///
    /// Due means active, `next_retry_at <= now` and no live lease. Least
    /// recently updated destinations are claimed first. Never blocks on
    /// destinations claimed by other workers.
    async fn select_due(&self, category: &str, limit: usize) -> Result<Vec<DestinationClaim>>;

    /// Records a confirmed delivery up to `cursor` and releases the claim.
    async fn record_success(
        &self,
        claim: &DestinationClaim,
        cursor: Sequence,
    ) -> Result<Destination>;

    /// Records a failed attempt, schedules the retry and releases the claim.
    async fn record_failure(&self, claim: &DestinationClaim, error: &str) -> Result<Destination>;

    /// Releases a claim without touching delivery state.
    async fn release(&self, claim: &DestinationClaim) -> Result<()>;

    /// Operator control; reactivating makes the destination due immediately.
    async fn set_active(&self, id: DestinationId, active: bool) -> Result<Destination>;
}

pub(crate) fn validate_claim_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(RegistryError::InvalidArgument(
            "claim limit must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Truncates an error message to what is worth storing.
pub(crate) fn truncate_error(error: &str) -> String {
    const MAX_ERROR_LEN: usize = 1024;

    if error.len() <= MAX_ERROR_LEN {
        return error.to_string();
    }
    let mut end = MAX_ERROR_LEN;
    while !error.is_char_boundary(end) {
        end -= 1;
    }
    error[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_requires_http_endpoint() {
        let bad = NewDestination::new("document.events", "acme", "ftp://acme", "s3cret");
        assert!(matches!(
            bad.validate(),
            Err(RegistryError::InvalidArgument(_))
        ));

        let good = NewDestination::new("document.events", "acme", "https://acme.test/hook", "s3cret");
        assert!(good.validate().is_ok());
    }

    #[test]
    fn registration_requires_secret() {
        let new = NewDestination::new("document.events", "acme", "https://acme.test", "");
        assert!(new.validate().is_err());
    }

    #[test]
    fn new_destination_starts_due_at_cursor_zero() {
        let now = Utc::now();
        let destination = NewDestination::new("c", "n", "http://h", "s")
            .subscribe_to(["DocumentPosted"])
            .into_destination(now);

        assert_eq!(destination.cursor, Sequence::zero());
        assert!(destination.is_due(now));
        assert_eq!(destination.event_types, vec!["DocumentPosted".to_string()]);
    }

    #[test]
    fn live_lease_blocks_due() {
        let now = Utc::now();
        let mut destination = NewDestination::new("c", "n", "http://h", "s").into_destination(now);

        destination.claimed_until = Some(now + chrono::Duration::seconds(10));
        assert!(!destination.is_due(now));

        destination.claimed_until = Some(now - chrono::Duration::seconds(1));
        assert!(destination.is_due(now));
    }

    #[test]
    fn long_errors_are_truncated_on_char_boundary() {
        let error = "é".repeat(1000);
        let stored = truncate_error(&error);
        assert!(stored.len() <= 1024);
        assert!(error.starts_with(&stored));
    }
}
