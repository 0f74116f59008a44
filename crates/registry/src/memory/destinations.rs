use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{ClaimToken, Clock, DestinationId, SystemClock};
use event_log::Sequence;
use tokio::sync::Mutex;

use crate::{
    Destination, DestinationClaim, DestinationPolicy, DestinationRegistry, NewDestination,
    RegistryError, Result,
    backoff::add_duration,
    destination::{truncate_error, validate_claim_limit},
};

struct Entry {
    destination: Destination,
    claim_token: Option<ClaimToken>,
}

/// In-memory destination registry.
#[derive(Clone)]
pub struct InMemoryDestinationRegistry {
    entries: Arc<Mutex<HashMap<DestinationId, Entry>>>,
    policy: DestinationPolicy,
    clock: Arc<dyn Clock>,
}

impl InMemoryDestinationRegistry {
    /// Creates an empty registry with the default policy and the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty registry with the default policy and `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            policy: DestinationPolicy::default(),
            clock,
        }
    }

    /// Replaces the backoff and lease policy.
    pub fn with_policy(mut self, policy: DestinationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &DestinationPolicy {
        &self.policy
    }
}

impl Default for InMemoryDestinationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the entry held by `claim`, or `ClaimLost` if another worker took it over.
fn claimed_entry<'a>(
    entries: &'a mut HashMap<DestinationId, Entry>,
    claim: &DestinationClaim,
) -> Result<&'a mut Entry> {
    let id = claim.destination.id;
    let entry = entries
        .get_mut(&id)
        .ok_or_else(|| RegistryError::destination_not_found(id))?;

    if entry.claim_token != Some(claim.token) {
        return Err(RegistryError::claim_lost(id));
    }
    Ok(entry)
}

#[async_trait]
impl DestinationRegistry for InMemoryDestinationRegistry {
    async fn register(&self, destination: NewDestination) -> Result<Destination> {
        destination.validate()?;

        let destination = destination.into_destination(self.clock.now());
        self.entries.lock().await.insert(
            destination.id,
            Entry {
                destination: destination.clone(),
                claim_token: None,
            },
        );

        tracing::info!(destination_id = %destination.id, category = %destination.category, "Registered destination");
        Ok(destination)
    }

    async fn get(&self, id: DestinationId) -> Result<Option<Destination>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(&id)
            .map(|entry| entry.destination.clone()))
    }

    async fn list(&self, category: Option<&str>) -> Result<Vec<Destination>> {
        let entries = self.entries.lock().await;
        let mut destinations: Vec<Destination> = entries
            .values()
            .map(|entry| &entry.destination)
            .filter(|d| category.is_none_or(|c| d.category == c))
            .cloned()
            .collect();

        destinations.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(destinations)
    }

    async fn select_due(&self, category: &str, limit: usize) -> Result<Vec<DestinationClaim>> {
        validate_claim_limit(limit)?;

        let now = self.clock.now();
        let claimed_until = add_duration(now, self.policy.claim_ttl);
        let mut entries = self.entries.lock().await;

        let mut due: Vec<&mut Entry> = entries
            .values_mut()
            .filter(|entry| {
                entry.destination.category == category && entry.destination.is_due(now)
            })
            .collect();
        due.sort_by(|a, b| {
            (a.destination.updated_at, a.destination.id)
                .cmp(&(b.destination.updated_at, b.destination.id))
        });

        let claims = due
            .into_iter()
            .take(limit)
            .map(|entry| {
                let token = ClaimToken::new();
                entry.claim_token = Some(token);
                entry.destination.claimed_until = Some(claimed_until);
                DestinationClaim {
                    destination: entry.destination.clone(),
                    token,
                }
            })
            .collect();

        Ok(claims)
    }

    async fn record_success(
        &self,
        claim: &DestinationClaim,
        cursor: Sequence,
    ) -> Result<Destination> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let entry = claimed_entry(&mut entries, claim)?;

        let destination = &mut entry.destination;
        destination.cursor = destination.cursor.max(cursor);
        destination.consecutive_failures = 0;
        destination.last_error = None;
        destination.next_retry_at = now;
        destination.last_success_at = Some(now);
        destination.claimed_until = None;
        destination.updated_at = now;
        entry.claim_token = None;

        Ok(entry.destination.clone())
    }

    async fn record_failure(&self, claim: &DestinationClaim, error: &str) -> Result<Destination> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let entry = claimed_entry(&mut entries, claim)?;

        let destination = &mut entry.destination;
        destination.consecutive_failures = destination.consecutive_failures.saturating_add(1);
        destination.next_retry_at = self
            .policy
            .backoff
            .next_attempt_at(now, destination.consecutive_failures);
        destination.last_error = Some(truncate_error(error));
        destination.claimed_until = None;
        destination.updated_at = now;
        entry.claim_token = None;

        Ok(entry.destination.clone())
    }

    async fn release(&self, claim: &DestinationClaim) -> Result<()> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let entry = claimed_entry(&mut entries, claim)?;

        entry.destination.claimed_until = None;
        entry.destination.updated_at = now;
        entry.claim_token = None;
        Ok(())
    }

    async fn set_active(&self, id: DestinationId, active: bool) -> Result<Destination> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| RegistryError::destination_not_found(id))?;

        let destination = &mut entry.destination;
        destination.is_active = active;
        if active {
            destination.next_retry_at = now;
        }
        destination.updated_at = now;

        tracing::info!(destination_id = %id, active, "Destination activation changed");
        Ok(destination.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use common::ManualClock;

    use super::*;

    const CATEGORY: &str = "document.events";

    fn new_destination(name: &str) -> NewDestination {
        NewDestination::new(CATEGORY, name, format!("https://{name}.test/hook"), "s3cret")
    }

    fn registry_at(clock: &ManualClock) -> InMemoryDestinationRegistry {
        InMemoryDestinationRegistry::with_clock(Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn register_then_get() {
        let registry = InMemoryDestinationRegistry::new();
        let created = registry.register(new_destination("acme")).await.unwrap();

        let fetched = registry.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(registry.get(DestinationId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claimed_destination_is_not_due_again() {
        let registry = InMemoryDestinationRegistry::new();
        registry.register(new_destination("acme")).await.unwrap();

        let first = registry.select_due(CATEGORY, 10).await.unwrap();
        let second = registry.select_due(CATEGORY, 10).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn select_due_respects_category_and_limit() {
        let registry = InMemoryDestinationRegistry::new();
        for name in ["a", "b", "c"] {
            registry.register(new_destination(name)).await.unwrap();
        }
        registry
            .register(NewDestination::new("other", "x", "https://x.test", "s"))
            .await
            .unwrap();

        let claims = registry.select_due(CATEGORY, 2).await.unwrap();
        assert_eq!(claims.len(), 2);
        assert!(claims.iter().all(|c| c.destination.category == CATEGORY));

        let rest = registry.select_due(CATEGORY, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_destination() {
        let registry = InMemoryDestinationRegistry::new();
        for i in 0..5 {
            registry
                .register(new_destination(&format!("d{i}")))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..20 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.select_due(CATEGORY, 2).await.unwrap()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for claim in handle.await.unwrap() {
                assert!(
                    seen.insert(claim.destination.id),
                    "destination claimed twice"
                );
            }
        }
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn success_advances_cursor_and_never_moves_it_back() {
        let registry = InMemoryDestinationRegistry::new();
        registry.register(new_destination("acme")).await.unwrap();

        let claim = registry.select_due(CATEGORY, 1).await.unwrap().remove(0);
        let updated = registry
            .record_success(&claim, Sequence::new(5))
            .await
            .unwrap();
        assert_eq!(updated.cursor, Sequence::new(5));
        assert!(updated.last_success_at.is_some());
        assert!(updated.claimed_until.is_none());

        let claim = registry.select_due(CATEGORY, 1).await.unwrap().remove(0);
        let updated = registry
            .record_success(&claim, Sequence::new(3))
            .await
            .unwrap();
        assert_eq!(updated.cursor, Sequence::new(5));
    }

    #[tokio::test]
    async fn failures_back_off_30_60_120_seconds() {
        let clock = ManualClock::default();
        let registry = registry_at(&clock);
        registry.register(new_destination("acme")).await.unwrap();

        for (failures, delay) in [(1, 30), (2, 60), (3, 120)] {
            let claim = registry.select_due(CATEGORY, 1).await.unwrap().remove(0);
            let failed_at = clock.now();
            let updated = registry.record_failure(&claim, "503").await.unwrap();

            assert_eq!(updated.consecutive_failures, failures);
            assert_eq!(
                updated.next_retry_at - failed_at,
                chrono::Duration::seconds(delay)
            );
            assert_eq!(updated.last_error.as_deref(), Some("503"));

            clock.advance(chrono::Duration::seconds(delay - 1));
            assert!(registry.select_due(CATEGORY, 1).await.unwrap().is_empty());
            clock.advance(chrono::Duration::seconds(1));
        }
    }

    #[tokio::test]
    async fn success_resets_backoff_to_base() {
        let clock = ManualClock::default();
        let registry = registry_at(&clock);
        registry.register(new_destination("acme")).await.unwrap();

        for _ in 0..3 {
            let claim = registry.select_due(CATEGORY, 1).await.unwrap().remove(0);
            registry.record_failure(&claim, "timeout").await.unwrap();
            clock.advance(chrono::Duration::hours(1));
        }

        let claim = registry.select_due(CATEGORY, 1).await.unwrap().remove(0);
        let updated = registry
            .record_success(&claim, Sequence::new(1))
            .await
            .unwrap();
        assert_eq!(updated.consecutive_failures, 0);
        assert!(updated.last_error.is_none());

        let claim = registry.select_due(CATEGORY, 1).await.unwrap().remove(0);
        let failed_at = clock.now();
        let updated = registry.record_failure(&claim, "timeout").await.unwrap();
        assert_eq!(
            updated.next_retry_at - failed_at,
            chrono::Duration::seconds(30)
        );
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let clock = ManualClock::default();
        let registry = registry_at(&clock).with_policy(DestinationPolicy {
            claim_ttl: Duration::from_secs(60),
            ..DestinationPolicy::default()
        });
        registry.register(new_destination("acme")).await.unwrap();

        let stale = registry.select_due(CATEGORY, 1).await.unwrap().remove(0);
        clock.advance(chrono::Duration::seconds(61));

        let fresh = registry.select_due(CATEGORY, 1).await.unwrap().remove(0);
        assert_ne!(stale.token, fresh.token);

        let result = registry.record_success(&stale, Sequence::new(9)).await;
        assert!(matches!(result, Err(RegistryError::ClaimLost { .. })));

        let current = registry.get(fresh.destination.id).await.unwrap().unwrap();
        assert_eq!(current.cursor, Sequence::zero());

        registry
            .record_success(&fresh, Sequence::new(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn release_keeps_failure_state() {
        let clock = ManualClock::default();
        let registry = registry_at(&clock);
        registry.register(new_destination("acme")).await.unwrap();

        let claim = registry.select_due(CATEGORY, 1).await.unwrap().remove(0);
        registry.record_failure(&claim, "boom").await.unwrap();
        clock.advance(chrono::Duration::seconds(30));

        let claim = registry.select_due(CATEGORY, 1).await.unwrap().remove(0);
        registry.release(&claim).await.unwrap();

        let current = registry.get(claim.destination.id).await.unwrap().unwrap();
        assert_eq!(current.consecutive_failures, 1);
        assert_eq!(current.last_error.as_deref(), Some("boom"));
        assert!(current.claimed_until.is_none());
        assert_eq!(registry.select_due(CATEGORY, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deactivated_destination_is_skipped_until_reactivated() {
        let clock = ManualClock::default();
        let registry = registry_at(&clock);
        let destination = registry.register(new_destination("acme")).await.unwrap();

        let claim = registry.select_due(CATEGORY, 1).await.unwrap().remove(0);
        registry.record_failure(&claim, "boom").await.unwrap();

        registry.set_active(destination.id, false).await.unwrap();
        clock.advance(chrono::Duration::hours(2));
        assert!(registry.select_due(CATEGORY, 1).await.unwrap().is_empty());

        let reactivated = registry.set_active(destination.id, true).await.unwrap();
        assert!(reactivated.is_active);
        assert_eq!(registry.select_due(CATEGORY, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_active_on_unknown_destination_is_not_found() {
        let registry = InMemoryDestinationRegistry::new();
        let result = registry.set_active(DestinationId::new(), false).await;
        assert!(matches!(result, Err(RegistryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let registry = InMemoryDestinationRegistry::new();
        let result = registry.select_due(CATEGORY, 0).await;
        assert!(matches!(result, Err(RegistryError::InvalidArgument(_))));
    }
}
