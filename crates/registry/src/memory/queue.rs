use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ClaimToken, Clock, DocumentId, QueueItemId, SystemClock};
use tokio::sync::Mutex;

use crate::{
    NewQueueItem, QueueClaim, QueueItem, QueuePolicy, QueueReceipt, QueueStatus, QueueStore,
    RegistryError, Result,
    backoff::add_duration,
    destination::{truncate_error, validate_claim_limit},
};

struct Entry {
    item: QueueItem,
    claim_token: Option<ClaimToken>,
}

impl Entry {
    fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.item.status {
            QueueStatus::Pending => self.item.next_attempt_at <= now,
            QueueStatus::Processing => self.item.claimed_until.is_none_or(|until| until <= now),
            QueueStatus::Completed | QueueStatus::Failed => false,
        }
    }

    fn clear_claim(&mut self) {
        self.claim_token = None;
        self.item.claimed_until = None;
    }
}

/// In-memory ERP queue.
#[derive(Clone)]
pub struct InMemoryQueueStore {
    entries: Arc<Mutex<HashMap<QueueItemId, Entry>>>,
    policy: QueuePolicy,
    clock: Arc<dyn Clock>,
}

impl InMemoryQueueStore {
    /// Creates an empty queue with the default policy and the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty queue with the default policy and `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            policy: QueuePolicy::default(),
            clock,
        }
    }

    /// Replaces the retry and lease policy.
    pub fn with_policy(mut self, policy: QueuePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

fn claimed_entry<'a>(
    entries: &'a mut HashMap<QueueItemId, Entry>,
    claim: &QueueClaim,
) -> Result<&'a mut Entry> {
    let id = claim.item.id;
    let entry = entries
        .get_mut(&id)
        .ok_or_else(|| RegistryError::queue_item_not_found(id))?;

    if entry.claim_token != Some(claim.token) || entry.item.status != QueueStatus::Processing {
        return Err(RegistryError::claim_lost(id));
    }
    Ok(entry)
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, item: NewQueueItem) -> Result<QueueItem> {
        item.validate()?;

        let item = item.into_item(self.clock.now());
        self.entries.lock().await.insert(
            item.id,
            Entry {
                item: item.clone(),
                claim_token: None,
            },
        );

        tracing::debug!(item_id = %item.id, document_id = %item.document_id, operation = %item.operation, "Enqueued ERP operation");
        Ok(item)
    }

    async fn get(&self, id: QueueItemId) -> Result<Option<QueueItem>> {
        Ok(self
            .entries
            .lock()
            .await
            .get(&id)
            .map(|entry| entry.item.clone()))
    }

    async fn recent(&self, limit: usize, status: Option<QueueStatus>) -> Result<Vec<QueueItem>> {
        let entries = self.entries.lock().await;
        let mut items: Vec<QueueItem> = entries
            .values()
            .map(|entry| &entry.item)
            .filter(|item| status.is_none_or(|s| item.status == s))
            .cloned()
            .collect();

        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        items.truncate(limit);
        Ok(items)
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<QueueClaim>> {
        validate_claim_limit(limit)?;

        let now = self.clock.now();
        let claimed_until = add_duration(now, self.policy.claim_ttl);
        let mut entries = self.entries.lock().await;

        let mut open: Vec<&mut Entry> = entries
            .values_mut()
            .filter(|entry| !entry.item.status.is_terminal())
            .collect();
        open.sort_by(|a, b| (a.item.created_at, a.item.id).cmp(&(b.item.created_at, b.item.id)));

        // Only the oldest open item of each document is eligible.
        let mut blocked: HashSet<DocumentId> = HashSet::new();
        let mut claims = Vec::new();
        for entry in open {
            if !blocked.insert(entry.item.document_id) {
                continue;
            }
            if claims.len() == limit || !entry.is_claimable(now) {
                continue;
            }

            let token = ClaimToken::new();
            entry.claim_token = Some(token);
            entry.item.status = QueueStatus::Processing;
            entry.item.claimed_until = Some(claimed_until);
            entry.item.processed_at = Some(now);
            claims.push(QueueClaim {
                item: entry.item.clone(),
                token,
            });
        }

        Ok(claims)
    }

    async fn complete(&self, claim: &QueueClaim, receipt: QueueReceipt) -> Result<QueueItem> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let entry = claimed_entry(&mut entries, claim)?;

        entry.item.status = QueueStatus::Completed;
        entry.item.external_reference = receipt.external_reference;
        entry.item.external_status = Some(receipt.external_status);
        entry.item.error_message = None;
        entry.item.completed_at = Some(now);
        entry.clear_claim();

        Ok(entry.item.clone())
    }

    async fn fail(&self, claim: &QueueClaim, error: &str, permanent: bool) -> Result<QueueItem> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let entry = claimed_entry(&mut entries, claim)?;

        let retry_count = entry.item.retry_count.saturating_add(1);
        let status = self.policy.status_after_failure(retry_count, permanent);

        entry.item.retry_count = retry_count;
        entry.item.status = status;
        entry.item.error_message = Some(truncate_error(error));
        if status == QueueStatus::Pending {
            entry.item.next_attempt_at = self.policy.backoff.next_attempt_at(now, retry_count);
        }
        entry.clear_claim();

        Ok(entry.item.clone())
    }

    async fn release(&self, claim: &QueueClaim) -> Result<QueueItem> {
        let mut entries = self.entries.lock().await;
        let entry = claimed_entry(&mut entries, claim)?;

        entry.item.status = QueueStatus::Pending;
        entry.clear_claim();

        Ok(entry.item.clone())
    }

    async fn requeue(&self, id: QueueItemId) -> Result<QueueItem> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| RegistryError::queue_item_not_found(id))?;

        if entry.item.status != QueueStatus::Failed {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                reason: format!("only failed items can be requeued, item is {}", entry.item.status),
            });
        }

        entry.item.status = QueueStatus::Pending;
        entry.item.retry_count = 0;
        entry.item.next_attempt_at = now;
        entry.clear_claim();

        tracing::info!(item_id = %id, "Requeued failed ERP operation");
        Ok(entry.item.clone())
    }
}
