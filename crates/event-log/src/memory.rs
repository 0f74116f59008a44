use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Clock, SystemClock};
use tokio::sync::RwLock;

use crate::{
    Event, EventSelector, NewEvent, Result, Sequence,
    store::{EventLog, validate_append, validate_limit},
};

/// In-memory event log.
///
/// Each category is a vector whose index `i` holds sequence `i + 1`, so the
/// write lock alone makes sequence assignment atomic and gapless.
#[derive(Clone)]
pub struct InMemoryEventLog {
    categories: Arc<RwLock<HashMap<String, Vec<Event>>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryEventLog {
    /// Creates a new empty log using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a new empty log that timestamps events with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            categories: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Returns the number of events stored in `category`.
    pub async fn event_count(&self, category: &str) -> usize {
        self.categories
            .read()
            .await
            .get(category)
            .map_or(0, Vec::len)
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, category: &str, event: NewEvent) -> Result<Sequence> {
        validate_append(category, &event)?;

        let mut categories = self.categories.write().await;
        let stream = categories.entry(category.to_string()).or_default();
        let sequence = Sequence::new(stream.len() as i64 + 1);

        stream.push(Event {
            sequence,
            category: category.to_string(),
            event_type: event.event_type,
            subject_id: event.subject_id,
            payload: event.payload,
            created_at: self.clock.now(),
        });

        metrics::counter!("event_log_appends_total").increment(1);
        Ok(sequence)
    }

    async fn read_after(
        &self,
        category: &str,
        selector: &EventSelector,
        cursor: Sequence,
        limit: usize,
    ) -> Result<Vec<Event>> {
        validate_limit(limit)?;

        let categories = self.categories.read().await;
        let Some(stream) = categories.get(category) else {
            return Ok(Vec::new());
        };

        let start = usize::try_from(cursor.as_i64().max(0)).unwrap_or(usize::MAX);
        Ok(stream
            .iter()
            .skip(start)
            .filter(|e| selector.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn head(&self, category: &str) -> Result<Sequence> {
        Ok(Sequence::new(self.event_count(category).await as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventLogError;

    const CATEGORY: &str = "document.events";

    fn new_event(event_type: &str, subject: &str) -> NewEvent {
        NewEvent::new(event_type, subject, serde_json::json!({"subject": subject}))
    }

    #[tokio::test]
    async fn append_assigns_gapless_sequences() {
        let log = InMemoryEventLog::new();

        for expected in 1..=3 {
            let seq = log
                .append(CATEGORY, new_event("DocumentCreated", "doc"))
                .await
                .unwrap();
            assert_eq!(seq, Sequence::new(expected));
        }
        assert_eq!(log.head(CATEGORY).await.unwrap(), Sequence::new(3));
    }

    #[tokio::test]
    async fn categories_have_independent_sequences() {
        let log = InMemoryEventLog::new();

        log.append("a", new_event("X", "1")).await.unwrap();
        log.append("a", new_event("X", "2")).await.unwrap();
        let first_b = log.append("b", new_event("X", "3")).await.unwrap();

        assert_eq!(first_b, Sequence::new(1));
        assert_eq!(log.head("a").await.unwrap(), Sequence::new(2));
        assert_eq!(log.head("missing").await.unwrap(), Sequence::zero());
    }

    #[tokio::test]
    async fn read_after_is_exclusive_ordered_and_limited() {
        let log = InMemoryEventLog::new();
        for i in 0..5 {
            log.append(CATEGORY, new_event("DocumentCreated", &i.to_string()))
                .await
                .unwrap();
        }

        let events = log
            .read_after(CATEGORY, &EventSelector::all(), Sequence::new(1), 2)
            .await
            .unwrap();

        let seqs: Vec<i64> = events.iter().map(|e| e.sequence.as_i64()).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[tokio::test]
    async fn read_after_is_repeatable() {
        let log = InMemoryEventLog::new();
        for i in 0..3 {
            log.append(CATEGORY, new_event("DocumentCreated", &i.to_string()))
                .await
                .unwrap();
        }

        let first = log
            .read_after(CATEGORY, &EventSelector::all(), Sequence::zero(), 10)
            .await
            .unwrap();
        let second = log
            .read_after(CATEGORY, &EventSelector::all(), Sequence::zero(), 10)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn read_after_applies_selector() {
        let log = InMemoryEventLog::new();
        log.append(CATEGORY, new_event("DocumentCreated", "1"))
            .await
            .unwrap();
        log.append(CATEGORY, new_event("DocumentPosted", "1"))
            .await
            .unwrap();
        log.append(CATEGORY, new_event("DocumentCreated", "2"))
            .await
            .unwrap();

        let selector = EventSelector::event_types(["DocumentCreated"]);
        let events = log
            .read_after(CATEGORY, &selector, Sequence::zero(), 10)
            .await
            .unwrap();

        let seqs: Vec<i64> = events.iter().map(|e| e.sequence.as_i64()).collect();
        assert_eq!(seqs, vec![1, 3]);
    }

    #[tokio::test]
    async fn read_past_head_returns_nothing() {
        let log = InMemoryEventLog::new();
        log.append(CATEGORY, new_event("DocumentCreated", "1"))
            .await
            .unwrap();

        let events = log
            .read_after(CATEGORY, &EventSelector::all(), Sequence::new(10), 10)
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let log = InMemoryEventLog::new();
        let result = log
            .read_after(CATEGORY, &EventSelector::all(), Sequence::zero(), 0)
            .await;
        assert!(matches!(result, Err(EventLogError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn concurrent_appends_never_share_a_sequence() {
        let log = InMemoryEventLog::new();

        let mut handles = Vec::new();
        for i in 0..50 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append(CATEGORY, new_event("DocumentCreated", &i.to_string()))
                    .await
                    .unwrap()
            }));
        }

        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap().as_i64());
        }
        seqs.sort_unstable();

        assert_eq!(seqs, (1..=50).collect::<Vec<_>>());
    }
}
