use async_trait::async_trait;

use crate::{Event, EventLogError, EventSelector, NewEvent, Result, Sequence};

/// Core trait for event log implementations.
///
/// The log is append-only. Within a category, sequences are assigned
/// atomically and without gaps; reads after a cursor are repeatable as long
/// as nothing new is appended.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends an event to `category` and returns its sequence.
    async fn append(&self, category: &str, event: NewEvent) -> Result<Sequence>;

    /// Returns up to `limit` events of `category` with sequence strictly
    /// greater than `cursor` that pass `selector`, in ascending order.
    async fn read_after(
        &self,
        category: &str,
        selector: &EventSelector,
        cursor: Sequence,
        limit: usize,
    ) -> Result<Vec<Event>>;

    /// Returns the latest sequence assigned in `category`, or zero.
    async fn head(&self, category: &str) -> Result<Sequence>;
}

/// Convenience methods for event logs.
#[async_trait]
pub trait EventLogExt: EventLog {
    /// Appends an event built from its parts.
    async fn append_event(
        &self,
        category: &str,
        event_type: &str,
        subject_id: &str,
        payload: serde_json::Value,
    ) -> Result<Sequence> {
        self.append(category, NewEvent::new(event_type, subject_id, payload))
            .await
    }

    /// Returns true if `category` has events after `cursor` for `selector`.
    async fn has_pending(
        &self,
        category: &str,
        selector: &EventSelector,
        cursor: Sequence,
    ) -> Result<bool> {
        Ok(!self.read_after(category, selector, cursor, 1).await?.is_empty())
    }
}

impl<T: EventLog + ?Sized> EventLogExt for T {}

/// Validates an append request.
pub fn validate_append(category: &str, event: &NewEvent) -> Result<()> {
    if category.trim().is_empty() {
        return Err(EventLogError::InvalidArgument(
            "category must not be empty".to_string(),
        ));
    }
    if event.event_type.trim().is_empty() {
        return Err(EventLogError::InvalidArgument(
            "event_type must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates a read limit.
pub fn validate_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(EventLogError::InvalidArgument(
            "read limit must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_category_and_type() {
        let event = NewEvent::new("DocumentCreated", "doc-1", serde_json::json!({}));
        assert!(validate_append("", &event).is_err());
        assert!(validate_append("document.events", &event).is_ok());

        let blank = NewEvent::new("  ", "doc-1", serde_json::json!({}));
        assert!(validate_append("document.events", &blank).is_err());
    }

    #[test]
    fn rejects_zero_limit() {
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(1).is_ok());
    }
}
