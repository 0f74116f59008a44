use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of an event within its category.
///
/// Sequences start at 1 for the first event of a category and increase by
/// exactly 1 per append. `Sequence::zero()` is the cursor of a destination
/// that has received nothing yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sequence(i64);

impl Sequence {
    /// Creates a sequence from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The position before the first event.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the next sequence.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw sequence value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Sequence {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Sequence> for i64 {
    fn from(sequence: Sequence) -> Self {
        sequence.0
    }
}

/// A stored, immutable domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Ordering key, unique within `category`.
    pub sequence: Sequence,

    /// The stream this event belongs to (e.g. `"document.events"`).
    pub category: String,

    /// The kind of event (e.g. `"DocumentSubmitted"`). Destinations subscribe
    /// to event types.
    pub event_type: String,

    /// The business object the event is about.
    pub subject_id: String,

    /// Opaque event payload.
    pub payload: serde_json::Value,

    /// When the event was appended.
    pub created_at: DateTime<Utc>,
}

/// An event about to be appended. The log assigns sequence and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub subject_id: String,
    pub payload: serde_json::Value,
}

impl NewEvent {
    /// Creates a new event with a raw JSON payload.
    pub fn new(
        event_type: impl Into<String>,
        subject_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            subject_id: subject_id.into(),
            payload,
        }
    }

    /// Creates a new event from a serializable payload.
    pub fn from_payload<T: Serialize>(
        event_type: impl Into<String>,
        subject_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, subject_id, serde_json::to_value(payload)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_ordering() {
        let s1 = Sequence::new(1);
        let s2 = Sequence::new(2);
        assert!(s1 < s2);
        assert_eq!(s1.next(), s2);
        assert_eq!(Sequence::zero().next(), s1);
    }

    #[test]
    fn sequence_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Sequence::new(7)).unwrap(), "7");
    }

    #[test]
    fn new_event_from_payload() {
        #[derive(Serialize)]
        struct Submitted {
            number: &'static str,
        }

        let event =
            NewEvent::from_payload("DocumentSubmitted", "doc-1", &Submitted { number: "INV-1" })
                .unwrap();

        assert_eq!(event.event_type, "DocumentSubmitted");
        assert_eq!(event.subject_id, "doc-1");
        assert_eq!(event.payload, serde_json::json!({"number": "INV-1"}));
    }
}
