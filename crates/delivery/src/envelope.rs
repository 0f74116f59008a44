//! Wire bodies for both pipelines.
//!
//! Field order is fixed by the structs and JSON objects serialize with sorted
//! keys, so the same input always produces the same bytes and therefore the
//! same signature.

use chrono::SecondsFormat;
use common::{DestinationId, DocumentId, ErpOperation};
use event_log::Event;
use serde::{Deserialize, Serialize};

/// Body of one webhook batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    pub destination_id: DestinationId,
    pub from_seq: i64,
    pub to_seq: i64,
    pub events: Vec<EnvelopeEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub subject_id: String,
    pub payload: serde_json::Value,
    /// RFC 3339 with millisecond precision.
    pub created_at: String,
}

impl From<&Event> for EnvelopeEvent {
    fn from(event: &Event) -> Self {
        Self {
            seq: event.sequence.as_i64(),
            event_type: event.event_type.clone(),
            subject_id: event.subject_id.clone(),
            payload: event.payload.clone(),
            created_at: event.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl WebhookEnvelope {
    /// Builds the envelope for an ascending batch; `None` when the batch is empty.
    pub fn from_events(destination_id: DestinationId, events: &[Event]) -> Option<Self> {
        let first = events.first()?;
        let last = events.last()?;

        Some(Self {
            destination_id,
            from_seq: first.sequence.as_i64(),
            to_seq: last.sequence.as_i64(),
            events: events.iter().map(EnvelopeEvent::from).collect(),
        })
    }
}

/// Body of one ERP operation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErpRequest {
    pub operation_type: ErpOperation,
    pub document_id: DocumentId,
    pub payload: ErpRequestPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErpRequestPayload {
    pub idempotency_key: String,
    pub version: i64,
    pub document: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use event_log::Sequence;

    use super::*;

    fn event(sequence: i64) -> Event {
        Event {
            sequence: Sequence::new(sequence),
            category: "document.events".to_string(),
            event_type: "DocumentPosted".to_string(),
            subject_id: format!("doc-{sequence}"),
            payload: serde_json::json!({"b": 2, "a": 1}),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn envelope_spans_first_to_last() {
        let destination = DestinationId::new();
        let envelope = WebhookEnvelope::from_events(destination, &[event(4), event(5)]).unwrap();

        assert_eq!(envelope.from_seq, 4);
        assert_eq!(envelope.to_seq, 5);
        assert_eq!(envelope.events.len(), 2);
        assert!(WebhookEnvelope::from_events(destination, &[]).is_none());
    }

    #[test]
    fn envelope_uses_wire_field_names() {
        let destination = DestinationId::new();
        let envelope = WebhookEnvelope::from_events(destination, &[event(1)]).unwrap();
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["destinationId"], destination.to_string());
        assert_eq!(json["fromSeq"], 1);
        assert_eq!(json["toSeq"], 1);
        assert_eq!(json["events"][0]["seq"], 1);
        assert_eq!(json["events"][0]["type"], "DocumentPosted");
        assert_eq!(json["events"][0]["subjectId"], "doc-1");
        assert_eq!(json["events"][0]["createdAt"], "2024-03-01T12:30:00.000Z");
    }

    #[test]
    fn serialization_is_byte_stable() {
        let destination = DestinationId::new();
        let a = serde_json::to_vec(&WebhookEnvelope::from_events(destination, &[event(1)])).unwrap();
        let b = serde_json::to_vec(&WebhookEnvelope::from_events(destination, &[event(1)])).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn erp_request_uses_wire_field_names() {
        let document = DocumentId::new();
        let request = ErpRequest {
            operation_type: ErpOperation::PostDocument,
            document_id: document,
            payload: ErpRequestPayload {
                idempotency_key: "abc".to_string(),
                version: 7,
                document: serde_json::json!({"number": "INV-7"}),
            },
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["operationType"], "PostDocument");
        assert_eq!(json["documentId"], document.to_string());
        assert_eq!(json["payload"]["idempotencyKey"], "abc");
        assert_eq!(json["payload"]["version"], 7);
        assert_eq!(json["payload"]["document"]["number"], "INV-7");
    }
}
