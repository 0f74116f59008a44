use serde::{Deserialize, Serialize};

use crate::Event;

/// Filters which events of a category a destination cares about.
///
/// The default selector matches every event. A selector with event types
/// matches only events whose `event_type` is one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSelector {
    /// Accepted event types; `None` accepts all.
    pub event_types: Option<Vec<String>>,
}

impl EventSelector {
    /// Matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches only the given event types.
    ///
    /// An empty list is treated as "all types", which is how a destination
    /// without an explicit subscription list is stored.
    pub fn event_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let types: Vec<String> = types.into_iter().map(Into::into).collect();
        if types.is_empty() {
            Self::all()
        } else {
            Self {
                event_types: Some(types),
            }
        }
    }

    /// Returns true if the event passes this selector.
    pub fn matches(&self, event: &Event) -> bool {
        match &self.event_types {
            Some(types) => types.iter().any(|t| t == &event.event_type),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::Sequence;

    fn event(event_type: &str) -> Event {
        Event {
            sequence: Sequence::new(1),
            category: "document.events".to_string(),
            event_type: event_type.to_string(),
            subject_id: "doc-1".to_string(),
            payload: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn all_matches_everything() {
        let selector = EventSelector::all();
        assert!(selector.matches(&event("DocumentCreated")));
        assert!(selector.matches(&event("DocumentPosted")));
    }

    #[test]
    fn event_types_filters() {
        let selector = EventSelector::event_types(["DocumentPosted"]);
        assert!(selector.matches(&event("DocumentPosted")));
        assert!(!selector.matches(&event("DocumentCreated")));
    }

    #[test]
    fn empty_type_list_means_all() {
        let selector = EventSelector::event_types(Vec::<String>::new());
        assert_eq!(selector, EventSelector::all());
    }
}
