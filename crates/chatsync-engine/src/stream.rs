use std::collections::HashSet;
use std::sync::Arc;

use chatsync_proto::protocol::TimestampedEvent;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    #[error("event {id} has a non-finite offset")]
    NonFiniteOffset { id: String },
    #[error("event {id} at {offset}s comes after a later event ({previous}s)")]
    OutOfOrder {
        id: String,
        offset: f64,
        previous: f64,
    },
    #[error("duplicate event id {0}")]
    DuplicateId(String),
}

/// Events of one recorded stream, ascending by offset with unique ids.
///
/// Cheap to clone; the event list is shared.
#[derive(Debug, Clone, Default)]
pub struct EventStream {
    events: Arc<[TimestampedEvent]>,
}

impl EventStream {
    /// Build from events that already satisfy the ordering invariant.
    pub fn new(events: Vec<TimestampedEvent>) -> Result<Self, StreamError> {
        Self::validate(&events)?;
        Ok(Self {
            events: events.into(),
        })
    }

    fn validate(events: &[TimestampedEvent]) -> Result<(), StreamError> {
        let mut seen = HashSet::with_capacity(events.len());
        let mut previous = f64::NEG_INFINITY;
        for ev in events {
            if !ev.offset_secs.is_finite() {
                return Err(StreamError::NonFiniteOffset { id: ev.id.clone() });
            }
            if ev.offset_secs < previous {
                return Err(StreamError::OutOfOrder {
                    id: ev.id.clone(),
                    offset: ev.offset_secs,
                    previous,
                });
            }
            if !seen.insert(ev.id.as_str()) {
                return Err(StreamError::DuplicateId(ev.id.clone()));
            }
            previous = ev.offset_secs;
        }
        Ok(())
    }

    /// Sanitize events from an untrusted source: drop non-finite offsets and
    /// repeated ids, then sort by offset keeping file order on ties.
    pub fn normalized(events: Vec<TimestampedEvent>) -> Self {
        let total = events.len();
        let mut seen = HashSet::with_capacity(total);
        let mut kept: Vec<TimestampedEvent> = events
            .into_iter()
            .filter(|ev| ev.offset_secs.is_finite() && seen.insert(ev.id.clone()))
            .collect();
        if kept.len() != total {
            warn!(
                "[stream] dropped {} of {} events (bad offset or duplicate id)",
                total - kept.len(),
                total
            );
        }
        kept.sort_by(|a, b| a.offset_secs.total_cmp(&b.offset_secs));
        Self {
            events: kept.into(),
        }
    }

    pub fn events(&self) -> &[TimestampedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&TimestampedEvent> {
        self.events.get(idx)
    }
}

#[cfg(test)]
pub(crate) fn ev(id: &str, offset_secs: f64) -> TimestampedEvent {
    TimestampedEvent {
        id: id.to_string(),
        offset_secs,
        payload: serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_ties() {
        let stream = EventStream::new(vec![ev("a", 1.0), ev("b", 1.0), ev("c", 2.0)]).unwrap();
        assert_eq!(stream.len(), 3);
    }

    #[test]
    fn test_new_rejects_bad_input() {
        assert!(matches!(
            EventStream::new(vec![ev("a", 2.0), ev("b", 1.0)]),
            Err(StreamError::OutOfOrder { .. })
        ));
        assert_eq!(
            EventStream::new(vec![ev("a", 1.0), ev("a", 2.0)]).unwrap_err(),
            StreamError::DuplicateId("a".into())
        );
        assert!(matches!(
            EventStream::new(vec![ev("a", f64::NAN)]),
            Err(StreamError::NonFiniteOffset { .. })
        ));
    }

    #[test]
    fn test_normalized_sorts_stably_and_dedups() {
        let stream = EventStream::normalized(vec![
            ev("late", 9.0),
            ev("x", 3.0),
            ev("y", 3.0),
            ev("x", 4.0),
            ev("nan", f64::NAN),
            ev("first", 0.5),
        ]);
        let ids: Vec<&str> = stream.events().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "x", "y", "late"]);
    }
}
