use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;

use shopdesk_core::AggregateId;
use shopdesk_events::EventEnvelope;

use super::ProjectionError;

/// Last applied sequence number per stream.
///
/// Makes projections idempotent under redelivery and detects gaps: an
/// envelope at or below the cursor is skipped, one that is not exactly
/// `last + 1` is rejected.
#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<AggregateId, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, aggregate_id: AggregateId) -> u64 {
        match self.inner.read() {
            Ok(cursors) => cursors.get(&aggregate_id).copied().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// `Ok(true)` when the envelope is the next one for its stream.
    pub fn admit(&self, envelope: &EventEnvelope<JsonValue>) -> Result<bool, ProjectionError> {
        let aggregate_id = envelope.aggregate_id();
        let found = envelope.sequence_number();
        let last = self.position(aggregate_id);

        if found <= last {
            return Ok(false);
        }
        if found != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence {
                aggregate_id,
                last,
                found,
            });
        }
        Ok(true)
    }

    pub fn advance(&self, aggregate_id: AggregateId, sequence_number: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert(aggregate_id, sequence_number);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn envelope(aggregate_id: AggregateId, seq: u64) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(Uuid::now_v7(), aggregate_id, "t", seq, "t.x", Utc::now(), JsonValue::Null)
    }

    #[test]
    fn duplicates_are_skipped_and_gaps_rejected() {
        let cursors = StreamCursors::new();
        let id = AggregateId::new();

        assert!(cursors.admit(&envelope(id, 1)).unwrap());
        cursors.advance(id, 1);

        assert!(!cursors.admit(&envelope(id, 1)).unwrap());
        assert!(matches!(
            cursors.admit(&envelope(id, 3)),
            Err(ProjectionError::NonMonotonicSequence { last: 1, found: 3, .. })
        ));
    }
}
