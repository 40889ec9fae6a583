//! Committed events as Server-Sent Events, for operators watching the shop.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;

use shopdesk_auth::permissions::ORDERS_MANAGE;
use shopdesk_events::{EventBus, EventEnvelope};

use crate::app::routes::common::require;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

const PREVIEW_MAX: usize = 500;
const HEARTBEAT_EVERY: Duration = Duration::from_secs(15);

/// GET /api/stream
///
/// Every event committed after the connection opens, with a payload
/// preview. Admin only.
pub async fn stream_events(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(resp) = require(&principal, ORDERS_MANAGE) {
        return resp;
    }

    let (tx, rx) = unbounded_channel::<Result<SseEvent, std::convert::Infallible>>();
    let subscription = services.backoffice.bus().subscribe();

    // The bus hands out blocking receivers; forward them from a blocking task.
    tokio::task::spawn_blocking(move || {
        let mut last_heartbeat = std::time::Instant::now();
        loop {
            match subscription.recv_timeout(Duration::from_secs(1)) {
                Ok(envelope) => {
                    let data = event_summary(&envelope).to_string();
                    if tx.send(Ok(SseEvent::default().event("event").data(data))).is_err() {
                        break;
                    }
                    last_heartbeat = std::time::Instant::now();
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if tx.is_closed() {
                        break;
                    }
                    if last_heartbeat.elapsed() > HEARTBEAT_EVERY {
                        if tx.send(Ok(SseEvent::default().event("heartbeat").data("{}"))).is_err() {
                            break;
                        }
                        last_heartbeat = std::time::Instant::now();
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(HEARTBEAT_EVERY))
        .into_response()
}

fn event_summary(envelope: &EventEnvelope<JsonValue>) -> JsonValue {
    serde_json::json!({
        "event_id": envelope.event_id().to_string(),
        "aggregate_id": envelope.aggregate_id().to_string(),
        "aggregate_type": envelope.aggregate_type(),
        "sequence_number": envelope.sequence_number(),
        "event_type": envelope.event_type(),
        "occurred_at": envelope.occurred_at().to_rfc3339(),
        "payload_preview": truncate_payload(envelope.payload()),
    })
}

/// First 500 characters of the payload, cut on a character boundary.
fn truncate_payload(payload: &JsonValue) -> String {
    let text = payload.to_string();
    match text.char_indices().nth(PREVIEW_MAX) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_payloads_are_truncated_on_char_boundaries() {
        let payload = JsonValue::String("₹".repeat(600));
        let preview = truncate_payload(&payload);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), PREVIEW_MAX + 3);

        assert_eq!(truncate_payload(&serde_json::json!({"a": 1})), r#"{"a":1}"#);
    }
}
