use bytes::Bytes;

use super::StreamEvent;

const ENCODE_FAILURE_FRAME: &str = "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"api_error\",\"message\":\"failed to encode stream event\"}}\n\n";

/// Encode a stream event as one named SSE frame:
/// `event: <name>\ndata: <json>\n\n`.
#[must_use]
pub fn encode_stream_event(event: &StreamEvent) -> Bytes {
    let name = event.event_name();
    let mut out = Vec::with_capacity(64 + name.len());
    out.extend_from_slice(b"event: ");
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b"\ndata: ");
    if let Err(err) = serde_json::to_writer(&mut out, event) {
        tracing::error!(error = %err, event = name, "failed to encode stream event");
        return Bytes::from_static(ENCODE_FAILURE_FRAME.as_bytes());
    }
    out.extend_from_slice(b"\n\n");
    Bytes::from(out)
}
