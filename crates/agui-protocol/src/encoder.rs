//! SSE framing for AG-UI events.

use std::convert::Infallible;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::warn;

use crate::events::Event;

pub const SSE_CONTENT_TYPE: &str = "text/event-stream";

/// Encodes AG-UI events as `data: {json}\n\n` frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventEncoder;

impl EventEncoder {
    pub fn new() -> Self {
        Self
    }

    pub fn content_type(&self) -> &'static str {
        SSE_CONTENT_TYPE
    }

    /// Encode one event as one frame.
    ///
    /// An event that cannot be serialized is replaced by a `RUN_ERROR` frame
    /// so the client still sees exactly one frame for it.
    pub fn encode(&self, event: &Event) -> Bytes {
        match serde_json::to_string(event) {
            Ok(json) => frame(&json),
            Err(e) => {
                warn!(error = %e, event_type = event.event_type(), "Failed to serialize AG-UI event");
                let fallback = serde_json::json!({
                    "type": "RUN_ERROR",
                    "message": format!("failed to encode {} event", event.event_type()),
                    "code": "encode_error",
                });
                frame(&fallback.to_string())
            }
        }
    }
}

fn frame(json: &str) -> Bytes {
    Bytes::from(format!("data: {json}\n\n"))
}

/// Lazily map an event stream to SSE body chunks, preserving order.
pub fn encode_stream<S>(events: S) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static
where
    S: Stream<Item = Event> + Send + 'static,
{
    let encoder = EventEncoder::new();
    events.map(move |event| Ok(encoder.encode(&event)))
}
