//! Server-sent-event line parser for upstream provider responses.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_stream::StreamExt;

use crate::ProviderError;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = anyhow::Result<SseEvent>> + Send + 'static {
    parse_sse_bytes(response.bytes_stream())
}

/// Parse any byte stream as SSE.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network chunks decode correctly.
pub fn parse_sse_bytes<S, E>(bytes: S) -> impl Stream<Item = anyhow::Result<SseEvent>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(bytes.map(|r| r.map_err(|e| e.to_string()))),
        buffer: Vec::new(),
        pending: PendingEvent::default(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = state.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
                let line = line.trim_end_matches('\r');
                if let Some(event) = state.pending.feed(line) {
                    return Some((Ok(event), state));
                }
                continue;
            }

            if state.done {
                // A final event without its blank line still counts.
                if !state.buffer.is_empty() {
                    let raw = std::mem::take(&mut state.buffer);
                    let line = String::from_utf8_lossy(&raw).into_owned();
                    state.pending.feed(line.trim_end_matches('\r'));
                }
                return state.pending.take().map(|event| (Ok(event), state));
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.done = true;
                    state.buffer.clear();
                    state.pending = PendingEvent::default();
                    return Some((Err(ProviderError::Stream(e).into()), state));
                }
                None => state.done = true,
            }
        }
    })
}

struct SseState {
    bytes: Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>,
    buffer: Vec<u8>,
    pending: PendingEvent,
    done: bool,
}

#[derive(Default)]
struct PendingEvent {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl PendingEvent {
    /// Feed one line; a blank line dispatches the accumulated event.
    fn feed(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn take(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        let pending = std::mem::take(self);
        Some(SseEvent {
            event: pending.event,
            data: pending.data.join("\n"),
            id: pending.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    async fn collect(chunks: Vec<&'static [u8]>) -> Vec<anyhow::Result<SseEvent>> {
        let bytes = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c))),
        );
        parse_sse_bytes(bytes).collect().await
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let events = collect(vec![
            b"data: {\"a\":".as_slice(),
            b"1}\n\nevent: done\nda".as_slice(),
            b"ta: x\n\n".as_slice(),
        ]).await;
        let events: Vec<SseEvent> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, r#"{"a":1}"#);
        assert_eq!(events[0].event, None);
        assert_eq!(events[1].event.as_deref(), Some("done"));
        assert_eq!(events[1].data, "x");
    }

    #[tokio::test]
    async fn test_multibyte_utf8_split() {
        // "é" is 0xC3 0xA9
        let events = collect(vec![b"data: caf\xC3".as_slice(), b"\xA9\n\n".as_slice()]).await;
        assert_eq!(events[0].as_ref().unwrap().data, "café");
    }

    #[tokio::test]
    async fn test_comments_crlf_and_multiline_data() {
        let events = collect(vec![b": keepalive\r\ndata: one\r\ndata: two\r\nid: 7\r\n\r\n".as_slice()]).await;
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.data, "one\ntwo");
        assert_eq!(event.id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_trailing_event_without_blank_line() {
        let events = collect(vec![b"data: last".as_slice()]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "last");
    }

    #[tokio::test]
    async fn test_stream_error_ends_stream() {
        let bytes = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"data: ok\n\n")),
            Err("connection reset"),
        ]);
        let events: Vec<_> = parse_sse_bytes(bytes).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        let err = events[1].as_ref().unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
