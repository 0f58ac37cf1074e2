//! Server-Sent Events line parser.
//!
//! Converts a byte stream (usually a `reqwest::Response` body) into a
//! `Stream<Item = SseEvent>`. Bytes are buffered until a full line is
//! available so multi-byte characters split across chunks survive.

use std::pin::Pin;

use futures::Stream;
use tokio_stream::StreamExt;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, String>> + Send>>;

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_stream(
    response: reqwest::Response,
) -> impl Stream<Item = anyhow::Result<SseEvent>> + Send {
    parse_sse_bytes(response.bytes_stream())
}

/// Parse any byte stream as SSE.
pub fn parse_sse_bytes<S, E>(bytes: S) -> impl Stream<Item = anyhow::Result<SseEvent>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display,
{
    let byte_stream: ByteStream = Box::pin(bytes.map(|r| r.map_err(|e| e.to_string())));

    futures::stream::unfold(
        SseState {
            byte_stream,
            buffer: Vec::new(),
            pending: PendingEvent::default(),
        },
        |mut state| async move {
            loop {
                if let Some(line) = state.take_line() {
                    if let Some(event) = state.pending.feed(&line) {
                        return Some((Ok(event), state));
                    }
                    continue;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        return Some((Err(anyhow::anyhow!("SSE stream error: {e}")), state));
                    }
                    None => {
                        // Stream ended: flush an unterminated last line, then any pending event.
                        if !state.buffer.is_empty() {
                            let line = String::from_utf8_lossy(&state.buffer).into_owned();
                            state.buffer.clear();
                            if let Some(event) = state.pending.feed(line.trim_end_matches('\r')) {
                                return Some((Ok(event), state));
                            }
                        }
                        return state.pending.dispatch().map(|event| (Ok(event), state));
                    }
                }
            }
        },
    )
}

struct SseState {
    byte_stream: ByteStream,
    buffer: Vec<u8>,
    pending: PendingEvent,
}

impl SseState {
    fn take_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|b| *b == b'\n')?;
        let rest = self.buffer.split_off(newline + 1);
        let line = std::mem::replace(&mut self.buffer, rest);
        let line = String::from_utf8_lossy(&line[..newline]);
        Some(line.trim_end_matches('\r').to_string())
    }
}

#[derive(Default)]
struct PendingEvent {
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl PendingEvent {
    /// Feed one line; returns an event when a blank line completes one.
    fn feed(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("event:") {
            self.event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            self.id = Some(value.trim_start().to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event = None;
            return None;
        }
        let event = SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
            id: self.id.take(),
        };
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<&'static [u8]>) -> Vec<SseEvent> {
        let stream = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(bytes::Bytes::from_static(c))),
        );
        let events = parse_sse_bytes(stream);
        let mut events = std::pin::pin!(events);
        let mut out = Vec::new();
        while let Some(event) = events.next().await {
            out.push(event.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let events = collect(vec![
            &b"data: {\"a\""[..],
            &b":1}\n\n: keep-alive\n\nevent: done\r\n"[..],
            &b"data: [DONE]\r\n\r\n"[..],
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[0].event, None);
        assert_eq!(events[1].event.as_deref(), Some("done"));
        assert_eq!(events[1].data, "[DONE]");
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        // "é" is 0xC3 0xA9
        let events = collect(vec![&b"data: caf\xC3"[..], &b"\xA9\n\n"[..]]).await;
        assert_eq!(events[0].data, "café");
    }

    #[tokio::test]
    async fn test_unterminated_last_event_is_flushed() {
        let events = collect(vec![&b"id: 7\ndata: line1\ndata: line2"[..]]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line1\nline2");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }
}
