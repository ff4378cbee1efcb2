//! Server-sent events plumbing shared by the streaming adapters.
//!
//! [`SseParser`] turns raw body bytes into events; [`spawn_stream`] drives a
//! response body through a vendor-specific [`StreamParser`] on a background
//! task and forwards the resulting chunks over a bounded channel.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{trace, warn};
use writingway_core::error::ProviderError;
use writingway_core::provider::{ChunkReceiver, StreamChunk, VendorFailure};

/// One complete SSE event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    /// The `event:` field, if the vendor sends typed events.
    pub event: Option<String>,
    /// All `data:` lines of the event, joined with `\n`.
    pub data: String,
}

/// Incremental SSE parser.
///
/// Buffers bytes so that a UTF-8 sequence or a line split across network
/// chunks is reassembled before parsing. A blank line ends an event.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);

            if line.is_empty() {
                if let Some(event) = self.take_event() {
                    out.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line.as_ref(), ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        out
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        // The buffer never holds a newline here, so this completes one line.
        if !self.buf.is_empty() {
            self.push(b"\n");
        }
        self.take_event()
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        Some(SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Vendor-specific interpretation of SSE events.
pub trait StreamParser: Send + 'static {
    /// Chunks produced by one event. A chunk with `done = true` ends the stream.
    fn on_event(&mut self, event: &SseEvent) -> Result<Vec<StreamChunk>, VendorFailure>;

    /// The final chunk when the body ends without a terminal event.
    fn on_end(&mut self) -> Result<StreamChunk, VendorFailure> {
        Ok(StreamChunk::finished(None))
    }
}

/// Drive `response` through `parser` on a background task.
///
/// `idle_timeout` bounds the wait for each network read. Failures are
/// classified with `classify` so the receiver only ever sees the generic
/// taxonomy. Dropping the receiver stops the task at its next send.
pub fn spawn_stream<P>(
    response: reqwest::Response,
    provider: String,
    idle_timeout: Duration,
    mut parser: P,
    classify: fn(VendorFailure, &str) -> ProviderError,
) -> ChunkReceiver
where
    P: StreamParser,
{
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut sse = SseParser::new();

        loop {
            let next = match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let failure = VendorFailure::Transport {
                        message: format!("no data for {}s", idle_timeout.as_secs()),
                        timed_out: true,
                    };
                    let _ = tx.send(Err(classify(failure, &provider))).await;
                    return;
                }
            };

            let events = match next {
                Some(Ok(bytes)) => sse.push(&bytes),
                Some(Err(e)) => {
                    let failure = VendorFailure::Transport {
                        message: format!("stream interrupted: {e}"),
                        timed_out: e.is_timeout(),
                    };
                    let _ = tx.send(Err(classify(failure, &provider))).await;
                    return;
                }
                None => {
                    let mut tail = Vec::new();
                    if let Some(event) = sse.finish() {
                        tail.push(event);
                    }
                    for event in tail {
                        if !forward(&tx, &mut parser, &event, &provider, classify).await {
                            return;
                        }
                    }
                    let last = parser.on_end().map_err(|f| classify(f, &provider));
                    let _ = tx.send(last).await;
                    return;
                }
            };

            for event in events {
                if !forward(&tx, &mut parser, &event, &provider, classify).await {
                    return;
                }
            }
        }
    });

    rx
}

/// Returns `false` once the stream is over (finished, failed or abandoned).
async fn forward<P: StreamParser>(
    tx: &mpsc::Sender<Result<StreamChunk, ProviderError>>,
    parser: &mut P,
    event: &SseEvent,
    provider: &str,
    classify: fn(VendorFailure, &str) -> ProviderError,
) -> bool {
    match parser.on_event(event) {
        Ok(chunks) => {
            for chunk in chunks {
                let done = chunk.done;
                if tx.send(Ok(chunk)).await.is_err() {
                    trace!(provider, "Stream receiver dropped");
                    return false;
                }
                if done {
                    return false;
                }
            }
            true
        }
        Err(failure) => {
            let err = classify(failure, provider);
            warn!(provider, error = %err, "Stream event rejected");
            let _ = tx.send(Err(err)).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_only_events() {
        let mut p = SseParser::new();
        let events = p.push(b"data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[0].event, None);
        assert_eq!(events[1].data, "[DONE]");
    }

    #[test]
    fn parses_typed_events() {
        let mut p = SseParser::new();
        let events = p.push(b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_stop"));
    }

    #[test]
    fn reassembles_split_chunks() {
        let mut p = SseParser::new();
        assert!(p.push(b"data: {\"te").is_empty());
        assert!(p.push(b"xt\":\"caf\xc3").is_empty());
        let events = p.push(b"\xa9\"}\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"text\":\"café\"}");
    }

    #[test]
    fn ignores_comments_and_joins_multiline_data() {
        let mut p = SseParser::new();
        let events = p.push(b": keep-alive\ndata: line one\ndata: line two\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut p = SseParser::new();
        assert!(p.push(b"data: tail").is_empty());
        let event = p.finish().unwrap();
        assert_eq!(event.data, "tail");
        assert!(p.finish().is_none());
    }
}
