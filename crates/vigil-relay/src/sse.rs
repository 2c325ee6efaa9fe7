//! Agent service event-stream decoding.
//!
//! The agent service answers `POST /user_message/stream` with
//! `text/event-stream` frames of the form `event: token\ndata: <json>\n\n`.
//! Only the JSON payload's `type` field is meaningful; the event name is
//! ignored.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Future, Stream, StreamExt};
use serde::Deserialize;

use vigil_core::errors::UpstreamError;
use vigil_core::steps::{ReasoningStep, StepKind, UpstreamEvent};

const DEFAULT_PROGRESS_TEXT: &str = "Processing...";
const DEFAULT_FINAL_TEXT: &str = "No response available";
const DEFAULT_ERROR_TEXT: &str = "Unknown agent error";

/// Collect the `data:` payloads of every complete SSE event in `raw`.
///
/// Multiple `data:` lines in one event are joined with `\n`. A trailing event
/// without its blank-line terminator is still returned.
pub fn parse_sse_data(raw: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if let Some(data) = current.take() {
                payloads.push(data);
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            match current.as_mut() {
                Some(buf) => {
                    buf.push('\n');
                    buf.push_str(data);
                }
                None => current = Some(data.to_string()),
            }
        }
        // `event:`, `id:`, `retry:` and `:` comments carry nothing we use.
    }

    if let Some(data) = current {
        payloads.push(data);
    }
    payloads
}

#[derive(Debug, Deserialize)]
struct UpstreamPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_args: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
}

/// Result of decoding one `data:` payload.
#[derive(Debug, PartialEq)]
pub enum Decoded {
    Event(UpstreamEvent),
    /// Well-formed JSON with a `type` this gateway does not know.
    Unknown(String),
    /// Not JSON, or JSON without a string `type`.
    Malformed(String),
}

pub fn decode_payload(data: &str) -> Decoded {
    let payload: UpstreamPayload = match serde_json::from_str(data) {
        Ok(p) => p,
        Err(e) => return Decoded::Malformed(e.to_string()),
    };

    match payload.kind.as_str() {
        "final_response" => Decoded::Event(UpstreamEvent::Final {
            content: payload.content.unwrap_or_else(|| DEFAULT_FINAL_TEXT.to_string()),
            title: payload.title.filter(|t| !t.trim().is_empty()),
        }),
        "error" => Decoded::Event(UpstreamEvent::Error {
            message: payload
                .content
                .or(payload.message)
                .unwrap_or_else(|| DEFAULT_ERROR_TEXT.to_string()),
        }),
        other => match other.parse::<StepKind>() {
            Ok(kind) => {
                let text = payload
                    .message
                    .or(payload.content)
                    .unwrap_or_else(|| DEFAULT_PROGRESS_TEXT.to_string());
                let mut step = ReasoningStep::new(kind, text);
                step.tool_name = payload.tool_name;
                step.tool_args = payload.tool_args;
                Decoded::Event(UpstreamEvent::Step(step))
            }
            Err(_) => Decoded::Unknown(other.to_string()),
        },
    }
}

/// Byte stream → parsed upstream events, with an idle timeout.
///
/// Malformed or unknown payloads are logged and skipped. A transport error or
/// `idle_duration` without any bytes yields `StreamInterrupted`.
pub struct UpstreamStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>,
    buffer: Vec<u8>,
    pending: VecDeque<UpstreamEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    finished: bool,
}

impl UpstreamStream {
    pub fn new<S, E>(byte_stream: S, idle_timeout: Duration) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        Self {
            inner: Box::pin(byte_stream.map(|r| r.map_err(|e| e.to_string()))),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            finished: false,
        }
    }

    /// Move every complete event out of the byte buffer into `pending`.
    fn drain_complete_events(&mut self) {
        while let Some(end) = find_event_boundary(&self.buffer) {
            let chunk: Vec<u8> = self.buffer.drain(..end).collect();
            self.decode_chunk(&String::from_utf8_lossy(&chunk));
        }
    }

    fn decode_chunk(&mut self, chunk: &str) {
        for data in parse_sse_data(chunk) {
            match decode_payload(&data) {
                Decoded::Event(event) => self.pending.push_back(event),
                Decoded::Unknown(kind) => {
                    tracing::warn!(kind = %kind, "skipping upstream frame with unknown type");
                }
                Decoded::Malformed(detail) => {
                    tracing::warn!(
                        error = %detail,
                        data = %data,
                        "skipping malformed upstream frame"
                    );
                }
            }
        }
    }
}

/// Index just past the first blank-line terminator (`\n\n` or `\r\n\r\n`).
fn find_event_boundary(buf: &[u8]) -> Option<usize> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| p + 2);
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

impl Stream for UpstreamStream {
    type Item = Result<UpstreamEvent, UpstreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(event) = self.pending.pop_front() {
            return Poll::Ready(Some(Ok(event)));
        }
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    self.buffer.extend_from_slice(&bytes);
                    self.drain_complete_events();

                    if let Some(event) = self.pending.pop_front() {
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(UpstreamError::StreamInterrupted(e))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        let rest = std::mem::take(&mut self.buffer);
                        self.decode_chunk(&String::from_utf8_lossy(&rest));
                    }
                    return Poll::Ready(self.pending.pop_front().map(Ok));
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.finished = true;
                        return Poll::Ready(Some(Err(UpstreamError::StreamInterrupted(format!(
                            "idle timeout after {}s",
                            self.idle_duration.as_secs()
                        )))));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
