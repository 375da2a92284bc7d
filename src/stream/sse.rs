//! SSE (Server-Sent Events) frame parser and the upstream chunk stream.
//!
//! Handles the low-level parsing of SSE frames from a byte stream,
//! including buffering partial lines and handling field semantics per the
//! [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html).
use std::collections::VecDeque;
use std::fmt::Display;

use futures_util::{Stream, StreamExt};
use memchr::memchr_iter;
use tracing::warn;

use crate::error::BridgeError;
use crate::protocol::openai_chat::stream::{parse_chunk_payload, ChunkPayload};
use crate::protocol::openai_chat::ChatCompletionChunk;

/// One dispatched SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE line parser.
///
/// Feed it raw text chunks (potentially arriving in arbitrary byte
/// boundaries) and it yields fully-assembled [`SseEvent`] frames.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and return any complete events parsed.
    ///
    /// - `event:` sets the event type for the next frame
    /// - `data:` appends to the data buffer (one leading space stripped);
    ///   multiple `data:` lines are joined with `\n`
    /// - an empty line terminates a frame
    /// - `:` comments and unknown fields are ignored
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if self.read_offset < self.buffer.len() {
            let rest = self.buffer[self.read_offset..].to_string();
            self.buffer.clear();
            self.read_offset = 0;
            let mut out = Vec::new();
            Self::process_line(
                rest.trim_end_matches('\r'),
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                &mut out,
            );
        }
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(SseEvent {
            event: self.event_type.take(),
            data: std::mem::take(&mut self.data_buffer),
        })
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        events: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            if *has_data {
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                });
                *has_data = false;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *event_type = Some(value.to_string());
        }
    }
}

/// Carries bytes that end mid-way through a UTF-8 sequence over to the next
/// network chunk.
#[derive(Debug, Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                // Incomplete trailing sequence: keep it for the next chunk.
                Err(err) if err.error_len().is_none() => {
                    let valid_up_to = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    self.pending.drain(..valid_up_to);
                    return text;
                }
                // Invalid sequence: replace just that span and keep scanning.
                Err(err) => {
                    let end = err.valid_up_to() + err.error_len().unwrap_or(1);
                    text.push_str(&String::from_utf8_lossy(&self.pending[..end]));
                    self.pending.drain(..end);
                }
            }
        }
    }
}

struct ChunkStreamState<S> {
    bytes: std::pin::Pin<Box<S>>,
    parser: SseParser,
    utf8: Utf8Carry,
    parsed: Vec<SseEvent>,
    pending: VecDeque<SseEvent>,
    done: bool,
}

/// What one SSE event means for the chunk stream.
enum Decoded {
    Chunk(ChatCompletionChunk),
    Done,
    Failed(BridgeError),
}

fn decode_event(event: &SseEvent) -> Decoded {
    match parse_chunk_payload(&event.data) {
        ChunkPayload::Chunk(chunk) => Decoded::Chunk(*chunk),
        ChunkPayload::Done => Decoded::Done,
        ChunkPayload::UpstreamError(message) => {
            warn!(error = %message, "upstream reported an error mid-stream");
            Decoded::Failed(BridgeError::Transport(format!(
                "upstream stream error: {message}"
            )))
        }
        ChunkPayload::Invalid(err) => {
            warn!(error = %err, data_len = event.data.len(), "unparseable upstream SSE payload");
            Decoded::Failed(BridgeError::Transport(format!(
                "invalid upstream SSE payload: {err}"
            )))
        }
    }
}

/// Decode a Chat Completions SSE byte stream into typed chunks.
///
/// `data: [DONE]` and a clean end of the byte stream both end the chunk
/// stream. Transport errors, `{"error": ...}` frames and unparseable payloads
/// surface as a single `Err` item, after which the stream ends.
pub fn chat_chunk_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<ChatCompletionChunk, BridgeError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = ChunkStreamState {
        bytes: Box::pin(byte_stream),
        parser: SseParser::new(),
        utf8: Utf8Carry::default(),
        parsed: Vec::with_capacity(8),
        pending: VecDeque::with_capacity(8),
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }
            while let Some(event) = st.pending.pop_front() {
                match decode_event(&event) {
                    Decoded::Chunk(chunk) => return Some((Ok(chunk), st)),
                    Decoded::Done => {
                        st.done = true;
                        return None;
                    }
                    Decoded::Failed(err) => {
                        st.done = true;
                        return Some((Err(err), st));
                    }
                }
            }

            match st.bytes.as_mut().next().await {
                Some(Ok(bytes)) => {
                    let text = st.utf8.decode(&bytes);
                    st.parser.feed_into(&text, &mut st.parsed);
                    st.pending.extend(st.parsed.drain(..));
                }
                Some(Err(err)) => {
                    st.done = true;
                    return Some((
                        Err(BridgeError::Transport(format!("upstream stream error: {err}"))),
                        st,
                    ));
                }
                None => {
                    st.done = true;
                    return match st.parser.finish().as_ref().map(decode_event) {
                        Some(Decoded::Chunk(chunk)) => Some((Ok(chunk), st)),
                        Some(Decoded::Failed(err)) => Some((Err(err), st)),
                        Some(Decoded::Done) | None => None,
                    };
                }
            }
        }
    })
}
