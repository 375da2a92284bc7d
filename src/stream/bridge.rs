use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::protocol::anthropic::{
    BlockDelta, ErrorBody, MessageDeltaBody, MessageStartBody, ResponseContentBlock, StreamEvent,
    Usage,
};
use crate::protocol::mapping::{finish_reason_to_stop_reason, StopReason};
use crate::protocol::openai_chat::{ChatCompletionChunk, ChatToolCallDelta};

pub const CANCELLED_MESSAGE: &str = "Request was cancelled by client";

const TEXT_BLOCK_INDEX: usize = 0;

/// Lifecycle of one streamed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Init,
    Streaming,
    /// A finish reason was seen; waiting for end-of-stream (and a possible
    /// trailing usage chunk) before the closing frames go out.
    Draining,
    Closed,
}

/// Accumulates the fragments of one upstream tool call.
#[derive(Debug, Default)]
struct ToolCallBuffer {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    /// Assigned once, when both id and name are known.
    block_index: Option<usize>,
    json_sent: bool,
}

impl ToolCallBuffer {
    fn started(&self) -> bool {
        self.block_index.is_some()
    }
}

/// Per-request state machine turning upstream chunks into Messages stream
/// events.
///
/// Every method returns the events to emit, in order. Once `Closed`, every
/// method returns nothing.
#[derive(Debug)]
pub struct StreamBridge {
    message_id: String,
    model: String,
    state: BridgeState,
    stop_reason: StopReason,
    usage: Usage,
    tool_calls: FxHashMap<u32, ToolCallBuffer>,
    next_block_index: usize,
}

impl StreamBridge {
    #[must_use]
    pub fn new(message_id: String, model: String) -> Self {
        Self {
            message_id,
            model,
            state: BridgeState::Init,
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
            tool_calls: FxHashMap::default(),
            next_block_index: TEXT_BLOCK_INDEX + 1,
        }
    }

    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.state
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason
    }

    #[must_use]
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Emit the opening envelope: `message_start`, the text block start at
    /// index 0 and a `ping`.
    pub fn start(&mut self) -> Vec<StreamEvent> {
        if self.state != BridgeState::Init {
            return Vec::new();
        }
        self.state = BridgeState::Streaming;
        vec![
            StreamEvent::MessageStart {
                message: MessageStartBody {
                    id: self.message_id.clone(),
                    type_: "message".to_string(),
                    role: "assistant".to_string(),
                    model: self.model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage::default(),
                },
            },
            StreamEvent::ContentBlockStart {
                index: TEXT_BLOCK_INDEX,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            },
            StreamEvent::Ping {},
        ]
    }

    /// Fold one upstream chunk into the reply.
    pub fn push_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        match self.state {
            BridgeState::Closed => return out,
            BridgeState::Init => out.extend(self.start()),
            BridgeState::Streaming | BridgeState::Draining => {}
        }

        if let Some(usage) = &chunk.usage {
            self.usage.input_tokens = usage.prompt_tokens;
            self.usage.output_tokens = usage.completion_tokens;
            if let Some(cached) = usage.cached_tokens() {
                self.usage.cache_read_input_tokens = Some(cached);
            }
        }

        if self.state == BridgeState::Draining {
            return out;
        }

        let Some(choice) = chunk.choices.first() else {
            return out;
        };

        if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
            out.push(StreamEvent::ContentBlockDelta {
                index: TEXT_BLOCK_INDEX,
                delta: BlockDelta::TextDelta {
                    text: text.to_string(),
                },
            });
        }

        for delta in choice.delta.tool_calls.iter().flatten() {
            self.apply_tool_delta(delta, &mut out);
        }

        if let Some(reason) = choice.finish_reason.as_deref().filter(|r| !r.is_empty()) {
            self.stop_reason = finish_reason_to_stop_reason(Some(reason));
            self.state = BridgeState::Draining;
        }
        out
    }

    fn apply_tool_delta(&mut self, delta: &ChatToolCallDelta, out: &mut Vec<StreamEvent>) {
        let buffer = self.tool_calls.entry(delta.index).or_default();

        if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
            buffer.id.get_or_insert_with(|| id.to_string());
        }
        let function = delta.function.as_ref();
        if let Some(name) = function
            .and_then(|f| f.name.as_deref())
            .filter(|name| !name.is_empty())
        {
            buffer.name.get_or_insert_with(|| name.to_string());
        }

        if !buffer.started() {
            if let (Some(id), Some(name)) = (&buffer.id, &buffer.name) {
                let index = self.next_block_index;
                self.next_block_index += 1;
                buffer.block_index = Some(index);
                out.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseContentBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input: Value::Object(serde_json::Map::new()),
                    },
                });
            }
        }

        let Some(index) = buffer.block_index else {
            // Fragments before the block has started are dropped.
            return;
        };
        let Some(fragment) = function
            .and_then(|f| f.arguments.as_deref())
            .filter(|args| !args.is_empty())
        else {
            return;
        };
        buffer.arguments.push_str(fragment);
        if !buffer.json_sent && is_complete_object(&buffer.arguments) {
            buffer.json_sent = true;
            out.push(StreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::InputJsonDelta {
                    partial_json: buffer.arguments.clone(),
                },
            });
        }
    }

    /// Upstream end-of-stream. Closes every open tool block and emits the
    /// final `message_delta` / `message_stop`.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        match self.state {
            BridgeState::Closed => return out,
            BridgeState::Init => out.extend(self.start()),
            BridgeState::Streaming | BridgeState::Draining => {}
        }

        let mut started: Vec<usize> = self
            .tool_calls
            .values()
            .filter_map(|buffer| buffer.block_index)
            .collect();
        started.sort_unstable();
        out.extend(
            started
                .into_iter()
                .map(|index| StreamEvent::ContentBlockStop { index }),
        );

        out.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(self.stop_reason.as_str().to_string()),
                stop_sequence: None,
            },
            usage: self.usage.clone(),
        });
        out.push(StreamEvent::MessageStop {});
        self.state = BridgeState::Closed;
        out
    }

    /// Upstream failure: one `streaming_error` event, no closing frames.
    ///
    /// Once a finish reason has arrived the turn is complete, so the normal
    /// closing frames go out instead.
    pub fn fail(&mut self, message: impl Into<String>) -> Vec<StreamEvent> {
        self.terminate("streaming_error", message.into())
    }

    /// Caller cancellation: one `cancelled` event, no closing frames.
    ///
    /// Like [`Self::fail`], a turn already in `Draining` closes normally.
    pub fn cancel(&mut self) -> Vec<StreamEvent> {
        self.terminate("cancelled", CANCELLED_MESSAGE.to_string())
    }

    fn terminate(&mut self, kind: &str, message: String) -> Vec<StreamEvent> {
        match self.state {
            BridgeState::Closed => return Vec::new(),
            BridgeState::Draining => return self.finish(),
            BridgeState::Init | BridgeState::Streaming => {}
        }
        self.state = BridgeState::Closed;
        vec![StreamEvent::Error {
            error: ErrorBody {
                type_: kind.to_string(),
                message,
            },
        }]
    }
}

fn is_complete_object(buffer: &str) -> bool {
    matches!(serde_json::from_str::<Value>(buffer), Ok(Value::Object(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(value: Value) -> ChatCompletionChunk {
        serde_json::from_value(value).unwrap()
    }

    fn text(content: &str) -> ChatCompletionChunk {
        chunk(json!({"choices": [{"index": 0, "delta": {"content": content}}]}))
    }

    fn tool(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> ChatCompletionChunk {
        let mut call = json!({"index": index, "function": {"arguments": args}});
        if let Some(id) = id {
            call["id"] = json!(id);
            call["type"] = json!("function");
        }
        if let Some(name) = name {
            call["function"]["name"] = json!(name);
        }
        chunk(json!({"choices": [{"index": 0, "delta": {"tool_calls": [call]}}]}))
    }

    fn finish(reason: &str) -> ChatCompletionChunk {
        chunk(json!({"choices": [{"index": 0, "delta": {}, "finish_reason": reason}]}))
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::event_name).collect()
    }

    fn bridge() -> StreamBridge {
        StreamBridge::new("msg_test".into(), "claude-3-5-sonnet".into())
    }

    #[test]
    fn test_start_envelope() {
        let mut b = bridge();
        let events = b.start();
        assert_eq!(names(&events), ["message_start", "content_block_start", "ping"]);
        match &events[0] {
            StreamEvent::MessageStart { message } => {
                assert_eq!(message.id, "msg_test");
                assert_eq!(message.model, "claude-3-5-sonnet");
                assert!(message.content.is_empty());
                assert_eq!(message.usage, Usage::default());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(b.state(), BridgeState::Streaming);
        assert!(b.start().is_empty());
    }

    #[test]
    fn test_text_stream_envelope_order() {
        let mut b = bridge();
        let mut events = b.start();
        events.extend(b.push_chunk(&text("Hel")));
        events.extend(b.push_chunk(&text("")));
        events.extend(b.push_chunk(&text("lo")));
        events.extend(b.push_chunk(&finish("stop")));
        assert_eq!(b.state(), BridgeState::Draining);
        events.extend(b.push_chunk(&chunk(json!({
            "choices": [],
            "usage": {"prompt_tokens": 9, "completion_tokens": 2}
        }))));
        events.extend(b.finish());
        assert_eq!(
            names(&events),
            [
                "message_start",
                "content_block_start",
                "ping",
                "content_block_delta",
                "content_block_delta",
                "message_delta",
                "message_stop"
            ]
        );
        match &events[5] {
            StreamEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason.as_deref(), Some("end_turn"));
                assert!(delta.stop_sequence.is_none());
                assert_eq!(usage.input_tokens, 9);
                assert_eq!(usage.output_tokens, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(b.state(), BridgeState::Closed);
    }

    #[test]
    fn test_single_partial_json_after_fragments_parse() {
        let mut b = bridge();
        b.start();
        let started = b.push_chunk(&tool(0, Some("call_1"), Some("get_weather"), ""));
        assert_eq!(names(&started), ["content_block_start"]);
        assert!(b.push_chunk(&tool(0, None, None, "{\"ci")).is_empty());
        assert!(b.push_chunk(&tool(0, None, None, "ty\": \"Par")).is_empty());
        let done = b.push_chunk(&tool(0, None, None, "is\"}"));
        assert_eq!(
            done,
            vec![StreamEvent::ContentBlockDelta {
                index: 1,
                delta: BlockDelta::InputJsonDelta {
                    partial_json: "{\"city\": \"Paris\"}".into()
                }
            }]
        );
        // Later fragments never produce a second delta.
        assert!(b.push_chunk(&tool(0, None, None, " ")).is_empty());

        b.push_chunk(&finish("tool_calls"));
        let closing = b.finish();
        assert_eq!(
            closing[0],
            StreamEvent::ContentBlockStop { index: 1 },
            "tool stop precedes message_delta"
        );
        match &closing[1] {
            StreamEvent::MessageDelta { delta, .. } => {
                assert_eq!(delta.stop_reason.as_deref(), Some("tool_use"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_block_starts_once_id_and_name_known() {
        let mut b = bridge();
        b.start();
        assert!(b.push_chunk(&tool(0, Some("call_1"), None, "")).is_empty());
        // Arguments before the block starts are dropped.
        assert!(b.push_chunk(&tool(0, None, None, "{\"a\":")).is_empty());
        let events = b.push_chunk(&tool(0, Some("call_ignored"), Some("f"), "{}"));
        assert_eq!(names(&events), ["content_block_start", "content_block_delta"]);
        match &events[0] {
            StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseContentBlock::ToolUse { id, name, input },
            } => {
                assert_eq!(*index, 1);
                assert_eq!(id, "call_1");
                assert_eq!(name, "f");
                assert_eq!(input, &json!({}));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_tool_indices_follow_discovery_order() {
        let mut b = bridge();
        b.start();
        let first = b.push_chunk(&tool(3, Some("call_b"), Some("second_upstream"), ""));
        let second = b.push_chunk(&tool(0, Some("call_a"), Some("first_upstream"), ""));
        assert!(matches!(first[0], StreamEvent::ContentBlockStart { index: 1, .. }));
        assert!(matches!(second[0], StreamEvent::ContentBlockStart { index: 2, .. }));

        let closing = b.finish();
        assert_eq!(
            names(&closing),
            ["content_block_stop", "content_block_stop", "message_delta", "message_stop"]
        );
        assert_eq!(closing[0], StreamEvent::ContentBlockStop { index: 1 });
        assert_eq!(closing[1], StreamEvent::ContentBlockStop { index: 2 });
    }

    #[test]
    fn test_unstarted_tool_gets_no_stop() {
        let mut b = bridge();
        b.start();
        b.push_chunk(&tool(0, Some("call_1"), None, ""));
        let closing = b.finish();
        assert_eq!(names(&closing), ["message_delta", "message_stop"]);
    }

    #[test]
    fn test_eof_without_finish_reason_ends_turn() {
        let mut b = bridge();
        b.start();
        b.push_chunk(&text("partial"));
        let closing = b.finish();
        match &closing[0] {
            StreamEvent::MessageDelta { delta, .. } => {
                assert_eq!(delta.stop_reason.as_deref(), Some("end_turn"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_length_maps_to_max_tokens() {
        let mut b = bridge();
        b.start();
        b.push_chunk(&finish("length"));
        assert_eq!(b.stop_reason(), StopReason::MaxTokens);
    }

    #[test]
    fn test_deltas_after_finish_are_ignored() {
        let mut b = bridge();
        b.start();
        b.push_chunk(&finish("stop"));
        assert!(b.push_chunk(&text("late")).is_empty());
    }

    #[test]
    fn test_usage_last_write_wins_and_keeps_cached() {
        let mut b = bridge();
        b.start();
        b.push_chunk(&chunk(json!({"choices": [], "usage": {
            "prompt_tokens": 5, "completion_tokens": 1,
            "prompt_tokens_details": {"cached_tokens": 4}}})));
        b.push_chunk(&chunk(json!({"choices": [], "usage": {
            "prompt_tokens": 6, "completion_tokens": 7}})));
        assert_eq!(b.usage().input_tokens, 6);
        assert_eq!(b.usage().output_tokens, 7);
        assert_eq!(b.usage().cache_read_input_tokens, Some(4));
    }

    #[test]
    fn test_upstream_error_emits_single_event() {
        let mut b = bridge();
        b.start();
        b.push_chunk(&tool(0, Some("call_1"), Some("f"), ""));
        let events = b.fail("connection reset");
        assert_eq!(
            events,
            vec![StreamEvent::Error {
                error: ErrorBody {
                    type_: "streaming_error".into(),
                    message: "connection reset".into()
                }
            }]
        );
        assert_eq!(b.state(), BridgeState::Closed);
        assert!(b.finish().is_empty());
        assert!(b.push_chunk(&text("x")).is_empty());
    }

    #[test]
    fn test_cancel_emits_single_event_and_nothing_after() {
        let mut b = bridge();
        b.start();
        b.push_chunk(&text("some"));
        let events = b.cancel();
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Error { error } => {
                assert_eq!(error.type_, "cancelled");
                assert_eq!(error.message, CANCELLED_MESSAGE);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(b.cancel().is_empty());
        assert!(b.fail("late").is_empty());
        assert!(b.finish().is_empty());
    }

    #[test]
    fn test_fail_after_finish_reason_closes_normally() {
        let mut b = bridge();
        b.start();
        b.push_chunk(&tool(0, Some("call_1"), Some("f"), "{}"));
        b.push_chunk(&finish("tool_calls"));
        assert_eq!(b.state(), BridgeState::Draining);

        let events = b.fail("connection reset");
        assert_eq!(names(&events), ["content_block_stop", "message_delta", "message_stop"]);
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Error { .. })));
        match &events[1] {
            StreamEvent::MessageDelta { delta, .. } => {
                assert_eq!(delta.stop_reason.as_deref(), Some("tool_use"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(b.state(), BridgeState::Closed);
        assert!(b.fail("again").is_empty());
    }

    #[test]
    fn test_cancel_after_finish_reason_closes_normally() {
        let mut b = bridge();
        b.start();
        b.push_chunk(&text("done"));
        b.push_chunk(&finish("stop"));

        let events = b.cancel();
        assert_eq!(names(&events), ["message_delta", "message_stop"]);
        assert_eq!(b.state(), BridgeState::Closed);
        assert!(b.cancel().is_empty());
        assert!(b.finish().is_empty());
    }

    #[test]
    fn test_non_object_arguments_never_sent() {
        let mut b = bridge();
        b.start();
        b.push_chunk(&tool(0, Some("c"), Some("f"), ""));
        assert!(b.push_chunk(&tool(0, None, None, "42")).is_empty());
    }
}
