use serde_json::{json, Map, Value};

use crate::protocol::anthropic::{MessagesRequest, MessagesResponse, ResponseContentBlock};
use crate::protocol::mapping::{chat_usage_to_usage, finish_reason_to_stop_reason};
use crate::protocol::openai_chat::ChatCompletionResponse;

pub const NO_CHOICES_MESSAGE: &str = "No choices in upstream response";

/// Outcome of assembling a complete upstream response.
#[derive(Debug, Clone)]
pub enum AssembledReply {
    Message(MessagesResponse),
    /// The upstream reply carried nothing to assemble; the payload is
    /// returned to the caller as-is.
    Error(Value),
}

/// Parse tool-call arguments into an input object. Anything that is not a
/// JSON object is preserved under `raw_input`.
#[must_use]
pub fn parse_tool_arguments(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(value @ Value::Object(_)) => value,
        _ => {
            let mut raw = Map::new();
            raw.insert("raw_input".to_string(), Value::String(arguments.to_string()));
            Value::Object(raw)
        }
    }
}

/// Build a Messages reply from a complete Chat Completions response.
///
/// Only the first choice is used. `fallback_id` is consulted when the upstream
/// response carries no id.
pub fn assemble_response<F>(
    upstream: &ChatCompletionResponse,
    request: &MessagesRequest,
    fallback_id: F,
) -> AssembledReply
where
    F: FnOnce() -> String,
{
    let Some(choice) = upstream.choices.first() else {
        return AssembledReply::Error(json!({ "error": NO_CHOICES_MESSAGE }));
    };

    let mut content = Vec::new();
    if let Some(text) = choice.message.content.as_deref().filter(|t| !t.is_empty()) {
        content.push(ResponseContentBlock::Text {
            text: text.to_string(),
        });
    }
    for call in choice.message.tool_calls.iter().flatten() {
        if !call.is_function() {
            continue;
        }
        content.push(ResponseContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input: parse_tool_arguments(&call.function.arguments),
        });
    }
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let id = if upstream.id.is_empty() {
        fallback_id()
    } else {
        upstream.id.clone()
    };

    AssembledReply::Message(MessagesResponse {
        id,
        type_: "message".to_string(),
        role: "assistant".to_string(),
        model: request.model.clone(),
        content,
        stop_reason: Some(
            finish_reason_to_stop_reason(choice.finish_reason.as_deref())
                .as_str()
                .to_string(),
        ),
        stop_sequence: None,
        usage: upstream
            .usage
            .as_ref()
            .map(chat_usage_to_usage)
            .unwrap_or_default(),
    })
}
