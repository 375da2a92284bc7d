//! Flattening of block-structured content into role-message strings.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::protocol::anthropic::{ContentBlock, MessageContent, SystemPrompt, ToolResultContent};
use crate::protocol::openai_chat::ChatToolCall;

const NO_TOOL_CONTENT: &str = "No content provided";
const UNPARSEABLE_TOOL_CONTENT: &str = "Unparseable content";

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum UserPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: String },
}

/// Collapse a system prompt into one trimmed string.
///
/// Block lists contribute the `text` of their `type: "text"` entries, joined
/// with a blank line. Anything else yields an empty string.
#[must_use]
pub fn normalize_system(system: &SystemPrompt) -> String {
    match system {
        SystemPrompt::Text(text) => text.trim().to_string(),
        SystemPrompt::Blocks(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect();
            parts.join("\n\n").trim().to_string()
        }
        SystemPrompt::Other(_) => String::new(),
    }
}

/// Render user content as the single content string of a user message.
///
/// A lone text element becomes a bare string; any other mix of text and
/// images is serialized as a JSON array of parts inside the string.
#[must_use]
pub fn normalize_user_content(content: &MessageContent) -> Option<String> {
    let blocks = match content {
        MessageContent::Text(text) => return Some(text.clone()),
        MessageContent::Blocks(blocks) => blocks,
        MessageContent::Other(_) => return None,
    };

    let parts: Vec<UserPart<'_>> = blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(UserPart::Text { text }),
            ContentBlock::Image { media_type, data } => Some(UserPart::ImageUrl {
                image_url: format!("data:{media_type};base64,{data}"),
            }),
            _ => None,
        })
        .collect();

    if let [UserPart::Text { text }] = parts.as_slice() {
        return Some((*text).to_string());
    }
    match serde_json::to_string(&parts) {
        Ok(serialized) => Some(serialized),
        Err(err) => {
            warn!(error = %err, "failed to serialize user content parts");
            None
        }
    }
}

/// Split assistant content into concatenated text and tool calls.
#[must_use]
pub fn normalize_assistant_content(content: &MessageContent) -> (Option<String>, Vec<ChatToolCall>) {
    let blocks = match content {
        MessageContent::Text(text) => return (Some(text.clone()), Vec::new()),
        MessageContent::Blocks(blocks) => blocks,
        MessageContent::Other(_) => return (None, Vec::new()),
    };

    let mut text = String::new();
    let mut saw_text = false;
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text: part } => {
                saw_text = true;
                text.push_str(part);
            }
            ContentBlock::ToolUse { id, name, input } => match serde_json::to_string(input) {
                Ok(arguments) => {
                    tool_calls.push(ChatToolCall::function(id.clone(), name.clone(), arguments));
                }
                Err(err) => {
                    warn!(tool_use_id = %id, error = %err, "skipping tool_use block with unserializable input");
                }
            },
            _ => {}
        }
    }

    (saw_text.then_some(text), tool_calls)
}

fn render_list_item(item: &Value) -> String {
    if let Some(text) = item.get("text").and_then(Value::as_str) {
        return text.to_string();
    }
    if let Value::String(text) = item {
        return text.clone();
    }
    serde_json::to_string(item).unwrap_or_else(|_| format!("{item}"))
}

/// Render tool-result content as the text of a `tool` message.
#[must_use]
pub fn normalize_tool_result(content: Option<&ToolResultContent>) -> String {
    match content {
        None => NO_TOOL_CONTENT.to_string(),
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(items)) => items
            .iter()
            .map(render_list_item)
            .collect::<Vec<_>>()
            .join("\n"),
        Some(ToolResultContent::Object(map)) => {
            if map.get("type").and_then(Value::as_str) == Some("text") {
                return map
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
            }
            serde_json::to_string(map).unwrap_or_else(|_| UNPARSEABLE_TOOL_CONTENT.to_string())
        }
        Some(ToolResultContent::Other(value)) => {
            serde_json::to_string(value).unwrap_or_else(|_| UNPARSEABLE_TOOL_CONTENT.to_string())
        }
    }
}
