use crate::protocol::anthropic::{ContentBlock, MessageContent, SystemPrompt, TokenCountRequest, Usage};
use std::time::Duration;
use tracing::info;

const CHARS_PER_TOKEN: usize = 4;

fn system_chars(system: &SystemPrompt) -> usize {
    match system {
        SystemPrompt::Text(text) => text.len(),
        SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(serde_json::Value::as_str))
            .map(str::len)
            .sum(),
        SystemPrompt::Other(_) => 0,
    }
}

fn content_chars(content: &MessageContent) -> usize {
    match content {
        MessageContent::Text(text) => text.len(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.len(),
                _ => 0,
            })
            .sum(),
        MessageContent::Other(_) => 0,
    }
}

/// Estimate input tokens for a `count_tokens` request.
///
/// Counts the bytes of the system prompt and every text block, divides by
/// four and never reports less than one token.
#[must_use]
pub fn estimate_input_tokens(request: &TokenCountRequest) -> u64 {
    let mut total = request.system.as_ref().map_or(0, system_chars);
    total += request
        .messages
        .iter()
        .filter_map(|msg| msg.content.as_ref())
        .map(content_chars)
        .sum::<usize>();
    let estimate = (total / CHARS_PER_TOKEN).max(1);
    u64::try_from(estimate).unwrap_or(u64::MAX)
}

/// Log per-request token usage.
pub fn log_request_usage(
    model: &str,
    upstream_model: &str,
    stream: bool,
    usage: &Usage,
    duration: Duration,
) {
    info!(
        model = %model,
        upstream_model = %upstream_model,
        stream,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        cache_read_input_tokens = usage.cache_read_input_tokens.unwrap_or(0),
        duration_ms = duration.as_millis() as u64,
        "request completed"
    );
}
