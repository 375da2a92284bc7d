use serde_json::Value;

use super::ChatCompletionChunk;

/// Decoded meaning of one upstream SSE `data:` payload.
#[derive(Debug)]
pub enum ChunkPayload {
    Chunk(Box<ChatCompletionChunk>),
    Done,
    /// An object carrying a top-level `error` member instead of a chunk.
    UpstreamError(String),
    Invalid(serde_json::Error),
}

/// Interpret the data payload of one Chat Completions SSE frame.
///
/// `[DONE]` is the end-of-stream marker. Providers report mid-stream failures
/// as `{"error": {...}}`, which would otherwise deserialize as an empty chunk.
#[must_use]
pub fn parse_chunk_payload(data: &str) -> ChunkPayload {
    let trimmed = data.trim();
    if trimmed == "[DONE]" {
        return ChunkPayload::Done;
    }
    if trimmed.contains("\"error\"") {
        if let Some(message) = top_level_error(trimmed) {
            return ChunkPayload::UpstreamError(message);
        }
    }
    match serde_json::from_str::<ChatCompletionChunk>(trimmed) {
        Ok(chunk) => ChunkPayload::Chunk(Box::new(chunk)),
        Err(err) => ChunkPayload::Invalid(err),
    }
}

fn top_level_error(data: &str) -> Option<String> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(data) else {
        return None;
    };
    let error = map.get("error").filter(|error| !error.is_null())?;
    let message = match error {
        Value::String(text) => text.clone(),
        other => match other.get("message").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => other.to_string(),
        },
    };
    Some(message)
}
