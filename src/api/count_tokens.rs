use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::error::BridgeError;
use crate::observability::token_counter::estimate_input_tokens;
use crate::protocol::anthropic::TokenCountRequest;
use crate::state::AppState;

/// `POST /v1/messages/count_tokens`: a local estimate, no upstream call.
pub fn handler(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Response {
    match handler_inner(state, headers, body) {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

fn handler_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, BridgeError> {
    state.authenticate(headers)?;
    let request: TokenCountRequest = serde_json::from_slice(body)
        .map_err(|err| BridgeError::InvalidRequest(format!("Invalid JSON body: {err}")))?;
    let input_tokens = estimate_input_tokens(&request);
    tracing::debug!(model = %request.model, input_tokens, "estimated input tokens");
    Ok(Json(json!({ "input_tokens": input_tokens })).into_response())
}
