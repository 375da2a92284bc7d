use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use tracing::debug;

use crate::error::BridgeError;
use crate::observability::log_request_complete;
use crate::protocol::anthropic::MessagesRequest;
use crate::protocol::openai_chat::ChatCompletionRequest;
use crate::state::AppState;
use crate::stream::{bridge_sse_stream, chat_chunk_stream, StreamBridge, StreamLogContext};
use crate::translate::{assemble_response, translate_request, AssembledReply};

/// `POST /v1/messages`.
pub async fn handler(state: Arc<AppState>, headers: &HeaderMap, body: Bytes) -> Response {
    match handler_inner(state, headers, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handler_inner(
    state: Arc<AppState>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, BridgeError> {
    state.authenticate(headers)?;
    let request: MessagesRequest = serde_json::from_slice(&body)
        .map_err(|err| BridgeError::InvalidRequest(format!("Invalid JSON body: {err}")))?;
    let started_at = Instant::now();
    let chat = translate_request(&request, &state.model_router, &state.config.limits);
    debug!(
        model = %request.model,
        upstream_model = %chat.model,
        stream = chat.stream,
        messages = chat.messages.len(),
        max_tokens = chat.max_tokens,
        "translated messages request"
    );

    if chat.stream {
        stream_reply(&state, &request, &chat, started_at).await
    } else {
        complete_reply(&state, &request, &chat, started_at).await
    }
}

async fn complete_reply(
    state: &AppState,
    request: &MessagesRequest,
    chat: &ChatCompletionRequest,
    started_at: Instant,
) -> Result<Response, BridgeError> {
    let upstream = state.transport.send_chat(chat).await?;
    match assemble_response(&upstream, request, || state.next_message_id()) {
        AssembledReply::Message(message) => {
            log_request_complete(
                &request.model,
                &chat.model,
                false,
                &message.usage,
                started_at,
            );
            Ok(Json(message).into_response())
        }
        AssembledReply::Error(payload) => {
            tracing::warn!(upstream_model = %chat.model, "upstream response carried no choices");
            Ok((StatusCode::BAD_GATEWAY, Json(payload)).into_response())
        }
    }
}

async fn stream_reply(
    state: &AppState,
    request: &MessagesRequest,
    chat: &ChatCompletionRequest,
    started_at: Instant,
) -> Result<Response, BridgeError> {
    let bytes = state.transport.open_chat_stream(chat).await?;
    let bridge = StreamBridge::new(state.next_message_id(), request.model.clone());
    let log = StreamLogContext {
        model: request.model.clone(),
        upstream_model: chat.model.clone(),
        started_at,
    };
    let frames = bridge_sse_stream(chat_chunk_stream(bytes), bridge, state.request_token(), log);
    Ok(sse_ok_response(Body::from_stream(frames)))
}

fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
