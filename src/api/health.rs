use std::time::SystemTime;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use crate::protocol::openai_chat::{ChatCompletionRequest, ChatMessage};
use crate::state::AppState;

const SERVICE_BANNER: &str = "Messages-to-Chat-Completions bridge v0.1.0";

fn timestamp() -> String {
    httpdate::fmt_http_date(SystemTime::now())
}

/// `GET /`: banner with a non-secret config summary.
pub fn root_handler(state: &AppState) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "message": SERVICE_BANNER,
        "status": "running",
        "config": {
            "upstream_base_url": config.upstream.base_url,
            "max_tokens_limit": config.limits.max_tokens,
            "min_tokens_limit": config.limits.min_tokens,
            "api_key_configured": !config.upstream.api_key.is_empty(),
            "client_api_key_validation": state.client_key_enforced(),
            "big_model": state.model_router.big_model(),
            "middle_model": state.model_router.middle_model(),
            "small_model": state.model_router.small_model(),
        },
        "endpoints": {
            "messages": "/v1/messages",
            "count_tokens": "/v1/messages/count_tokens",
            "health": "/health",
            "test_connection": "/test-connection",
        }
    }))
}

/// `GET /health`.
pub fn health_handler(state: &AppState) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": timestamp(),
        "upstream_api_key_configured": !state.config.upstream.api_key.is_empty(),
        "client_api_key_validation": state.client_key_enforced(),
    }))
}

/// `GET /test-connection`: a tiny completion against the small model.
pub async fn test_connection_handler(state: &AppState, headers: &HeaderMap) -> Response {
    if let Err(err) = state.authenticate(headers) {
        return err.into_response();
    }

    let model = state.model_router.small_model().to_string();
    let ping = ChatCompletionRequest {
        model: model.clone(),
        messages: vec![ChatMessage::user(Some("Hello".to_string()))],
        tools: None,
        tool_choice: None,
        max_tokens: 5,
        stop: None,
        temperature: None,
        top_p: None,
        stream: false,
        stream_options: None,
    };

    match state.transport.send_chat(&ping).await {
        Ok(reply) => Json(json!({
            "status": "success",
            "message": "Successfully connected to upstream API",
            "model_used": model,
            "timestamp": timestamp(),
            "response_id": reply.id,
        }))
        .into_response(),
        Err(err) => {
            tracing::warn!(model = %model, error = %err, "upstream connection test failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "failed",
                    "error_type": "API Error",
                    "message": err.to_string(),
                    "timestamp": timestamp(),
                    "suggestions": [
                        "Check your OPENAI_API_KEY is valid",
                        "Verify your API key has necessary permissions",
                        "Check if you have reached rate limits",
                    ],
                })),
            )
                .into_response()
        }
    }
}
