use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::config::{ServerConfig, UpstreamConfig};
use crate::error::BridgeError;
use crate::protocol::openai_chat::{ChatCompletionRequest, ChatCompletionResponse};

const MAX_ERROR_MESSAGE_LEN: usize = 500;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
) -> Result<reqwest::Client, BridgeError> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .no_proxy()
        .build()
        .map_err(|err| BridgeError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// HTTP client for the Chat Completions upstream.
///
/// One pooled `reqwest::Client` is shared by every request. Calls are never
/// retried.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    completions_url: String,
    authorization: String,
}

impl HttpTransport {
    /// Build the transport from the server and upstream sections of the config.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] when the HTTP client cannot be built.
    pub fn new(server: &ServerConfig, upstream: &UpstreamConfig) -> Result<Self, BridgeError> {
        let idle_timeout = (server.http_pool_idle_timeout_secs > 0)
            .then(|| Duration::from_secs(server.http_pool_idle_timeout_secs));
        let client = build_reqwest_client(
            server.http_pool_max_idle_per_host.max(1),
            idle_timeout,
            Duration::from_secs(server.timeout),
        )?;
        Ok(Self {
            client,
            completions_url: completions_url(&upstream.base_url),
            authorization: format!("Bearer {}", upstream.api_key),
        })
    }

    #[must_use]
    pub fn completions_url(&self) -> &str {
        &self.completions_url
    }

    async fn post(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response, BridgeError> {
        let body = serde_json::to_vec(request).map_err(|err| {
            BridgeError::Internal(format!("Failed to serialize upstream request: {err}"))
        })?;
        let response = self
            .client
            .post(&self.completions_url)
            .header(http::header::AUTHORIZATION, &self.authorization)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| BridgeError::Transport(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        let message = sanitize_upstream_error(&body);
        tracing::warn!(
            status = status.as_u16(),
            model = %request.model,
            error = %message,
            "upstream returned error status"
        );
        Err(BridgeError::Upstream {
            status: status.as_u16(),
            message,
        })
    }

    /// Send a non-streaming completion request and decode the reply.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Upstream`] for non-2xx replies and
    /// [`BridgeError::Transport`] for connection or decoding failures.
    pub async fn send_chat(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, BridgeError> {
        let response = self.post(request).await?;
        let body = response
            .bytes()
            .await
            .map_err(|err| BridgeError::Transport(err.to_string()))?;
        serde_json::from_slice(&body).map_err(|err| {
            BridgeError::Transport(format!("Invalid upstream response body: {err}"))
        })
    }

    /// Open a streaming completion request and hand back the raw body stream.
    ///
    /// # Errors
    ///
    /// Same as [`HttpTransport::send_chat`]; errors after the headers arrive
    /// surface as items of the returned stream.
    pub async fn open_chat_stream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static, BridgeError>
    {
        let response = self.post(request).await?;
        Ok(response.bytes_stream().boxed())
    }
}

fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

/// Reduce an upstream error body to its `error.message`, or a bounded prefix
/// of the raw text.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return truncate(msg);
        }
    }
    truncate(&String::from_utf8_lossy(body))
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_ERROR_MESSAGE_LEN {
        return text.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
