use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::BridgeError;
use crate::observability::log_request_complete;
use crate::protocol::anthropic::stream::encode_stream_event;
use crate::protocol::anthropic::StreamEvent;
use crate::protocol::openai_chat::ChatCompletionChunk;

use super::bridge::{BridgeState, StreamBridge};

/// Request details carried along for the completion log line.
#[derive(Debug, Clone)]
pub struct StreamLogContext {
    pub model: String,
    pub upstream_model: String,
    pub started_at: Instant,
}

/// How the driver's most recent wait resolved.
enum Step {
    Cancelled,
    Chunk(Box<ChatCompletionChunk>),
    Failed(BridgeError),
    Ended,
}

struct DriverState<S> {
    upstream: Option<Pin<Box<S>>>,
    bridge: StreamBridge,
    cancel: CancellationToken,
    pending: VecDeque<Bytes>,
    log: StreamLogContext,
}

impl<S> DriverState<S> {
    fn queue(&mut self, events: &[StreamEvent]) {
        self.pending.extend(events.iter().map(encode_stream_event));
    }
}

/// Drive one streamed reply: race the caller's cancellation token against the
/// next upstream chunk, feed the bridge and yield encoded SSE frames.
///
/// The envelope always goes out first. After that, cancellation wins ties:
/// when it fires, the upstream stream is dropped at once (closing the
/// upstream connection) and a single `cancelled` frame is the last thing the
/// caller sees. A turn that already has its finish reason closes normally
/// instead.
pub fn bridge_sse_stream<S>(
    upstream: S,
    bridge: StreamBridge,
    cancel: CancellationToken,
    log: StreamLogContext,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send
where
    S: Stream<Item = Result<ChatCompletionChunk, BridgeError>> + Send + 'static,
{
    let state = DriverState {
        upstream: Some(Box::pin(upstream)),
        bridge,
        cancel,
        pending: VecDeque::with_capacity(8),
        log,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(frame) = st.pending.pop_front() {
                return Some((Ok(frame), st));
            }
            if st.bridge.state() == BridgeState::Closed {
                return None;
            }
            if st.bridge.state() == BridgeState::Init {
                let events = st.bridge.start();
                st.queue(&events);
                continue;
            }

            let step = match st.upstream.as_mut() {
                None => Step::Ended,
                Some(upstream) => tokio::select! {
                    biased;
                    () = st.cancel.cancelled() => Step::Cancelled,
                    item = upstream.next() => match item {
                        Some(Ok(chunk)) => Step::Chunk(Box::new(chunk)),
                        Some(Err(err)) => Step::Failed(err),
                        None => Step::Ended,
                    },
                },
            };

            let draining = st.bridge.state() == BridgeState::Draining;
            let events = match step {
                Step::Chunk(chunk) => {
                    let events = st.bridge.push_chunk(&chunk);
                    st.queue(&events);
                    continue;
                }
                Step::Cancelled => {
                    st.upstream = None;
                    info!(
                        message_id = %st.bridge.message_id(),
                        model = %st.log.model,
                        draining,
                        "stream cancelled by caller"
                    );
                    st.bridge.cancel()
                }
                Step::Failed(err) => {
                    st.upstream = None;
                    warn!(
                        message_id = %st.bridge.message_id(),
                        model = %st.log.model,
                        error = %err,
                        draining,
                        "upstream stream failed"
                    );
                    st.bridge.fail(err.to_string())
                }
                Step::Ended => {
                    st.upstream = None;
                    st.bridge.finish()
                }
            };
            if matches!(events.last(), Some(StreamEvent::MessageStop {})) {
                log_request_complete(
                    &st.log.model,
                    &st.log.upstream_model,
                    true,
                    st.bridge.usage(),
                    st.log.started_at,
                );
            }
            st.queue(&events);
        }
    })
}
