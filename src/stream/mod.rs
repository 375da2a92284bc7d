//! Streaming path: upstream SSE decoding, the Chat-to-Messages event state
//! machine and the task that drives one streamed reply.

pub mod bridge;
pub mod driver;
pub mod sse;

pub use bridge::{BridgeState, StreamBridge, CANCELLED_MESSAGE};
pub use driver::{bridge_sse_stream, StreamLogContext};
pub use sse::{chat_chunk_stream, SseEvent, SseParser};
