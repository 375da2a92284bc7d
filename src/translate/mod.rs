//! Request and response translation between the Messages and Chat
//! Completions protocols. Nothing in here performs I/O or fails.

pub mod content;
pub mod request;
pub mod response;

pub use request::translate_request;
pub use response::{assemble_response, parse_tool_arguments, AssembledReply};
