//! The two long-lived I/O channels: the server-push event channel and the
//! streamed chat response.

pub mod chat_stream;
pub mod push;
pub mod sse;

pub use chat_stream::{ChatStream, Utf8ChunkDecoder, text_stream};
pub use push::{HttpPushConnector, PushConnector, PushStream};
pub use sse::{SseDecoder, SseFrame};
