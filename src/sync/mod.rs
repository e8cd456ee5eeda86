//! Client-side synchronization state: document reconciliation, the chat
//! reducer, and the push-channel supervisor.

pub mod backoff;
pub mod cache;
pub mod chat;
pub mod documents;
pub mod events;
pub mod history;
pub mod supervisor;

pub use backoff::BackoffPolicy;
pub use cache::{ChatHistoryCache, FileChatCache, MemoryChatCache};
pub use chat::{CHAT_FAILURE_MESSAGE, ChatMessage, ChatReducer, ChatRole, SendRejection};
pub use documents::{DocumentStore, GHOST_UPLOAD_ID};
pub use events::PushEvent;
pub use supervisor::{ChannelEvent, ConnectionStatus, ConnectionSupervisor};
