//! Real-time document and chat synchronization for Juristi case workspaces.
//!
//! The library keeps one case's document list and chat in sync with the
//! backend: a server-sent-events push channel delivers document progress,
//! chat answers stream in as raw text, and local mutations are merged with
//! both by document id. [`workspace::CaseWorkspace`] ties the pieces
//! together; every I/O seam ([`api::CaseApi`], [`transport::PushConnector`],
//! [`auth::TokenRefresher`], [`sync::ChatHistoryCache`]) is a trait so front
//! ends and tests can substitute their own.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod settings;
pub mod sync;
pub mod transport;
pub mod workspace;

pub use config::ClientConfig;
pub use error::{ApiError, AuthError, CacheError, ConfigError, TransportError, WorkspaceError};
pub use sync::{ConnectionStatus, DocumentStore};
pub use workspace::{CaseWorkspace, Notice, NoticeLevel, SendOutcome, WorkspaceOptions};
