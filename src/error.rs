//! Error types for the synchronization client.

use reqwest::StatusCode;

/// Configuration resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to read settings file {path}: {reason}")]
    Settings { path: String, reason: String },

    #[error("failed to load .env file: {0}")]
    EnvFile(String),
}

/// Token acquisition errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no refresh token configured")]
    MissingRefreshToken,

    #[error("token refresh rejected with status {status}")]
    Rejected { status: StatusCode },

    #[error("token endpoint unreachable: {0}")]
    Network(String),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// Errors from the two long-lived I/O channels (push channel, chat stream).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    #[error("server responded with status {status}")]
    Status { status: StatusCode },

    #[error("network error: {0}")]
    Network(String),

    #[error("stream closed by server")]
    Closed,
}

impl TransportError {
    /// Fatal errors mean the channel is fully closed and must not be retried
    /// without user intervention (bad credentials, missing resource, bad url).
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidUrl(_) => true,
            Self::Status { status } => status.is_client_error(),
            Self::Network(_) | Self::Closed => false,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status } if *status == StatusCode::UNAUTHORIZED)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status { status },
            None => Self::Network(err.to_string()),
        }
    }
}

/// Errors from one-shot request/response calls against the case API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("request failed with status {status}: {detail}")]
    Status { status: StatusCode, detail: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::Decode(err.to_string());
        }
        match err.status() {
            Some(status) => Self::Status {
                status,
                detail: err.to_string(),
            },
            None => Self::Network(err.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingRefreshToken | AuthError::Rejected { .. } => Self::Unauthenticated,
            AuthError::Network(msg) => Self::Network(msg),
            AuthError::InvalidResponse(msg) => Self::Decode(msg),
        }
    }
}

/// Durable chat cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io error at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("cache entry {key} is not valid json: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Errors surfaced by user-facing workspace operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("no active case")]
    NoActiveCase,

    #[error("document {0} not found")]
    DocumentNotFound(String),

    #[error("another upload is still in progress")]
    UploadInProgress,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
