use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Media store error: {0}")]
    Media(#[from] MediaError),

    #[error("{0}")]
    AllProvidersFailed(#[from] AllProvidersFailed),

    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Story already completed: {story_id}")]
    StoryAlreadyCompleted { story_id: String },

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Story not found: {story_id}")]
    StoryNotFound { story_id: String },

    #[error("Segment not found: {segment_id}")]
    SegmentNotFound { segment_id: String },

    #[error("Story {story_id} already has a root segment")]
    RootExists { story_id: String },

    #[error("Parent segment {segment_id} is no longer the story leaf")]
    ParentNotLeaf { segment_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Single-adapter provider call errors.
///
/// One value of this type describes the failure of one attempt against one
/// vendor; the router recovers from it by invoking the fallback adapter.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Empty response: {message}")]
    EmptyResponse { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Payload decode error: {message}")]
    Decode { message: String },

    #[error("Capability {capability} not supported by {provider}")]
    Unsupported {
        capability: String,
        provider: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Both the primary and the fallback adapter failed for one capability.
///
/// Carries both failure reasons so callers (and logs) see the full picture
/// rather than just the last attempt.
#[derive(Debug, Error)]
#[error("all {capability} providers failed: {primary} ({primary_error}); {fallback} ({fallback_error})")]
pub struct AllProvidersFailed {
    pub capability: String,
    pub primary: String,
    pub primary_error: String,
    pub fallback: String,
    pub fallback_error: String,
}

/// Media object store errors
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Media root unavailable: {message}")]
    Root { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// RPC protocol errors
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown method: {method}")]
    UnknownMethod { method: String },

    #[error("Invalid parameters for {method}: {message}")]
    InvalidParams { method: String, message: String },

    #[error("Request execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AppError> for RpcError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Rpc(rpc) => rpc,
            other => RpcError::ExecutionFailed {
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for single-provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result type alias for media store operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Result type alias for RPC operations
pub type RpcResult<T> = Result<T, RpcError>;
