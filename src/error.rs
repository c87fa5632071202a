//! Error types for taskq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Fatal misconfiguration, raised at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no handler registered for request type {request}")]
    HandlerNotFound { request: String },

    #[error("request type {request} already handled by {existing}, cannot also register {duplicate}")]
    AmbiguousHandler {
        request: String,
        existing: String,
        duplicate: String,
    },

    #[error("handler {handler} failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("handler {handler} panicked")]
    HandlerPanicked { handler: String },

    /// The caller's (or the dispatcher's) cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    #[error("task queue is closed")]
    QueueClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Resolution errors are structural and never retried.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Error::HandlerNotFound { .. } | Error::AmbiguousHandler { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
