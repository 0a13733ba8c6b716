//! Error types for registry, export and storage operations

pub mod handlers;

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Error)]
pub enum ExportError {
    /// Transport failure talking to a registry, auth realm or storage node
    #[error("Network error: {message}")]
    Network { message: String, retryable: bool },

    #[error("Timeout: {0}")]
    Timeout(String),

    /// The one status the registry protocol accepts is 200; anything else lands here
    #[error("{operation} failed: non-OK HTTP status {status}")]
    HttpStatus { operation: String, status: u16 },

    /// Branch condition, not a failure: the tag resolves to a single-platform manifest
    #[error("the repository is not multi-platform (content-type: {content_type})")]
    NotMultiPlatform { content_type: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("IO error at {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error("layer {digest} failed: {source}")]
    LayerFetch {
        digest: String,
        #[source]
        source: Box<ExportError>,
    },

    #[error("Storage backend error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("copy cancelled")]
    Cancelled,

    /// A spawned fetch task panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),

    /// Stage context for fatal errors surfaced to the caller
    #[error("{stage} ({repository}): {source}")]
    Stage {
        stage: &'static str,
        repository: String,
        #[source]
        source: Box<ExportError>,
    },
}

impl ExportError {
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        ExportError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn in_stage(self, stage: &'static str, repository: &str) -> Self {
        ExportError::Stage {
            stage,
            repository: repository.to_string(),
            source: Box::new(self),
        }
    }

    /// Whether another attempt of the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ExportError::Network { retryable, .. } => *retryable,
            ExportError::Timeout(_) => true,
            ExportError::HttpStatus { status, .. } => {
                handlers::HttpErrorHandler::is_retryable_status(*status)
            }
            _ => false,
        }
    }

    /// Innermost error, looking through stage and layer wrappers
    pub fn root_cause(&self) -> &ExportError {
        match self {
            ExportError::Stage { source, .. } | ExportError::LayerFetch { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    pub fn is_not_multi_platform(&self) -> bool {
        matches!(self, ExportError::NotMultiPlatform { .. })
    }
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Io {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(err: reqwest::Error) -> Self {
        handlers::NetworkErrorHandler::handle_network_error(&err, "request")
    }
}

impl From<tokio::task::JoinError> for ExportError {
    fn from(err: tokio::task::JoinError) -> Self {
        ExportError::Task(err.to_string())
    }
}

impl From<url::ParseError> for ExportError {
    fn from(err: url::ParseError) -> Self {
        ExportError::Config(format!("invalid URL: {}", err))
    }
}
