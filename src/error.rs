//! Error types for tgdl.
//!
//! Every error carries an [`ErrorClass`] so the channel loop can decide
//! whether to back off and retry, abandon a single item, or stop the channel.

use std::time::Duration;

/// Top-level error type for the ingestion engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Submission error: {0}")]
    Submit(#[from] SubmitError),
}

/// How far an error is allowed to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connectivity-class failure; retried with backoff at the channel level.
    Transient,
    /// Rejection of a single work item; never retried.
    Permanent,
    /// Unrecoverable local failure; terminates the owning channel loop.
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config(_) => ErrorClass::Fatal,
            Error::Source(e) => e.class(),
            Error::Transfer(e) => e.class(),
            Error::Checkpoint(_) => ErrorClass::Fatal,
            Error::Submit(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the remote message source (fetch, resolve, relay, blob).
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Connection to message source failed: {0}")]
    Connection(String),

    #[error("Message source timed out after {0:?}")]
    Timeout(Duration),

    #[error("Message source rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Message source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Channel {channel} not found")]
    ChannelNotFound { channel: String },

    #[error("Invalid response from message source: {0}")]
    InvalidResponse(String),

    #[error("Invalid message source URL: {0}")]
    InvalidUrl(String),
}

impl SourceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SourceError::Connection(_) | SourceError::Timeout(_) | SourceError::RateLimited { .. } => {
                ErrorClass::Transient
            }
            SourceError::Status { status, .. } if *status >= 500 => ErrorClass::Transient,
            SourceError::Status { .. }
            | SourceError::ChannelNotFound { .. }
            | SourceError::InvalidResponse(_)
            | SourceError::InvalidUrl(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout(Duration::ZERO)
        } else if e.is_connect() || e.is_request() || e.is_body() {
            SourceError::Connection(e.to_string())
        } else if e.is_decode() {
            SourceError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            SourceError::Connection(e.to_string())
        }
    }
}

/// Media transfer errors.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Media file too large: {size} bytes exceeds {max} byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("Media file too small: {size} bytes is below {min} byte minimum")]
    TooSmall { size: u64, min: u64 },

    #[error("Transfer interrupted: {0}")]
    Interrupted(#[from] SourceError),

    #[error("Transfer incomplete: received {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error("Storage error at {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    pub fn storage(path: &std::path::Path, source: std::io::Error) -> Self {
        TransferError::Storage {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            TransferError::Interrupted(e) => e.class(),
            TransferError::Storage { source, .. }
                if source.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                ErrorClass::Fatal
            }
            TransferError::TooLarge { .. }
            | TransferError::TooSmall { .. }
            | TransferError::Incomplete { .. }
            | TransferError::Storage { .. } => ErrorClass::Permanent,
        }
    }
}

/// Checkpoint persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Failed to read checkpoint file {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Failed to write checkpoint file {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Checkpoint file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
}

/// Link submission errors.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Submission endpoint returned HTTP {status}")]
    Rejected { status: u16 },

    #[error("Submission request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to encode submission payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to sign submission: {0}")]
    Signature(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
