// src/error.rs
// Standardized error types for devlog

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the file-backed stores (session, knowledge, catch-up).
///
/// Every variant carries the path that failed so the daemon can log it and
/// skip the offending file without halting the loop.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl StorageError {
    pub fn read(path: impl Into<PathBuf>, err: impl ToString) -> Self {
        StorageError::Read {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, err: impl ToString) -> Self {
        StorageError::Write {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, err: impl ToString) -> Self {
        StorageError::Parse {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Errors surfaced by the daemon control loop.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("queue error: {0}")]
    Queue(String),

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("decay error: {0}")]
    Decay(String),
}

/// Main error type for the devlog library
#[derive(Error, Debug)]
pub enum DevlogError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Daemon(#[from] DaemonError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("invalid consolidation decision: {0}")]
    InvalidDecision(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using DevlogError
pub type Result<T> = std::result::Result<T, DevlogError>;

impl From<String> for DevlogError {
    fn from(s: String) -> Self {
        DevlogError::Other(s)
    }
}

impl From<tokio::task::JoinError> for DevlogError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            DevlogError::Cancelled
        } else {
            DevlogError::Other(err.to_string())
        }
    }
}

impl From<DevlogError> for String {
    fn from(err: DevlogError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_carries_path() {
        let err = StorageError::read("/tmp/missing.json", "no such file");
        assert!(err.to_string().contains("/tmp/missing.json"));
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn test_storage_error_converts_to_devlog_error() {
        let err: DevlogError = StorageError::parse("/p/.memory/working/x.json", "bad json").into();
        assert!(err.to_string().contains("bad json"));
    }

    #[test]
    fn test_daemon_error_display() {
        let err = DaemonError::Extraction("llm unreachable".into());
        assert_eq!(err.to_string(), "extraction error: llm unreachable");
    }
}
