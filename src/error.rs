//! Error taxonomy for codewatch.
//!
//! `CoreError` is the internal propagation type (`thiserror`, carries
//! `?`-friendly context). `ErrorCode`/`ErrorEnvelope` are the wire-facing
//! shapes every tool handler converts into at the boundary.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Internal error type. Each variant is tagged below with its 
/// taxonomy class in a doc comment.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Transient: retried with jittered back-off, then DLQ.
    #[error("io error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Transient: engine adapter unreachable or busy.
    #[error("search engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    /// Transient: SQL busy/locked.
    #[error("database busy: {0}")]
    DbBusy(String),

    /// Input: bad argument shape, no retry.
    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    /// Input: path outside every registered root.
    #[error("path '{path}' is outside every registered workspace root")]
    RootOutOfScope { path: PathBuf },

    /// Input: repo/root not registered.
    #[error("repo '{0}' not found")]
    RepoNotFound(String),

    /// Input: requested file/symbol not present in the index.
    #[error("'{0}' is not indexed")]
    NotIndexed(String),

    /// Consistency: foreign key or schema mismatch within one batch.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Catastrophic: database corruption or unwritable data directory.
    #[error("catastrophic storage failure at '{path}': {reason}")]
    Catastrophic { path: PathBuf, reason: String },

    /// Catastrophic: another process already holds the writer lock.
    #[error("writer lock already held at '{path}'")]
    WriterLockHeld { path: PathBuf },

    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("parse error in {language} for '{path}': {reason}")]
    Parse {
        path: PathBuf,
        language: String,
        reason: String,
    },

    #[error("{0}")]
    Other(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Io { .. } | CoreError::EngineUnavailable { .. } | CoreError::DbBusy(_)
        )
    }

}

/// Wire-facing error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgs,
    NotIndexed,
    RepoNotFound,
    IoError,
    DbError,
    Internal,
    ErrRootOutOfScope,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidArgs => "INVALID_ARGS",
            ErrorCode::NotIndexed => "NOT_INDEXED",
            ErrorCode::RepoNotFound => "REPO_NOT_FOUND",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::DbError => "DB_ERROR",
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::ErrRootOutOfScope => "ERR_ROOT_OUT_OF_SCOPE",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

impl ErrorEnvelope {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        ErrorEnvelope {
            code: code.as_str(),
            message: message.into(),
            hints: Vec::new(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }
}

impl From<&CoreError> for ErrorEnvelope {
    fn from(err: &CoreError) -> Self {
        let code = match err {
            CoreError::InvalidArgs(_) => ErrorCode::InvalidArgs,
            CoreError::NotIndexed(_) => ErrorCode::NotIndexed,
            CoreError::RepoNotFound(_) => ErrorCode::RepoNotFound,
            CoreError::RootOutOfScope { .. } => ErrorCode::ErrRootOutOfScope,
            CoreError::Io { .. } => ErrorCode::IoError,
            CoreError::DbBusy(_) | CoreError::Sql(_) => ErrorCode::DbError,
            CoreError::EngineUnavailable { .. }
            | CoreError::Consistency(_)
            | CoreError::Catastrophic { .. }
            | CoreError::WriterLockHeld { .. }
            | CoreError::Parse { .. }
            | CoreError::Other(_) => ErrorCode::Internal,
        };
        ErrorEnvelope::new(code, err.to_string())
    }
}

impl From<CoreError> for ErrorEnvelope {
    fn from(err: CoreError) -> Self {
        ErrorEnvelope::from(&err)
    }
}
