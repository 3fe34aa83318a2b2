//! Error types for the compiler.

use std::path::PathBuf;
use std::time::Duration;

/// Compiler errors.
///
/// The first group aborts a run. The second group is scoped to a single pack:
/// the dispatcher retries it (except `InvalidKey` and `Internal`, which can
/// never succeed), and once retries are exhausted the pack is dropped from
/// the artifact.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Input file missing, unreadable or of an unsupported format.
    #[error("input error: {path}: {message}")]
    Input { path: PathBuf, message: String },

    /// Input file parsed but does not have the expected shape.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Output artifact could not be written.
    #[error("output error: {path}: {message}")]
    Output { path: PathBuf, message: String },

    /// Cache directory could not be created or written.
    #[error("cache directory error: {path}: {message}")]
    CacheDir { path: PathBuf, message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A cache entry exists but cannot be deserialized.
    #[error("corrupt cache entry for {id}: {message}")]
    CacheCorrupt { id: String, message: String },

    /// Pack not known to the remote source.
    #[error("pack not found: {id}")]
    NotFound { id: String },

    /// Rate limit exceeded.
    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Network error.
    #[error("network error: {message}")]
    Network { message: String },

    /// Invalid response from the remote source.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// The pack key cannot be sent to the remote source.
    #[error("invalid key for pack {id}: {message}")]
    InvalidKey { id: String, message: String },

    /// A fetch task ended without producing a result.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CompileError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidInput { .. } => 1,
            _ => 2,
        }
    }

    /// Whether the error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Input { .. }
                | Self::InvalidInput { .. }
                | Self::Output { .. }
                | Self::CacheDir { .. }
                | Self::Config { .. }
        )
    }

    /// Whether another fetch attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal() && !matches!(self, Self::InvalidKey { .. } | Self::Internal { .. })
    }

    pub(crate) fn output(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Output {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn cache_dir(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::CacheDir {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for CompileError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for compiler operations.
pub type CompileResult<T> = Result<T, CompileError>;
