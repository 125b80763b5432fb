//! Crate-wide error taxonomy (spec §7). Each component boundary gets its own
//! `thiserror` enum; `MetarelayError` composes them for `main`'s exit-code
//! mapping (0 success, 1 config/validation error, 2 fatal runtime error).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
    #[error("duplicate handler name: {0}")]
    DuplicateHandler(String),
    #[error("handler '{handler}': {source}")]
    Filter {
        handler: String,
        #[source]
        source: crate::filter::FilterError,
    },
    #[error("handler '{handler}': {source}")]
    Template {
        handler: String,
        #[source]
        source: crate::template::TemplateError,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("cursor regression for '{repo}': stored={stored}, attempted={attempted}")]
    StaleCursor {
        repo: String,
        stored: i64,
        attempted: i64,
    },
}

/// Errors from the Cloud Client (spec §4.B / §7). Transient errors are
/// retryable with backoff; fatal errors unwind the daemon after draining.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("transient network error: {0}")]
    Transient(String),
    #[error("fatal network error: {0}")]
    Fatal(String),
}

impl CloudError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CloudError::Fatal(_))
    }
}

/// Top-level error used by the CLI for exit-code mapping.
#[derive(Debug, Error)]
pub enum MetarelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cloud(#[from] CloudError),
    #[error("{0}")]
    Fatal(String),
}

impl MetarelayError {
    /// Exit code per spec §6: 0 success, 1 config/validation error, 2 fatal runtime error.
    pub fn exit_code(&self) -> i32 {
        match self {
            MetarelayError::Config(_) => 1,
            MetarelayError::Store(_) | MetarelayError::Cloud(_) | MetarelayError::Fatal(_) => 2,
        }
    }
}
