use codeatlas_parser::ParserError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

/// Errors that abort a scan (or a single on-demand analysis).
///
/// Per-file parse problems never surface here; they are reported as diagnostics.
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parser error: {0}")]
    Parser(#[from] ParserError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("Unreadable root {path}: {reason}")]
    UnreadableRoot { path: String, reason: String },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid exclusion pattern: {0}")]
    Pattern(#[from] globset::Error),

    /// Scan state or lock file could not be written
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Index store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Other(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported store schema version {found} (expected {expected})")]
    Schema { found: u32, expected: u32 },

    #[error("{0}")]
    Backend(String),
}
