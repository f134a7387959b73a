use thiserror::Error;

/// Result type for parser operations
pub type Result<T> = std::result::Result<T, ParserError>;

/// Errors that fail a single file's analysis.
///
/// Malformed source is *not* an error: backends report it as diagnostics on a partial
/// [`FileAnalysis`](crate::FileAnalysis).
#[derive(Error, Debug)]
pub enum ParserError {
    /// Reading the file failed
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A backend was asked to parse a language it does not serve
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Tree-sitter refused the grammar or produced no tree
    #[error("Tree-sitter error: {0}")]
    TreeSitterError(String),

    /// A language-server call did not answer in time
    #[error("Language server timed out after {timeout_ms}ms: {method}")]
    Timeout { method: String, timeout_ms: u64 },

    /// The language server sent something we could not interpret
    #[error("Language server protocol error: {0}")]
    Protocol(String),

    /// The language server session is gone (process exited or handshake failed)
    #[error("Language server unavailable: {0}")]
    BackendUnavailable(String),

    /// JSON encoding/decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ParserError {
    /// Create an unsupported language error
    pub fn unsupported_language(lang: impl Into<String>) -> Self {
        Self::UnsupportedLanguage(lang.into())
    }

    /// Create a tree-sitter error
    pub fn tree_sitter(msg: impl Into<String>) -> Self {
        Self::TreeSitterError(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether the failure came from talking to an external server rather than from the input.
    #[must_use]
    pub const fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Protocol(_) | Self::BackendUnavailable(_)
        )
    }
}
