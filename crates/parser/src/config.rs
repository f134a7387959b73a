use crate::error::{ParserError, Result};
use crate::language::Language;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment switch for the semantic tier (`off`, `0`, `false`, `no` disable it).
pub const SEMANTIC_ENV: &str = "CODEATLAS_SEMANTIC";

/// Which tiers the default registry registers, and how to reach language servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Register the language-server tier
    pub enable_semantic: bool,

    /// Register the tree-sitter tier
    pub enable_ast: bool,

    /// Register the regex tier
    pub enable_regex: bool,

    /// Language-server settings (used when `enable_semantic`)
    pub semantic: SemanticConfig,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            enable_semantic: true,
            enable_ast: true,
            enable_regex: true,
            semantic: SemanticConfig::default(),
        }
    }
}

impl ParserConfig {
    /// Config that never spawns external processes
    pub fn offline() -> Self {
        Self {
            enable_semantic: false,
            ..Default::default()
        }
    }

    /// Regex tier only (fastest, lowest confidence)
    pub fn for_speed() -> Self {
        Self {
            enable_semantic: false,
            enable_ast: false,
            ..Default::default()
        }
    }

    /// Default config adjusted by `CODEATLAS_SEMANTIC`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(SEMANTIC_ENV) {
            config.enable_semantic = !is_disabled_flag(&raw);
        }
        config
    }

    #[must_use]
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.semantic.workspace_root = Some(root.into());
        self
    }

    /// Reject settings that would leave a registry unable to do anything useful.
    pub fn validate(&self) -> Result<()> {
        if !(self.enable_semantic || self.enable_ast || self.enable_regex) {
            return Err(ParserError::InvalidConfig("every tier is disabled".into()));
        }
        if self.enable_semantic {
            self.semantic.validate()?;
        }
        Ok(())
    }
}

fn is_disabled_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "off" | "0" | "false" | "no"
    )
}

/// How to launch one language server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub language: Language,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ServerSpec {
    pub fn new(language: Language, command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            language,
            command: command.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Root reported to servers as `rootUri`; defaults to the process working directory
    pub workspace_root: Option<PathBuf>,

    /// One entry per language; the first spec for a language wins
    pub servers: Vec<ServerSpec>,

    /// Bound on spawn + `initialize` round trip
    pub handshake_timeout_ms: u64,

    /// Bound on each per-file request
    pub request_timeout_ms: u64,

    /// How long to wait for `publishDiagnostics` after a file's symbols arrive; 0 takes only
    /// what was already published
    #[serde(default = "default_diagnostics_wait_ms")]
    pub diagnostics_wait_ms: u64,
}

const fn default_diagnostics_wait_ms() -> u64 {
    250
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            servers: Self::default_servers(),
            handshake_timeout_ms: 10_000,
            request_timeout_ms: 5_000,
            diagnostics_wait_ms: default_diagnostics_wait_ms(),
        }
    }
}

impl SemanticConfig {
    /// Well-known stdio language servers
    pub fn default_servers() -> Vec<ServerSpec> {
        vec![
            ServerSpec::new(Language::Rust, "rust-analyzer", &[]),
            ServerSpec::new(Language::Go, "gopls", &[]),
            ServerSpec::new(Language::Python, "pyright-langserver", &["--stdio"]),
            ServerSpec::new(
                Language::TypeScript,
                "typescript-language-server",
                &["--stdio"],
            ),
            ServerSpec::new(
                Language::JavaScript,
                "typescript-language-server",
                &["--stdio"],
            ),
        ]
    }

    #[must_use]
    pub fn server_for(&self, language: Language) -> Option<&ServerSpec> {
        self.servers.iter().find(|s| s.language == language)
    }

    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub const fn diagnostics_wait(&self) -> Duration {
        Duration::from_millis(self.diagnostics_wait_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ParserError::InvalidConfig(
                "language-server timeouts must be non-zero".into(),
            ));
        }
        if let Some(spec) = self.servers.iter().find(|s| s.command.trim().is_empty()) {
            return Err(ParserError::InvalidConfig(format!(
                "empty server command for {}",
                spec.language
            )));
        }
        Ok(())
    }
}
