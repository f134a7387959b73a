//! Parser backends: one capability, three tiers.
//!
//! Every backend implements [`ParserBackend`]. The registry binds a backend to a language and
//! hands out a [`ResolvedParser`], which is what the pipeline calls.

pub mod ast;
pub mod regex;
pub mod semantic;

use crate::error::Result;
use crate::language::Language;
use crate::types::{FileAnalysis, Tier};
use async_trait::async_trait;
use std::sync::Arc;

pub use self::ast::AstBackend;
pub use self::regex::RegexBackend;
pub use self::semantic::SemanticBackend;

/// A parsing strategy for one or more languages.
#[async_trait]
pub trait ParserBackend: Send + Sync {
    /// The tier slot this backend occupies in the registry.
    fn tier(&self) -> Tier;

    /// Whether this backend has anything to say about `language` at all.
    fn supports(&self, language: Language) -> bool;

    /// One-time availability check. The registry caches the answer per language.
    async fn probe(&self, language: Language) -> bool;

    /// Cheap check run on every resolution: a backend that lost its environment after a
    /// successful probe reports itself demoted here.
    fn is_demoted(&self, _language: Language) -> bool {
        false
    }

    /// Analyze one file. Malformed source yields `Ok` with diagnostics; `Err` fails the file.
    async fn parse(&self, language: Language, content: &str, path: &str) -> Result<FileAnalysis>;

    /// Release external resources (child processes). Default: nothing to release.
    async fn shutdown(&self) {}
}

/// A backend bound to one language, as selected by the registry.
#[derive(Clone)]
pub struct ResolvedParser {
    language: Language,
    backend: Option<Arc<dyn ParserBackend>>,
}

impl ResolvedParser {
    pub(crate) fn new(language: Language, backend: Arc<dyn ParserBackend>) -> Self {
        Self {
            language,
            backend: Some(backend),
        }
    }

    /// Parser of last resort: returns an empty analysis carrying only path and language.
    pub fn noop(language: Language) -> Self {
        Self {
            language,
            backend: None,
        }
    }

    #[must_use]
    pub const fn language(&self) -> Language {
        self.language
    }

    /// `None` for the no-op parser.
    #[must_use]
    pub fn tier(&self) -> Option<Tier> {
        self.backend.as_ref().map(|b| b.tier())
    }

    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.backend.is_none()
    }

    pub async fn parse(&self, content: &str, path: &str) -> Result<FileAnalysis> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(FileAnalysis::empty(path, self.language));
        };
        let mut analysis = backend.parse(self.language, content, path).await?;
        analysis.language = self.language;
        if analysis.path != path {
            analysis.path = path.to_string();
        }
        Ok(analysis)
    }
}

impl std::fmt::Debug for ResolvedParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedParser")
            .field("language", &self.language)
            .field("tier", &self.tier())
            .finish()
    }
}
