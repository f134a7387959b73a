//! # codeatlas parser
//!
//! Multi-tier source analysis: every file gets the most accurate parser available for its
//! language, and degrades gracefully when richer tooling is missing.
//!
//! ## Architecture
//!
//! ```text
//! path ──> Language Detection (extension / fixed file names)
//!              │
//!              ▼
//!          ParserRegistry::resolve(language)
//!              ├─> Semantic  (language server over stdio, probed once)
//!              ├─> Ast       (compiled tree-sitter grammar)
//!              ├─> Regex     (line patterns, always available)
//!              └─> no-op     (empty analysis, never fails)
//!              │
//!              ▼
//!          AnalysisPipeline ──> FileAnalysis { symbols, imports, diagnostics, fingerprint }
//! ```
//!
//! ## Example
//!
//! ```rust
//! use codeatlas_parser::{AnalysisPipeline, ParserConfig, ParserRegistry};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Arc::new(ParserRegistry::from_config(&ParserConfig::offline()));
//! let pipeline = AnalysisPipeline::new(registry);
//!
//! let analysis = pipeline
//!     .analyze_bytes("src/lib.rs", b"pub fn process(input: &str) -> String { input.into() }")
//!     .await
//!     .unwrap();
//! assert_eq!(analysis.symbols[0].name, "process");
//! # }
//! ```

pub mod backend;
mod config;
mod error;
mod language;
mod pipeline;
mod registry;
mod types;

pub use backend::semantic::{LspSession, ProcessLauncher, ServerLauncher};
pub use backend::{AstBackend, ParserBackend, RegexBackend, ResolvedParser, SemanticBackend};
pub use config::{ParserConfig, SemanticConfig, ServerSpec, SEMANTIC_ENV};
pub use error::{ParserError, Result};
pub use language::{detect, Language};
pub use pipeline::AnalysisPipeline;
pub use registry::{ParserRegistry, ParserRegistryBuilder};
pub use types::{
    fingerprint, Confidence, Diagnostic, FileAnalysis, Import, Severity, Span, Symbol, SymbolKind,
    Tier, Visibility,
};
