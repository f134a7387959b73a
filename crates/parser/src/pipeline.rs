use crate::backend::ResolvedParser;
use crate::error::Result;
use crate::language::detect;
use crate::registry::ParserRegistry;
use crate::types::{fingerprint, Diagnostic, FileAnalysis};
use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

/// Bytes inspected when deciding whether a file is binary.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// Read → detect → resolve → parse → normalize, for one file at a time.
///
/// Cheap to clone; clones share the registry.
#[derive(Debug, Clone)]
pub struct AnalysisPipeline {
    registry: Arc<ParserRegistry>,
}

impl AnalysisPipeline {
    pub fn new(registry: Arc<ParserRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ParserRegistry> {
        &self.registry
    }

    /// Analyze `root/rel_path`. Read failures are returned as errors; malformed source is not.
    pub async fn analyze_file(&self, root: &Path, rel_path: &str) -> Result<FileAnalysis> {
        let bytes = tokio::fs::read(root.join(rel_path)).await?;
        self.analyze_bytes(rel_path, &bytes).await
    }

    /// Analyze in-memory content as if it lived at `rel_path`.
    pub async fn analyze_bytes(&self, rel_path: &str, bytes: &[u8]) -> Result<FileAnalysis> {
        let parser = self.registry.resolve(detect(rel_path)).await;
        self.analyze_with(&parser, rel_path, bytes).await
    }

    /// Analyze with an already-resolved parser. A parser for a different language than the
    /// path's is ignored and the right one resolved instead.
    pub async fn analyze_with(
        &self,
        parser: &ResolvedParser,
        rel_path: &str,
        bytes: &[u8],
    ) -> Result<FileAnalysis> {
        let language = detect(rel_path);
        let resolved;
        let parser = if parser.language() == language {
            parser
        } else {
            resolved = self.registry.resolve(language).await;
            &resolved
        };

        let mut notes = Vec::new();
        let mut analysis = if is_binary(bytes) {
            notes.push(Diagnostic::warning(
                "Binary content; not parsed",
                None,
                None,
            ));
            FileAnalysis::empty(rel_path, language)
        } else {
            let text = String::from_utf8_lossy(bytes);
            if let Cow::Owned(_) = text {
                notes.push(Diagnostic::warning(
                    "Invalid UTF-8; undecodable bytes were replaced",
                    None,
                    None,
                ));
            }
            parser.parse(&text, rel_path).await?
        };

        analysis.path = rel_path.to_string();
        analysis.language = language;
        analysis.fingerprint = fingerprint(bytes);
        analysis.diagnostics.extend(notes);
        analysis.normalize();
        Ok(analysis)
    }
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(BINARY_SNIFF_BYTES)].contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserConfig;
    use crate::language::Language;
    use crate::types::{Severity, Tier};

    fn pipeline(config: ParserConfig) -> AnalysisPipeline {
        AnalysisPipeline::new(Arc::new(ParserRegistry::from_config(&config)))
    }

    #[tokio::test]
    async fn reads_and_fingerprints_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn hello() {}\n").unwrap();

        let analysis = pipeline(ParserConfig::offline())
            .analyze_file(dir.path(), "src/lib.rs")
            .await
            .unwrap();
        assert_eq!(analysis.path, "src/lib.rs");
        assert_eq!(analysis.language, Language::Rust);
        assert_eq!(analysis.tier, Some(Tier::Ast));
        assert_eq!(analysis.fingerprint, fingerprint(b"pub fn hello() {}\n"));
        assert_eq!(analysis.symbols[0].file, "src/lib.rs");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = pipeline(ParserConfig::offline())
            .analyze_file(dir.path(), "gone.rs")
            .await;
        assert!(matches!(result, Err(crate::ParserError::IoError(_))));
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_warning() {
        let mut bytes = b"def ok():\n    pass\n# ".to_vec();
        bytes.push(0xFF);
        let analysis = pipeline(ParserConfig::for_speed())
            .analyze_bytes("mod.py", &bytes)
            .await
            .unwrap();
        assert!(!analysis.is_failed());
        assert_eq!(analysis.symbols.len(), 1);
        assert!(analysis
            .diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning));
    }

    #[tokio::test]
    async fn unknown_and_binary_files_are_not_parsed() {
        let pipeline = pipeline(ParserConfig::offline());
        let notes = pipeline.analyze_bytes("notes.txt", b"hello").await.unwrap();
        assert!(notes.tier.is_none());
        assert!(notes.diagnostics.is_empty());

        let blob = pipeline.analyze_bytes("blob.rs", b"\0\0\0").await.unwrap();
        assert!(blob.symbols.is_empty());
        assert_eq!(blob.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn mismatched_parser_is_replaced() {
        let pipeline = pipeline(ParserConfig::for_speed());
        let python = pipeline.registry().resolve(Language::Python).await;
        let analysis = pipeline
            .analyze_with(&python, "main.go", b"package main\n\nfunc main() {}\n")
            .await
            .unwrap();
        assert_eq!(analysis.language, Language::Go);
        assert_eq!(analysis.symbols[0].name, "main");
    }
}
