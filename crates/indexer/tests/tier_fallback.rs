use async_trait::async_trait;
use codeatlas_indexer::{IncrementalScanner, IndexStore, MemoryIndexStore, ScanOptions};
use codeatlas_parser::{
    AnalysisPipeline, AstBackend, Confidence, FileAnalysis, Language, ParserBackend, ParserError,
    ParserRegistry, RegexBackend, Result, Span, Symbol, SymbolKind, Tier,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Stand-in for a language server: answers for Go only while enabled.
struct FakeSemantic {
    enabled: AtomicBool,
}

#[async_trait]
impl ParserBackend for FakeSemantic {
    fn tier(&self) -> Tier {
        Tier::Semantic
    }

    fn supports(&self, language: Language) -> bool {
        language == Language::Go
    }

    async fn probe(&self, _language: Language) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn parse(&self, language: Language, _content: &str, path: &str) -> Result<FileAnalysis> {
        let mut analysis = FileAnalysis::for_tier(path, language, Tier::Semantic);
        analysis.symbols.push(Symbol::new(
            "Resolved",
            SymbolKind::Function,
            path,
            Span::line(3, 20),
        ));
        Ok(analysis)
    }
}

fn pipeline(semantic: Option<Arc<FakeSemantic>>) -> AnalysisPipeline {
    let mut builder = ParserRegistry::builder();
    if let Some(semantic) = semantic {
        builder = builder.backend(semantic);
    }
    let registry = builder
        .backend(Arc::new(AstBackend))
        .backend(Arc::new(RegexBackend::new()))
        .build();
    AnalysisPipeline::new(Arc::new(registry))
}

#[tokio::test]
async fn losing_the_semantic_tier_does_not_reprocess_committed_files() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    tokio::fs::write(
        temp.path().join("a.go"),
        "package a\n\nfunc Resolved() {}\n",
    )
    .await?;
    tokio::fs::write(temp.path().join("b.py"), "def helper():\n    pass\n").await?;
    let store = Arc::new(MemoryIndexStore::new());
    let options = ScanOptions::default().without_vcs();

    let semantic = Arc::new(FakeSemantic {
        enabled: AtomicBool::new(true),
    });
    let scanner = IncrementalScanner::new(temp.path(), pipeline(Some(semantic)), store.clone())?;
    let report = scanner.scan(&options).await?;
    assert_eq!(report.tiers.get("semantic"), Some(&1));
    assert_eq!(report.tiers.get("ast"), Some(&1));

    let hits = store.query_symbols("Resolved").await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].confidence, Confidence::Exact);

    // Same tree, registry without the semantic tier.
    let scanner = IncrementalScanner::new(temp.path(), pipeline(None), store.clone())?;
    let report = scanner.scan(&options).await?;
    assert_eq!(report.files_analyzed, 0);
    assert_eq!(report.files_unchanged, 2);
    assert_eq!(
        store.query_symbols("Resolved").await?[0].confidence,
        Confidence::Exact
    );

    // Touched files are re-analyzed by the best tier still available.
    tokio::fs::write(
        temp.path().join("a.go"),
        "package a\n\nfunc Resolved() {}\n\nfunc Later() {}\n",
    )
    .await?;
    let report = scanner.scan(&options).await?;
    assert_eq!(report.files_analyzed, 1);
    assert_eq!(report.tiers.get("ast"), Some(&1));
    assert_eq!(store.query_symbols("Later").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn unavailable_semantic_probe_falls_back_to_ast() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    tokio::fs::write(temp.path().join("a.go"), "package a\n\nfunc A() {}\n").await?;
    let store = Arc::new(MemoryIndexStore::new());
    let semantic = Arc::new(FakeSemantic {
        enabled: AtomicBool::new(false),
    });

    let scanner = IncrementalScanner::new(temp.path(), pipeline(Some(semantic)), store.clone())?;
    let report = scanner.scan(&ScanOptions::default().without_vcs()).await?;
    assert_eq!(report.tiers.get("semantic"), None);
    assert_eq!(report.tiers.get("ast"), Some(&1));
    assert_eq!(store.query_symbols("A").await?[0].confidence, Confidence::Structural);
    Ok(())
}

/// Serves one file, then loses its server for good.
struct DiesAfterFirstFile {
    dead: AtomicBool,
}

#[async_trait]
impl ParserBackend for DiesAfterFirstFile {
    fn tier(&self) -> Tier {
        Tier::Semantic
    }

    fn supports(&self, language: Language) -> bool {
        language == Language::Go
    }

    async fn probe(&self, _language: Language) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }

    fn is_demoted(&self, _language: Language) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    async fn parse(&self, language: Language, _content: &str, path: &str) -> Result<FileAnalysis> {
        if self.dead.swap(true, Ordering::SeqCst) {
            return Err(ParserError::BackendUnavailable("server exited".into()));
        }
        Ok(FileAnalysis::for_tier(path, language, Tier::Semantic))
    }
}

#[tokio::test]
async fn a_language_keeps_one_tier_for_the_whole_scan() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    for name in ["a", "b", "c"] {
        tokio::fs::write(
            temp.path().join(format!("{name}.go")),
            format!("package p\n\nfunc {}() {{}}\n", name.to_uppercase()),
        )
        .await?;
    }
    let semantic = Arc::new(DiesAfterFirstFile {
        dead: AtomicBool::new(false),
    });
    let registry = ParserRegistry::builder()
        .backend(semantic)
        .backend(Arc::new(AstBackend))
        .build();
    let store = Arc::new(MemoryIndexStore::new());
    let scanner = IncrementalScanner::new(
        temp.path(),
        AnalysisPipeline::new(Arc::new(registry)),
        store.clone(),
    )?;
    let options = ScanOptions::default().without_vcs().with_workers(1);

    // The server dies after the first file; the rest of this scan does not switch to the AST
    // tier, it leaves those files for the next scan.
    let report = scanner.scan(&options).await?;
    assert_eq!(report.tiers.len(), 1);
    assert_eq!(report.tiers.get("semantic"), Some(&1));
    assert_eq!(report.transient_failures(), 2);
    assert!(!report.is_complete());

    let report = scanner.scan(&options).await?;
    assert!(report.is_complete());
    assert_eq!(report.files_unchanged, 1);
    assert_eq!(report.tiers.len(), 1);
    assert_eq!(report.tiers.get("ast"), Some(&2));
    Ok(())
}
