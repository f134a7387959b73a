//! Index store: where committed analyses live and how they are queried.

use crate::error::{StoreError, StoreResult};
use crate::scan_state::write_json_atomic;
use async_trait::async_trait;
use codeatlas_parser::{Confidence, FileAnalysis, Span, SymbolKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

pub const STORE_SCHEMA_VERSION: u32 = 1;

/// One query match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHit {
    pub path: String,
    /// Symbol name or import target
    pub name: String,
    /// `None` for import hits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SymbolKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified_name: Option<String>,
    pub span: Span,
    pub confidence: Confidence,
}

/// Receives committed analyses from the scanner and answers lookups.
///
/// Writes arrive from a single committing task; `flush` marks the durability point after each
/// batch.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Replace everything known about `analysis.path`.
    async fn upsert(&self, analysis: &FileAnalysis) -> StoreResult<()>;

    /// Forget `path`. Unknown paths are not an error.
    async fn remove(&self, path: &str) -> StoreResult<()>;

    /// Symbols named exactly `name` (or whose qualified name is `name`); when none, symbols
    /// whose qualified name ends in `::name` / `.name`.
    async fn query_symbols(&self, name: &str) -> StoreResult<Vec<QueryHit>>;

    /// Case-insensitive substring search over symbol names, qualified names, signatures and
    /// import targets.
    async fn query_text(&self, term: &str) -> StoreResult<Vec<QueryHit>>;

    async fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

fn symbol_hit(analysis: &FileAnalysis, index: usize) -> QueryHit {
    let symbol = &analysis.symbols[index];
    QueryHit {
        path: analysis.path.clone(),
        name: symbol.name.clone(),
        kind: Some(symbol.kind),
        qualified_name: symbol.qualified_name.clone(),
        span: symbol.span,
        confidence: analysis.confidence,
    }
}

fn has_qualified_suffix(qualified: &str, name: &str) -> bool {
    qualified
        .strip_suffix(name)
        .is_some_and(|head| head.ends_with("::") || head.ends_with('.'))
}

fn symbol_hits(files: &BTreeMap<String, FileAnalysis>, name: &str) -> Vec<QueryHit> {
    if name.is_empty() {
        return Vec::new();
    }
    let collect = |matches: &dyn Fn(&codeatlas_parser::Symbol) -> bool| {
        files
            .values()
            .flat_map(|analysis| {
                analysis
                    .symbols
                    .iter()
                    .enumerate()
                    .filter(move |(_, symbol)| matches(symbol))
                    .map(move |(i, _)| symbol_hit(analysis, i))
            })
            .collect::<Vec<_>>()
    };

    let exact = collect(&|symbol| {
        symbol.name == name || symbol.qualified_name.as_deref() == Some(name)
    });
    if !exact.is_empty() {
        return exact;
    }
    collect(&|symbol| {
        symbol
            .qualified_name
            .as_deref()
            .is_some_and(|q| has_qualified_suffix(q, name))
    })
}

fn text_hits(files: &BTreeMap<String, FileAnalysis>, term: &str) -> Vec<QueryHit> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    let contains = |text: &str| text.to_lowercase().contains(&needle);

    let mut hits = Vec::new();
    for analysis in files.values() {
        for (i, symbol) in analysis.symbols.iter().enumerate() {
            if contains(&symbol.name)
                || symbol.qualified_name.as_deref().is_some_and(contains)
                || symbol.signature.as_deref().is_some_and(contains)
            {
                hits.push(symbol_hit(analysis, i));
            }
        }
        for import in &analysis.imports {
            if contains(&import.target) {
                hits.push(QueryHit {
                    path: analysis.path.clone(),
                    name: import.target.clone(),
                    kind: None,
                    qualified_name: None,
                    span: Span::line(import.line, import.target.len()),
                    confidence: analysis.confidence,
                });
            }
        }
    }
    hits.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.span.cmp(&b.span)));
    hits
}

/// In-process store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    files: RwLock<BTreeMap<String, FileAnalysis>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored analysis, keyed by path.
    pub async fn snapshot(&self) -> BTreeMap<String, FileAnalysis> {
        self.files.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }

    pub async fn get(&self, path: &str) -> Option<FileAnalysis> {
        self.files.read().await.get(path).cloned()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn upsert(&self, analysis: &FileAnalysis) -> StoreResult<()> {
        self.files
            .write()
            .await
            .insert(analysis.path.clone(), analysis.clone());
        Ok(())
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        self.files.write().await.remove(path);
        Ok(())
    }

    async fn query_symbols(&self, name: &str) -> StoreResult<Vec<QueryHit>> {
        Ok(symbol_hits(&*self.files.read().await, name))
    }

    async fn query_text(&self, term: &str) -> StoreResult<Vec<QueryHit>> {
        Ok(text_hits(&*self.files.read().await, term))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    schema_version: u32,
    files: BTreeMap<String, FileAnalysis>,
}

/// Store backed by one JSON file, rewritten atomically on `flush` when dirty.
#[derive(Debug)]
pub struct JsonIndexStore {
    path: PathBuf,
    inner: MemoryIndexStore,
    dirty: AtomicBool,
}

impl JsonIndexStore {
    /// Open `path`, loading existing contents. A missing file is an empty store.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let files = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let persisted: PersistedStore = serde_json::from_slice(&bytes)?;
                if persisted.schema_version != STORE_SCHEMA_VERSION {
                    return Err(StoreError::Schema {
                        found: persisted.schema_version,
                        expected: STORE_SCHEMA_VERSION,
                    });
                }
                persisted.files
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        log::debug!("Opened index store {} ({} files)", path.display(), files.len());

        Ok(Self {
            path,
            inner: MemoryIndexStore {
                files: RwLock::new(files),
            },
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> BTreeMap<String, FileAnalysis> {
        self.inner.snapshot().await
    }
}

#[async_trait]
impl IndexStore for JsonIndexStore {
    async fn upsert(&self, analysis: &FileAnalysis) -> StoreResult<()> {
        self.inner.upsert(analysis).await?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        self.inner.remove(path).await?;
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    async fn query_symbols(&self, name: &str) -> StoreResult<Vec<QueryHit>> {
        self.inner.query_symbols(name).await
    }

    async fn query_text(&self, term: &str) -> StoreResult<Vec<QueryHit>> {
        self.inner.query_text(term).await
    }

    async fn flush(&self) -> StoreResult<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let persisted = PersistedStore {
            schema_version: STORE_SCHEMA_VERSION,
            files: self.inner.snapshot().await,
        };
        if let Err(e) = write_json_atomic(&self.path, &persisted).await {
            self.dirty.store(true, Ordering::Release);
            return Err(e.into());
        }
        Ok(())
    }
}
