//! # Codeatlas Indexer
//!
//! Incremental scanning of a project root into an index store.
//!
//! ## Pipeline
//!
//! ```text
//! Project root
//!     │
//!     ├──> Change detection (git diff since last commit, or fingerprint walk)
//!     │      └─> Candidates / deletions
//!     │
//!     ├──> Worker pool (bounded, one analysis per changed file)
//!     │      └─> FileAnalysis
//!     │
//!     └──> Committer (single writer, batched)
//!            └─> Index store + scan state
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use codeatlas_indexer::{IncrementalScanner, MemoryIndexStore, ScanOptions};
//! use codeatlas_parser::{AnalysisPipeline, ParserConfig, ParserRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Arc::new(ParserRegistry::from_config(&ParserConfig::default()));
//!     let store = Arc::new(MemoryIndexStore::new());
//!     let scanner = IncrementalScanner::new(
//!         "/path/to/project",
//!         AnalysisPipeline::new(registry),
//!         store,
//!     )?;
//!
//!     let report = scanner.scan(&ScanOptions::default()).await?;
//!     println!(
//!         "Scanned {} files ({} analyzed, {} failed)",
//!         report.files_scanned, report.files_analyzed, report.files_failed
//!     );
//!     Ok(())
//! }
//! ```

mod cancel;
mod change;
mod error;
mod exclusion;
mod limits;
mod options;
mod report;
mod scan;
mod scan_lock;
mod scan_state;
mod scanner;
mod store;
mod vcs;

pub use cancel::ScanCancel;
pub use error::{IndexerError, Result, StoreError, StoreResult};
pub use exclusion::{DefaultExclusions, ExclusionRules, DEFAULT_STATE_DIR_NAME};
pub use limits::{scan_workers, MAX_SCAN_WORKERS, SCAN_WORKERS_ENV};
pub use options::{ScanOptions, DEFAULT_BATCH_SIZE, DEFAULT_GRACE_PERIOD};
pub use report::{ChangeDetection, FileDiagnostic, ScanReport};
pub use scan::IncrementalScanner;
pub use scan_state::{
    root_fingerprint, EntryStatus, ScanState, StateEntry, SCAN_STATE_SCHEMA_VERSION,
};
pub use scanner::{relative_path, FileScanner, ScannedFile};
pub use store::{IndexStore, JsonIndexStore, MemoryIndexStore, QueryHit, STORE_SCHEMA_VERSION};
pub use vcs::{GitCli, VersionControl, MAX_CHANGED_PATHS};
