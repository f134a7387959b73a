use crate::error::{IndexerError, Result};
use crate::report::ChangeDetection;
use crate::scan_state::ScanState;
use crate::scanner::FileScanner;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// What a scan has to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChangeSet {
    pub mode: ChangeDetection,
    /// Paths to read; each is confirmed (or found unchanged) by fingerprint
    pub candidates: Vec<String>,
    /// Recorded paths no longer present (or no longer eligible)
    pub deleted: Vec<String>,
    /// Recorded paths known unchanged without reading them
    pub untouched: Vec<String>,
}

/// Walk the whole tree: every file is a candidate, every recorded path missing from the walk is
/// deleted.
pub(crate) async fn walk_changes(
    scanner: Arc<FileScanner>,
    state: &ScanState,
    force_full: bool,
) -> Result<ChangeSet> {
    let files = tokio::task::spawn_blocking(move || scanner.scan())
        .await
        .map_err(|e| IndexerError::Other(format!("file walk task failed: {e}")))??;

    let present: HashSet<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
    let deleted = state
        .paths()
        .filter(|path| !present.contains(path))
        .map(str::to_string)
        .collect();

    Ok(ChangeSet {
        mode: if force_full {
            ChangeDetection::Full
        } else {
            ChangeDetection::Fingerprint
        },
        candidates: files.into_iter().map(|f| f.rel_path).collect(),
        deleted,
        untouched: Vec::new(),
    })
}

/// Narrow the candidate set to what version control reports as changed. Every recorded path
/// outside that set is existence-checked with a stat, so deletions of untracked files are
/// caught too.
pub(crate) async fn vcs_changes(
    scanner: Arc<FileScanner>,
    root: PathBuf,
    state: &ScanState,
    changed: BTreeSet<String>,
) -> Result<ChangeSet> {
    let recorded: Vec<String> = state.paths().map(str::to_string).collect();

    tokio::task::spawn_blocking(move || {
        let recorded_set: HashSet<&str> = recorded.iter().map(String::as_str).collect();
        let eligible = |rel_path: &str| {
            scanner.accepts(rel_path)
                && std::fs::metadata(root.join(rel_path))
                    .is_ok_and(|meta| meta.is_file() && meta.len() <= scanner.max_file_size())
        };

        let mut candidates = Vec::new();
        let mut deleted = Vec::new();
        for path in &changed {
            if eligible(path) {
                candidates.push(path.clone());
            } else if recorded_set.contains(path.as_str()) {
                deleted.push(path.clone());
            }
        }

        let mut untouched = Vec::new();
        for path in &recorded {
            if changed.contains(path) {
                continue;
            }
            if eligible(path) {
                untouched.push(path.clone());
            } else {
                deleted.push(path.clone());
            }
        }

        ChangeSet {
            mode: ChangeDetection::Vcs,
            candidates,
            deleted,
            untouched,
        }
    })
    .await
    .map_err(|e| IndexerError::Other(format!("change detection task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::DefaultExclusions;
    use codeatlas_parser::{FileAnalysis, Language, Tier};
    use pretty_assertions::assert_eq;
    use std::fs;

    fn record(state: &mut ScanState, path: &str) {
        let mut analysis = FileAnalysis::for_tier(path, Language::Go, Tier::Ast);
        analysis.fingerprint = "f".into();
        state.record(&analysis);
    }

    fn scanner(root: &std::path::Path) -> Arc<FileScanner> {
        Arc::new(FileScanner::new(root, Arc::new(DefaultExclusions::new())))
    }

    #[tokio::test]
    async fn walk_marks_missing_recorded_paths_deleted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.go"), "package a").unwrap();
        fs::write(dir.path().join("c.go"), "package c").unwrap();
        let mut state = ScanState::new(dir.path());
        record(&mut state, "a.go");
        record(&mut state, "b.go");

        let changes = walk_changes(scanner(dir.path()), &state, false)
            .await
            .unwrap();
        assert_eq!(changes.mode, ChangeDetection::Fingerprint);
        assert_eq!(changes.candidates, vec!["a.go", "c.go"]);
        assert_eq!(changes.deleted, vec!["b.go"]);
    }

    #[tokio::test]
    async fn vcs_narrows_candidates_and_stats_recorded_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.go"), "package a").unwrap();
        fs::write(dir.path().join("keep.go"), "package k").unwrap();
        fs::write(dir.path().join("new.go"), "package n").unwrap();
        let mut state = ScanState::new(dir.path());
        for path in ["a.go", "keep.go", "gone_tracked.go", "gone_untracked.go"] {
            record(&mut state, path);
        }

        let changed: BTreeSet<String> = ["a.go", "new.go", "gone_tracked.go", "README.md"]
            .into_iter()
            .map(String::from)
            .collect();
        let changes = vcs_changes(scanner(dir.path()), dir.path().to_path_buf(), &state, changed)
            .await
            .unwrap();

        assert_eq!(changes.mode, ChangeDetection::Vcs);
        assert_eq!(changes.candidates, vec!["a.go", "new.go"]);
        assert_eq!(changes.deleted, vec!["gone_tracked.go", "gone_untracked.go"]);
        assert_eq!(changes.untouched, vec!["keep.go"]);
    }
}
