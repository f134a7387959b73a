use crate::error::{IndexerError, Result};
use codeatlas_parser::{Diagnostic, FileAnalysis, Language, Tier};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

pub const SCAN_STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Indexed,
    /// Analysis carried error diagnostics; kept out of the index store
    Failed,
}

/// What the last committed scan knew about one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub fingerprint: String,
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    pub status: EntryStatus,
    /// Only recorded for failed entries, so unchanged broken files keep reporting them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl StateEntry {
    pub fn from_analysis(analysis: &FileAnalysis) -> Self {
        let failed = analysis.is_failed();
        Self {
            fingerprint: analysis.fingerprint.clone(),
            language: analysis.language,
            tier: analysis.tier,
            status: if failed {
                EntryStatus::Failed
            } else {
                EntryStatus::Indexed
            },
            diagnostics: if failed {
                analysis.diagnostics.clone()
            } else {
                Vec::new()
            },
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == EntryStatus::Failed
    }
}

/// Persisted path → fingerprint mapping for one root.
///
/// Written whole via temp file + rename, so readers see either the previous or the next commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    pub schema_version: u32,
    pub root: String,
    /// Last version-control commit whose changes are fully reflected in `entries`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
    /// Paths whose recorded content may differ from `last_commit` (uncommitted edits, untracked
    /// files). They are re-checked on every diff-based scan, so reverting an edit is noticed
    /// even though the diff against `last_commit` no longer mentions the file.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub dirty: BTreeSet<String>,
    #[serde(default)]
    pub updated_at_unix_ms: u64,
    #[serde(default)]
    pub entries: BTreeMap<String, StateEntry>,
}

impl ScanState {
    pub fn new(root: &Path) -> Self {
        Self {
            schema_version: SCAN_STATE_SCHEMA_VERSION,
            root: root.display().to_string(),
            last_commit: None,
            dirty: BTreeSet::new(),
            updated_at_unix_ms: 0,
            entries: BTreeMap::new(),
        }
    }

    /// `<state_dir>/scan-state-<root fingerprint>.json`
    pub fn path_for(state_dir: &Path, root: &Path) -> PathBuf {
        let fingerprint = root_fingerprint(&root.display().to_string());
        state_dir.join(format!("scan-state-{fingerprint:016x}.json"))
    }

    /// Load the state for `root`. A missing, unparsable, foreign or outdated file yields an
    /// empty state (forcing re-analysis); only a failed read is an error.
    pub async fn load(path: &Path, root: &Path) -> Result<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new(root)),
            Err(e) => {
                return Err(IndexerError::Persistence(format!(
                    "read scan state {}: {e}",
                    path.display()
                )))
            }
        };

        let state: Self = match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                log::warn!(
                    "Scan state {} is corrupt ({e}); starting fresh",
                    path.display()
                );
                return Ok(Self::new(root));
            }
        };

        if state.schema_version != SCAN_STATE_SCHEMA_VERSION {
            log::warn!(
                "Scan state {} has schema {} (expected {}); starting fresh",
                path.display(),
                state.schema_version,
                SCAN_STATE_SCHEMA_VERSION
            );
            return Ok(Self::new(root));
        }
        let expected_root = root.display().to_string();
        if state.root != expected_root {
            log::warn!(
                "Scan state {} belongs to {} not {expected_root}; starting fresh",
                path.display(),
                state.root
            );
            return Ok(Self::new(root));
        }

        log::debug!(
            "Loaded scan state {} ({} entries)",
            path.display(),
            state.entries.len()
        );
        Ok(state)
    }

    /// Atomically replace the state file.
    pub async fn save(&mut self, path: &Path) -> Result<()> {
        self.updated_at_unix_ms = unix_now_ms();
        write_json_atomic(path, self).await.map_err(|e| {
            IndexerError::Persistence(format!("write scan state {}: {e}", path.display()))
        })
    }

    pub fn get(&self, path: &str) -> Option<&StateEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn record(&mut self, analysis: &FileAnalysis) {
        self.entries
            .insert(analysis.path.clone(), StateEntry::from_analysis(analysis));
    }

    pub fn remove(&mut self, path: &str) -> Option<StateEntry> {
        self.entries.remove(path)
    }

    /// Fingerprints only; what workers need to decide whether a file changed.
    pub fn fingerprints(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(path, entry)| (path.clone(), entry.fingerprint.clone()))
            .collect()
    }
}

/// Stable 64-bit fingerprint of a root path, used to key state files without embedding the path.
#[must_use]
pub fn root_fingerprint(root_display: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(root_display.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Serialize `value` next to `path`, sync it to disk and rename it into place.
pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    if let Some(parent) = parent {
        sync_dir(parent).await;
    }
    Ok(())
}

/// Persist the rename itself. Directories cannot be opened for syncing on every platform, so
/// failures are only logged.
async fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        let synced = match tokio::fs::File::open(dir).await {
            Ok(handle) => handle.sync_all().await,
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            log::debug!("sync of {} failed: {e}", dir.display());
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}

pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeatlas_parser::{Span, Symbol, SymbolKind};
    use pretty_assertions::assert_eq;

    fn analysis(path: &str, broken: bool) -> FileAnalysis {
        let mut analysis = FileAnalysis::for_tier(path, Language::Go, Tier::Ast);
        analysis.fingerprint = format!("fp-{path}");
        analysis
            .symbols
            .push(Symbol::new("Run", SymbolKind::Function, path, Span::line(3, 10)));
        if broken {
            analysis.diagnostics.push(Diagnostic::error(
                "Missing `}`",
                Some(Span::line(5, 1)),
                Some(Tier::Ast),
            ));
        }
        analysis
    }

    #[test]
    fn entries_record_status_and_failure_diagnostics() {
        let root = Path::new("/repo");
        let mut state = ScanState::new(root);
        state.record(&analysis("a.go", false));
        state.record(&analysis("b.go", true));

        let a = state.get("a.go").unwrap();
        assert_eq!(a.status, EntryStatus::Indexed);
        assert!(a.diagnostics.is_empty());
        let b = state.get("b.go").unwrap();
        assert!(b.is_failed());
        assert_eq!(b.diagnostics.len(), 1);
        assert_eq!(state.paths().collect::<Vec<_>>(), vec!["a.go", "b.go"]);

        state.remove("a.go");
        assert_eq!(state.len(), 1);
    }

    #[tokio::test]
    async fn save_and_load_round_trip_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let path = ScanState::path_for(&dir.path().join("state"), &root);

        let mut state = ScanState::new(&root);
        state.last_commit = Some("abc123".into());
        state.dirty.insert("scratch.go".into());
        state.record(&analysis("b.go", true));
        state.save(&path).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
        let loaded = ScanState::load(&path, &root).await.unwrap();
        assert_eq!(loaded, state);

        // Overwriting replaces the whole document, never appends to it.
        state.dirty.clear();
        state.remove("b.go");
        state.save(&path).await.unwrap();
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!raw.contains("dirty") && !raw.contains("b.go"), "{raw}");
        assert_eq!(ScanState::load(&path, &root).await.unwrap(), state);
    }

    #[tokio::test]
    async fn states_written_before_dirty_tracking_still_load() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let path = dir.path().join("scan-state.json");
        let legacy = serde_json::json!({
            "schema_version": SCAN_STATE_SCHEMA_VERSION,
            "root": root.display().to_string(),
            "last_commit": "abc123",
            "entries": {}
        });
        tokio::fs::write(&path, serde_json::to_vec(&legacy).unwrap())
            .await
            .unwrap();

        let loaded = ScanState::load(&path, &root).await.unwrap();
        assert_eq!(loaded.last_commit.as_deref(), Some("abc123"));
        assert!(loaded.dirty.is_empty());
    }

    #[tokio::test]
    async fn unusable_files_start_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let path = dir.path().join("scan-state.json");

        assert!(ScanState::load(&path, &root).await.unwrap().is_empty());

        tokio::fs::write(&path, b"{ not json").await.unwrap();
        assert!(ScanState::load(&path, &root).await.unwrap().is_empty());

        let mut foreign = ScanState::new(Path::new("/elsewhere"));
        foreign.record(&analysis("a.go", false));
        foreign.save(&path).await.unwrap();
        assert!(ScanState::load(&path, &root).await.unwrap().is_empty());

        let mut outdated = ScanState::new(&root);
        outdated.schema_version = SCAN_STATE_SCHEMA_VERSION + 1;
        outdated.record(&analysis("a.go", false));
        outdated.save(&path).await.unwrap();
        assert!(ScanState::load(&path, &root).await.unwrap().is_empty());
    }

    #[test]
    fn state_file_name_is_keyed_by_root() {
        let a = ScanState::path_for(Path::new("/state"), Path::new("/repo/a"));
        let b = ScanState::path_for(Path::new("/state"), Path::new("/repo/b"));
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("scan-state-"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "scan-state-".len() + 16 + ".json".len());
    }
}
