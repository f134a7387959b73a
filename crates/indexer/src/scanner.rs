use crate::error::{IndexerError, Result};
use crate::exclusion::ExclusionRules;
use codeatlas_parser::{detect, Language};
use ignore::WalkBuilder;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

pub(crate) const MAX_FILE_SIZE_BYTES: u64 = 1_048_576; // 1 MiB

/// A candidate file found by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Root-relative, `/` separated
    pub rel_path: String,
    pub size: u64,
}

/// Walks a project root for analyzable files (.gitignore aware, hidden entries skipped).
pub struct FileScanner {
    root: PathBuf,
    rules: Arc<dyn ExclusionRules>,
    max_file_size: u64,
    excluded_dirs: Vec<PathBuf>,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>, rules: Arc<dyn ExclusionRules>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            rules,
            max_file_size: MAX_FILE_SIZE_BYTES,
            excluded_dirs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Never descend into `dir` (absolute), e.g. a state directory living inside the root.
    #[must_use]
    pub fn exclude_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded_dirs.push(dir.into());
        self
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Scan the root. Fails only when the root itself cannot be listed; unreadable entries
    /// below it are logged and skipped.
    pub fn scan(&self) -> Result<Vec<ScannedFile>> {
        std::fs::read_dir(&self.root).map_err(|e| IndexerError::UnreadableRoot {
            path: self.root.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut files = Vec::new();

        let root = self.root.clone();
        let rules = Arc::clone(&self.rules);
        let excluded_dirs = self.excluded_dirs.clone();
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true) // do not index hidden files by default
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .require_git(false);
        builder.filter_entry(move |entry| {
            if excluded_dirs.iter().any(|dir| entry.path() == dir) {
                return false;
            }
            match relative_path(&root, entry.path()) {
                Some(rel) if !rel.is_empty() => !rules.is_excluded(&rel),
                _ => true,
            }
        });

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }

                    let path = entry.path();
                    let Some(rel_path) = relative_path(&self.root, path) else {
                        continue;
                    };
                    if detect(&rel_path) == Language::Unknown {
                        continue;
                    }

                    let size = match entry.metadata() {
                        Ok(meta) => meta.len(),
                        Err(e) => {
                            log::warn!("Failed to stat {}: {e}", path.display());
                            continue;
                        }
                    };
                    if size > self.max_file_size {
                        log::debug!(
                            "Skipping large file {} ({} bytes > {})",
                            path.display(),
                            size,
                            self.max_file_size
                        );
                        continue;
                    }

                    files.push(ScannedFile { rel_path, size });
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }

        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        log::info!("Found {} source files under {}", files.len(), self.root.display());
        Ok(files)
    }

    /// Whether a root-relative path reported from outside the walk (e.g. by version control)
    /// would have been picked up by [`scan`](Self::scan). Size is not checked here.
    pub fn accepts(&self, rel_path: &str) -> bool {
        if detect(rel_path) == Language::Unknown {
            return false;
        }
        let mut prefix = String::new();
        for component in rel_path.split('/') {
            if component.is_empty() || component.starts_with('.') {
                return false;
            }
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);
            if self.rules.is_excluded(&prefix) {
                return false;
            }
        }
        let absolute = self.root.join(rel_path);
        !self
            .excluded_dirs
            .iter()
            .any(|dir| absolute.starts_with(dir))
    }
}

/// `path` relative to `root` with `/` separators; `None` when outside the root.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

/// Validate a caller-supplied root-relative path: no absolute paths, no `..`.
pub(crate) fn normalize_rel_path(raw: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::DefaultExclusions;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn scanner(root: &Path) -> FileScanner {
        FileScanner::new(root, Arc::new(DefaultExclusions::new()))
    }

    fn paths(files: &[ScannedFile]) -> Vec<&str> {
        files.iter().map(|f| f.rel_path.as_str()).collect()
    }

    #[test]
    fn finds_source_files_only() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/main.rs"), b"fn main() {}").unwrap();
        fs::write(temp.path().join("README.md"), b"# hi").unwrap();
        fs::write(temp.path().join("Makefile"), b"all:\n").unwrap();
        fs::write(temp.path().join("Cargo.lock"), b"").unwrap();

        let files = scanner(temp.path()).scan().unwrap();
        assert_eq!(paths(&files), vec!["Makefile", "src/main.rs"]);
        assert_eq!(files[1].size, 12);
    }

    #[test]
    fn skips_ignored_directories_and_gitignored_files() {
        let temp = tempdir().unwrap();
        let vendor = temp.path().join("vendor").join("dep");
        fs::create_dir_all(&vendor).unwrap();
        fs::write(vendor.join("dep.go"), b"package dep").unwrap();
        fs::create_dir_all(temp.path().join("gen")).unwrap();
        fs::write(temp.path().join("gen/out.py"), b"x = 1").unwrap();
        fs::write(temp.path().join("app.py"), b"x = 1").unwrap();
        fs::write(temp.path().join(".gitignore"), b"/gen\n").unwrap();
        fs::write(temp.path().join(".hidden.py"), b"x = 1").unwrap();

        let files = scanner(temp.path()).scan().unwrap();
        assert_eq!(paths(&files), vec!["app.py"]);
    }

    #[test]
    fn skips_large_files_and_excluded_state_dir() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("big.js"), vec![b'a'; 2048]).unwrap();
        fs::write(temp.path().join("small.js"), b"let a = 1;").unwrap();
        let state = temp.path().join("state");
        fs::create_dir_all(&state).unwrap();
        fs::write(state.join("notes.py"), b"x = 1").unwrap();

        let files = scanner(temp.path())
            .with_max_file_size(1024)
            .exclude_dir(&state)
            .scan()
            .unwrap();
        assert_eq!(paths(&files), vec!["small.js"]);
    }

    #[test]
    fn missing_root_is_unreadable() {
        let temp = tempdir().unwrap();
        let err = scanner(&temp.path().join("nope")).scan().unwrap_err();
        assert!(matches!(err, IndexerError::UnreadableRoot { .. }));
    }

    #[test]
    fn accepts_mirrors_walk_filters() {
        let temp = tempdir().unwrap();
        let scanner = scanner(temp.path()).exclude_dir(temp.path().join("state"));
        assert!(scanner.accepts("src/lib.rs"));
        assert!(!scanner.accepts("node_modules/a/index.js"));
        assert!(!scanner.accepts(".github/ci.py"));
        assert!(!scanner.accepts("notes.txt"));
        assert!(!scanner.accepts("state/x.rs"));
    }

    #[test]
    fn rel_path_normalization() {
        assert_eq!(normalize_rel_path("./src/lib.rs").as_deref(), Some("src/lib.rs"));
        assert_eq!(normalize_rel_path("../etc/passwd"), None);
        assert_eq!(normalize_rel_path("/etc/passwd"), None);
        assert_eq!(normalize_rel_path(""), None);
        assert_eq!(
            relative_path(Path::new("/repo"), Path::new("/repo/a/b.rs")).as_deref(),
            Some("a/b.rs")
        );
        assert_eq!(relative_path(Path::new("/repo"), Path::new("/other/b.rs")), None);
    }
}
