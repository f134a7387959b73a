use crate::error::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Name of the default state directory under a scanned root.
pub const DEFAULT_STATE_DIR_NAME: &str = ".codeatlas";

/// Decides which root-relative paths a scan never looks at.
///
/// Called for directories during the walk (an excluded directory prunes its subtree) and for
/// individual files. Paths use `/` separators.
pub trait ExclusionRules: Send + Sync {
    fn is_excluded(&self, rel_path: &str) -> bool;
}

/// VCS metadata, build output, dependency caches, lockfiles and the state directory, plus
/// optional glob patterns.
#[derive(Debug, Clone)]
pub struct DefaultExclusions {
    patterns: Option<GlobSet>,
}

impl Default for DefaultExclusions {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultExclusions {
    pub fn new() -> Self {
        Self { patterns: None }
    }

    /// Add glob patterns matched against the whole root-relative path (`**/generated/**`,
    /// `*.pb.go`).
    pub fn with_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut any = false;
        for pattern in patterns {
            builder.add(Glob::new(pattern.as_ref())?);
            any = true;
        }
        let patterns = if any { Some(builder.build()?) } else { None };
        Ok(Self { patterns })
    }

    fn is_ignored_scope(rel_path: &str) -> bool {
        rel_path.split('/').any(|component| {
            let lowered = component.to_lowercase();
            IGNORED_SCOPES.iter().any(|ignored| *ignored == lowered)
        })
    }

    fn is_noise_file(rel_path: &str) -> bool {
        let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        NOISE_FILE_NAMES
            .iter()
            .any(|candidate| name.eq_ignore_ascii_case(candidate))
    }
}

impl ExclusionRules for DefaultExclusions {
    fn is_excluded(&self, rel_path: &str) -> bool {
        if Self::is_ignored_scope(rel_path) || Self::is_noise_file(rel_path) {
            return true;
        }
        self.patterns
            .as_ref()
            .is_some_and(|set| set.is_match(rel_path))
    }
}

const IGNORED_SCOPES: &[&str] = &[
    // VCS / tooling
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    DEFAULT_STATE_DIR_NAME,
    // caches / builds
    ".cache",
    "node_modules",
    ".next",
    ".turbo",
    ".parcel-cache",
    ".gradle",
    "build",
    "dist",
    "coverage",
    "target",
    ".terraform",
    ".venv",
    "venv",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    // vendored code
    "vendor",
    "third_party",
    "third-party",
];

const NOISE_FILE_NAMES: &[&str] = &[
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "Cargo.lock",
    "poetry.lock",
    "Pipfile.lock",
    "Gemfile.lock",
    "composer.lock",
    "go.sum",
];
