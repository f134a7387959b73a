use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

// Probes must stay cheap and bounded; a slow `git` falls back to fingerprint scanning.
const GIT_HEAD_TIMEOUT: Duration = Duration::from_millis(1_000);
const GIT_DIFF_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Above this many changed paths a full fingerprint pass is cheaper than the diff bookkeeping.
pub const MAX_CHANGED_PATHS: usize = 20_000;

/// Version-control view of a project root.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Commit the working tree is based on; `None` when the root is not a repository or the
    /// tool does not answer.
    async fn current_commit(&self) -> Option<String>;

    /// Root-relative paths that differ between `commit` and the working tree, including
    /// untracked, non-ignored files. `None` when the question cannot be answered.
    async fn changed_since(&self, commit: &str) -> Option<BTreeSet<String>>;
}

/// `git` subprocesses with bounded timeouts.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    max_paths: usize,
}

impl GitCli {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_paths: MAX_CHANGED_PATHS,
        }
    }

    #[must_use]
    pub fn with_max_paths(mut self, max_paths: usize) -> Self {
        self.max_paths = max_paths;
        self
    }

    async fn git(&self, args: &[&str], limit: Duration) -> Option<Output> {
        let output = timeout(
            limit,
            Command::new("git")
                .arg("-C")
                .arg(&self.root)
                .args(args)
                .kill_on_drop(true)
                .output(),
        )
        .await;
        match output {
            Ok(Ok(output)) if output.status.success() => Some(output),
            Ok(Ok(output)) => {
                log::debug!(
                    "git {} failed: {}",
                    args.join(" "),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                None
            }
            Ok(Err(e)) => {
                log::debug!("git unavailable: {e}");
                None
            }
            Err(_) => {
                log::warn!("git {} timed out after {limit:?}", args.join(" "));
                None
            }
        }
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn current_commit(&self) -> Option<String> {
        if !self.root.join(".git").exists() {
            return None;
        }
        let head = self.git(&["rev-parse", "HEAD"], GIT_HEAD_TIMEOUT).await?;
        let head = String::from_utf8_lossy(&head.stdout).trim().to_string();
        (!head.is_empty()).then_some(head)
    }

    async fn changed_since(&self, commit: &str) -> Option<BTreeSet<String>> {
        let commit = commit.trim();
        if commit.is_empty() || commit.starts_with('-') {
            return None;
        }

        // Tracked changes (including deletions) relative to the working tree.
        let diff = self
            .git(
                &["diff", "--name-only", "--relative", "--no-renames", "-z", commit],
                GIT_DIFF_TIMEOUT,
            )
            .await?;
        let untracked = self
            .git(
                &["ls-files", "--others", "--exclude-standard", "-z"],
                GIT_DIFF_TIMEOUT,
            )
            .await?;

        let mut changed = BTreeSet::new();
        for token in diff
            .stdout
            .split(|b| *b == 0)
            .chain(untracked.stdout.split(|b| *b == 0))
        {
            if token.is_empty() {
                continue;
            }
            changed.insert(String::from_utf8_lossy(token).into_owned());
            if changed.len() > self.max_paths {
                log::info!(
                    "More than {} paths changed since {commit}; falling back to fingerprints",
                    self.max_paths
                );
                return None;
            }
        }
        Some(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn git(repo: &Path, args: &[&str]) -> Option<String> {
        let out = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .output()
            .await
            .ok()?;
        out.status
            .success()
            .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    async fn init_repo(repo: &Path) -> Option<()> {
        git(repo, &["init", "-q"]).await?;
        git(repo, &["config", "user.email", "test@example.com"]).await?;
        git(repo, &["config", "user.name", "Test"]).await?;
        git(repo, &["config", "commit.gpgsign", "false"]).await?;
        Some(())
    }

    #[tokio::test]
    async fn not_a_repository_has_no_commit() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(GitCli::new(dir.path()).current_commit().await, None);
    }

    #[tokio::test]
    async fn changed_since_lists_modified_deleted_and_untracked() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path();
        if init_repo(repo).await.is_none() {
            eprintln!("git unavailable; skipping");
            return;
        }

        tokio::fs::write(repo.join("a.go"), "package a\n").await.unwrap();
        tokio::fs::write(repo.join("b.go"), "package b\n").await.unwrap();
        tokio::fs::write(repo.join("c.go"), "package c\n").await.unwrap();
        git(repo, &["add", "."]).await.unwrap();
        git(repo, &["commit", "-q", "-m", "c1"]).await.unwrap();

        let vcs = GitCli::new(repo);
        let head = vcs.current_commit().await.expect("head");
        assert_eq!(vcs.changed_since(&head).await, Some(BTreeSet::new()));

        tokio::fs::write(repo.join("a.go"), "package a\n\nfunc A() {}\n")
            .await
            .unwrap();
        tokio::fs::remove_file(repo.join("b.go")).await.unwrap();
        tokio::fs::write(repo.join("new.go"), "package n\n").await.unwrap();
        tokio::fs::write(repo.join(".gitignore"), "ignored.go\n").await.unwrap();
        tokio::fs::write(repo.join("ignored.go"), "package i\n").await.unwrap();

        let changed = vcs.changed_since(&head).await.expect("diff");
        let expected: BTreeSet<String> = ["a.go", "b.go", "new.go", ".gitignore"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(changed, expected);
    }

    #[tokio::test]
    async fn too_many_changes_is_unanswerable() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path();
        if init_repo(repo).await.is_none() {
            eprintln!("git unavailable; skipping");
            return;
        }
        tokio::fs::write(repo.join("a.go"), "package a\n").await.unwrap();
        git(repo, &["add", "."]).await.unwrap();
        git(repo, &["commit", "-q", "-m", "c1"]).await.unwrap();
        let vcs = GitCli::new(repo).with_max_paths(1);
        let head = vcs.current_commit().await.expect("head");

        tokio::fs::write(repo.join("x.go"), "package x\n").await.unwrap();
        tokio::fs::write(repo.join("y.go"), "package y\n").await.unwrap();
        assert_eq!(vcs.changed_since(&head).await, None);
        assert_eq!(vcs.changed_since("--output=x").await, None);
    }
}
