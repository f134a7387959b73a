use codeatlas_indexer::{
    ChangeDetection, IncrementalScanner, IndexStore, MemoryIndexStore, ScanOptions, ScanState,
};
use codeatlas_parser::{AnalysisPipeline, AstBackend, ParserRegistry, RegexBackend};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::process::Command;

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

fn pipeline() -> AnalysisPipeline {
    let registry = ParserRegistry::builder()
        .backend(Arc::new(AstBackend))
        .backend(Arc::new(RegexBackend::new()))
        .build();
    AnalysisPipeline::new(Arc::new(registry))
}

#[tokio::test]
async fn later_scans_diff_against_the_reconciled_commit() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp = TempDir::new()?;
    let repo = temp.path();
    if init_repo(repo).await.is_none() {
        eprintln!("git unavailable; skipping");
        return Ok(());
    }

    tokio::fs::write(repo.join(".gitignore"), ".codeatlas/\n").await?;
    tokio::fs::write(repo.join("a.go"), "package a\n\nfunc A() {}\n").await?;
    tokio::fs::write(repo.join("b.go"), "package a\n\nfunc B() {}\n").await?;
    tokio::fs::write(repo.join("scratch.py"), "def scratch():\n    pass\n").await?;
    git(repo, &["add", "a.go", "b.go", ".gitignore"]).await;
    git(repo, &["commit", "-q", "-m", "initial"]).await;
    let Some(head) = git(repo, &["rev-parse", "HEAD"]).await else {
        eprintln!("git commit failed; skipping");
        return Ok(());
    };

    let store = Arc::new(MemoryIndexStore::new());
    let scanner = IncrementalScanner::new(repo, pipeline(), store.clone())?;

    // No reconciled commit yet: walk everything, then remember HEAD.
    let report = scanner.scan(&ScanOptions::default()).await?;
    assert_eq!(report.mode, ChangeDetection::Fingerprint);
    assert_eq!(report.files_analyzed, 3);
    assert_eq!(report.commit.as_deref(), Some(head.as_str()));

    // Nothing changed: the diff is empty and every recorded file is untouched.
    let report = scanner.scan(&ScanOptions::default()).await?;
    assert_eq!(report.mode, ChangeDetection::Vcs);
    assert_eq!(report.files_analyzed, 0);
    assert_eq!(report.files_unchanged, 3);

    // Tracked edit, tracked delete, untracked delete, untracked add.
    tokio::fs::write(repo.join("a.go"), "package a\n\nfunc A2() {}\n").await?;
    tokio::fs::remove_file(repo.join("b.go")).await?;
    tokio::fs::remove_file(repo.join("scratch.py")).await?;
    tokio::fs::write(repo.join("c.go"), "package a\n\nfunc C() {}\n").await?;

    let report = scanner.scan(&ScanOptions::default()).await?;
    assert_eq!(report.mode, ChangeDetection::Vcs);
    assert_eq!(report.files_analyzed, 2);
    assert_eq!(report.files_deleted, 2);

    let mut indexed: Vec<String> = store.snapshot().await.into_keys().collect();
    indexed.sort();
    assert_eq!(indexed, vec!["a.go", "c.go"]);
    Ok(())
}

#[tokio::test]
async fn reverting_an_uncommitted_edit_is_reindexed() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp = TempDir::new()?;
    let repo = temp.path();
    if init_repo(repo).await.is_none() {
        eprintln!("git unavailable; skipping");
        return Ok(());
    }

    tokio::fs::write(repo.join(".gitignore"), ".codeatlas/\n").await?;
    tokio::fs::write(repo.join("a.go"), "package a\n\nfunc A() {}\n").await?;
    git(repo, &["add", "a.go", ".gitignore"]).await;
    git(repo, &["commit", "-q", "-m", "initial"]).await;
    if git(repo, &["rev-parse", "HEAD"]).await.is_none() {
        eprintln!("git commit failed; skipping");
        return Ok(());
    }

    let store = Arc::new(MemoryIndexStore::new());
    let scanner = IncrementalScanner::new(repo, pipeline(), store.clone())?;
    let options = ScanOptions::default();
    scanner.scan(&options).await?;

    // Uncommitted edit: HEAD stays the same, the diff picks it up.
    tokio::fs::write(repo.join("a.go"), "package a\n\nfunc A() {}\n\nfunc Dirty() {}\n").await?;
    let report = scanner.scan(&options).await?;
    assert_eq!(report.mode, ChangeDetection::Vcs);
    assert_eq!(report.files_analyzed, 1);
    assert_eq!(store.query_symbols("Dirty").await?.len(), 1);

    let state_path = ScanState::path_for(&repo.join(".codeatlas").canonicalize()?, scanner.root());
    let state = ScanState::load(&state_path, scanner.root()).await?;
    assert!(state.dirty.contains("a.go"));

    // Back to the committed content: the diff against HEAD is empty again, but the index
    // still holds the edit.
    git(repo, &["checkout", "--", "a.go"]).await;
    let report = scanner.scan(&options).await?;
    assert_eq!(report.mode, ChangeDetection::Vcs);
    assert_eq!(report.files_analyzed, 1);
    assert!(store.query_symbols("Dirty").await?.is_empty());
    assert_eq!(store.query_symbols("A").await?.len(), 1);

    let state = ScanState::load(&state_path, scanner.root()).await?;
    assert!(state.dirty.is_empty());
    let report = scanner.scan(&options).await?;
    assert_eq!(report.files_analyzed, 0);
    assert_eq!(report.files_unchanged, 1);
    Ok(())
}

#[tokio::test]
async fn restoring_a_deleted_tracked_file_is_reindexed() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp = TempDir::new()?;
    let repo = temp.path();
    if init_repo(repo).await.is_none() {
        eprintln!("git unavailable; skipping");
        return Ok(());
    }

    tokio::fs::write(repo.join(".gitignore"), ".codeatlas/\n").await?;
    tokio::fs::write(repo.join("keep.go"), "package a\n\nfunc Keep() {}\n").await?;
    git(repo, &["add", "keep.go", ".gitignore"]).await;
    git(repo, &["commit", "-q", "-m", "initial"]).await;
    if git(repo, &["rev-parse", "HEAD"]).await.is_none() {
        eprintln!("git commit failed; skipping");
        return Ok(());
    }

    let store = Arc::new(MemoryIndexStore::new());
    let scanner = IncrementalScanner::new(repo, pipeline(), store.clone())?;
    let options = ScanOptions::default();
    scanner.scan(&options).await?;

    tokio::fs::remove_file(repo.join("keep.go")).await?;
    let report = scanner.scan(&options).await?;
    assert_eq!(report.files_deleted, 1);
    assert!(store.query_symbols("Keep").await?.is_empty());

    git(repo, &["checkout", "--", "keep.go"]).await;
    let report = scanner.scan(&options).await?;
    assert_eq!(report.mode, ChangeDetection::Vcs);
    assert_eq!(report.files_analyzed, 1);
    assert_eq!(store.query_symbols("Keep").await?.len(), 1);
    Ok(())
}
