use crate::change::{vcs_changes, walk_changes, ChangeSet};
use crate::error::{IndexerError, Result};
use crate::exclusion::{DefaultExclusions, ExclusionRules, DEFAULT_STATE_DIR_NAME};
use crate::limits::scan_workers;
use crate::options::ScanOptions;
use crate::report::{ChangeDetection, ScanReport};
use crate::scan_lock::acquire_scan_lock;
use crate::scan_state::ScanState;
use crate::scanner::{normalize_rel_path, FileScanner};
use crate::store::IndexStore;
use crate::vcs::{GitCli, VersionControl};
use codeatlas_parser::{
    detect, fingerprint, AnalysisPipeline, FileAnalysis, Language, ResolvedParser,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{self, JoinError, JoinSet};

/// Incremental scanner for one project root.
///
/// Change detection picks the candidate files, a bounded worker pool analyzes them, and a
/// single committer applies the results to the index store and the scan state in batches.
/// Writers are serialized across processes by a lock file in the state directory.
pub struct IncrementalScanner {
    root: PathBuf,
    pipeline: AnalysisPipeline,
    store: Arc<dyn IndexStore>,
    rules: Arc<dyn ExclusionRules>,
    vcs: Arc<dyn VersionControl>,
}

impl IncrementalScanner {
    /// Create a scanner for `root`, which must be an existing directory.
    pub fn new(
        root: impl AsRef<Path>,
        pipeline: AnalysisPipeline,
        store: Arc<dyn IndexStore>,
    ) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(IndexerError::InvalidPath(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let root = root.canonicalize()?;
        let vcs: Arc<dyn VersionControl> = Arc::new(GitCli::new(&root));

        Ok(Self {
            root,
            pipeline,
            store,
            rules: Arc::new(DefaultExclusions::new()),
            vcs,
        })
    }

    #[must_use]
    pub fn with_exclusions(mut self, rules: Arc<dyn ExclusionRules>) -> Self {
        self.rules = rules;
        self
    }

    #[must_use]
    pub fn with_version_control(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = vcs;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pipeline(&self) -> &AnalysisPipeline {
        &self.pipeline
    }

    fn state_dir(&self, options: &ScanOptions) -> PathBuf {
        options
            .state_dir
            .clone()
            .unwrap_or_else(|| self.root.join(DEFAULT_STATE_DIR_NAME))
    }

    fn file_scanner(&self, options: &ScanOptions, state_dir: &Path) -> FileScanner {
        FileScanner::new(&self.root, Arc::clone(&self.rules))
            .with_max_file_size(options.max_file_size)
            .exclude_dir(state_dir)
    }

    /// Bring the index store and scan state in line with the tree.
    ///
    /// Per-file problems end up in the report; only an unreadable root or a failing
    /// persistence layer (state file, lock, index store) fails the scan.
    pub async fn scan(&self, options: &ScanOptions) -> Result<ScanReport> {
        let started = Instant::now();
        let state_dir = self.state_dir(options);
        let lock = acquire_scan_lock(&state_dir).await?;
        let state_dir = tokio::fs::canonicalize(&state_dir).await?;
        let state_path = ScanState::path_for(&state_dir, &self.root);
        let mut state = ScanState::load(&state_path, &self.root).await?;

        let scanner = Arc::new(self.file_scanner(options, &state_dir));
        let head = if options.use_vcs {
            self.vcs.current_commit().await
        } else {
            None
        };
        // Everything that differs from HEAD right now; becomes the dirty set once the scan
        // completes.
        let baseline = match head.as_deref() {
            Some(head) => self.vcs.changed_since(head).await.map(|paths| {
                paths
                    .into_iter()
                    .filter(|path| scanner.accepts(path))
                    .collect::<BTreeSet<_>>()
            }),
            None => None,
        };
        let changes = self
            .detect_changes(options, scanner, &state, head.as_deref(), baseline.as_ref())
            .await?;
        log::info!(
            "Scanning {} ({} mode): {} candidates, {} deleted, {} untouched",
            self.root.display(),
            changes.mode,
            changes.candidates.len(),
            changes.deleted.len(),
            changes.untouched.len()
        );

        let known = if options.force_full {
            BTreeMap::new()
        } else {
            state.fingerprints()
        };
        // Batches committed before the scan completes must not leave content behind that a
        // later diff could miss.
        if changes.mode == ChangeDetection::Vcs {
            state.dirty.extend(changes.candidates.iter().cloned());
        } else {
            state.last_commit = None;
            state.dirty.clear();
        }
        let workers = scan_workers(options.workers);
        let (tx, rx) = mpsc::channel(workers * 2);

        let ChangeSet {
            mode,
            candidates,
            deleted,
            untouched,
        } = changes;
        let committer = Committer::new(
            Arc::clone(&self.store),
            state,
            state_path.clone(),
            options.effective_batch_size(),
            ScanReport::new(mode),
        );
        let committing = tokio::spawn(committer.run(rx, deleted, untouched));

        let cancelled = self
            .dispatch(options, candidates, Arc::new(known), workers, tx)
            .await;

        let committer = committing
            .await
            .map_err(|e| IndexerError::Other(format!("commit task failed: {e}")))??;
        let Committer {
            mut state,
            mut report,
            ..
        } = committer;

        report.cancelled = cancelled;
        if report.is_complete() {
            let (last_commit, dirty) = match (head.clone(), baseline) {
                (Some(head), Some(baseline)) => (Some(head), baseline),
                _ => (None, BTreeSet::new()),
            };
            if state.last_commit != last_commit || state.dirty != dirty {
                state.last_commit = last_commit;
                state.dirty = dirty;
                state.save(&state_path).await?;
            }
        }

        report.sort_diagnostics();
        report.commit = head;
        report.lock_wait_ms = lock.waited_ms();
        report.time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        drop(lock);

        log::info!(
            "Scan of {} finished in {}ms: {} scanned, {} analyzed, {} unchanged, {} failed, {} deleted{}",
            self.root.display(),
            report.time_ms,
            report.files_scanned,
            report.files_analyzed,
            report.files_unchanged,
            report.files_failed,
            report.files_deleted,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    /// Diff-based when a reconciled commit exists: paths changed since it plus the recorded
    /// dirty set. Otherwise a full walk.
    async fn detect_changes(
        &self,
        options: &ScanOptions,
        scanner: Arc<FileScanner>,
        state: &ScanState,
        head: Option<&str>,
        baseline: Option<&BTreeSet<String>>,
    ) -> Result<ChangeSet> {
        if !options.force_full {
            if let (Some(head), Some(last)) = (head, state.last_commit.as_deref()) {
                let changed = if last == head {
                    baseline.cloned()
                } else {
                    self.vcs.changed_since(last).await
                };
                if let Some(mut changed) = changed {
                    changed.extend(state.dirty.iter().cloned());
                    return vcs_changes(scanner, self.root.clone(), state, changed).await;
                }
                log::debug!("Version control could not diff against {last}; walking the tree");
            }
        }
        walk_changes(scanner, state, options.force_full).await
    }

    /// Feed candidates to the worker pool; returns whether the scan was cancelled.
    ///
    /// Each language is resolved to a parser once, on its first candidate, and that parser
    /// serves the whole scan. A tier demoted mid-scan fails its remaining files transiently;
    /// the next scan resolves again.
    async fn dispatch(
        &self,
        options: &ScanOptions,
        candidates: Vec<String>,
        known: Arc<BTreeMap<String, String>>,
        workers: usize,
        tx: mpsc::Sender<Outcome>,
    ) -> bool {
        let cancel = &options.cancel;
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = InFlight::default();
        let mut parsers: HashMap<Language, ResolvedParser> = HashMap::new();
        let mut cancelled = false;

        for rel_path in candidates {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if tx.is_closed() {
                // Committer stopped on a persistence failure; its error is reported by `scan`.
                break;
            }

            let language = detect(&rel_path);
            let parser = match parsers.get(&language) {
                Some(parser) => parser.clone(),
                None => {
                    let parser = self.pipeline.registry().resolve(language).await;
                    log::debug!("{language} files in this scan use {parser:?}");
                    parsers.insert(language, parser.clone());
                    parser
                }
            };
            let job = Job {
                known: known.get(&rel_path).cloned(),
                path: self.root.join(&rel_path),
                rel_path: rel_path.clone(),
                pipeline: self.pipeline.clone(),
                parser,
                max_file_size: options.max_file_size,
            };
            let worker_tx = tx.clone();
            tasks.spawn(rel_path, async move {
                let outcome = job.run().await;
                let _ = worker_tx.send(outcome).await;
                drop(permit);
            });

            while let Some(joined) = tasks.set.try_join_next_with_id() {
                tasks.reap(joined, &tx).await;
            }
        }

        if !cancelled {
            loop {
                tokio::select! {
                    biased;
                    joined = tasks.set.join_next_with_id() => match joined {
                        Some(joined) => tasks.reap(joined, &tx).await,
                        None => break,
                    },
                    () = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        if cancelled && !tasks.set.is_empty() {
            log::info!(
                "Scan cancelled; waiting up to {:?} for {} in-flight analyses",
                options.grace_period,
                tasks.set.len()
            );
            let grace = tokio::time::sleep(options.grace_period);
            tokio::pin!(grace);
            loop {
                tokio::select! {
                    joined = tasks.set.join_next_with_id() => match joined {
                        Some(joined) => tasks.reap(joined, &tx).await,
                        None => break,
                    },
                    () = &mut grace => {
                        log::warn!("Aborting {} analyses after cancellation", tasks.set.len());
                        tasks.set.abort_all();
                        break;
                    }
                }
            }
            while let Some(joined) = tasks.set.join_next_with_id().await {
                tasks.reap(joined, &tx).await;
            }
        }

        cancelled
    }

    /// Re-analyze one root-relative file now and commit the result.
    ///
    /// A file that no longer exists is pruned from the store and scan state and reported as
    /// [`IndexerError::FileNotFound`].
    pub async fn analyze_one(&self, rel_path: &str, options: &ScanOptions) -> Result<FileAnalysis> {
        let rel_path = normalize_rel_path(rel_path)
            .ok_or_else(|| IndexerError::InvalidPath(rel_path.to_string()))?;

        let state_dir = self.state_dir(options);
        let lock = acquire_scan_lock(&state_dir).await?;
        let state_dir = tokio::fs::canonicalize(&state_dir).await?;
        if !self.file_scanner(options, &state_dir).accepts(&rel_path) {
            return Err(IndexerError::InvalidPath(format!(
                "{rel_path} is excluded from indexing"
            )));
        }
        let state_path = ScanState::path_for(&state_dir, &self.root);
        let mut state = ScanState::load(&state_path, &self.root).await?;
        let recorded = state.get(&rel_path).is_some();
        if state.last_commit.is_some() {
            state.dirty.insert(rel_path.clone());
        }
        let mut committer = Committer::new(
            Arc::clone(&self.store),
            state,
            state_path,
            1,
            ScanReport::new(ChangeDetection::Fingerprint),
        );

        let bytes = match tokio::fs::read(self.root.join(&rel_path)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if recorded {
                    log::info!("{rel_path} no longer exists; pruning");
                    committer.push(Change::Remove(rel_path.clone())).await?;
                }
                return Err(IndexerError::FileNotFound(rel_path));
            }
            Err(e) => return Err(e.into()),
        };

        let analysis = self.pipeline.analyze_bytes(&rel_path, &bytes).await?;
        committer.push(Change::Upsert(analysis.clone())).await?;
        drop(lock);
        Ok(analysis)
    }
}

/// Worker tasks keyed by task id, so a task that dies without reporting can still be
/// attributed to its file.
#[derive(Default)]
struct InFlight {
    set: JoinSet<()>,
    paths: HashMap<task::Id, String>,
}

impl InFlight {
    fn spawn<F>(&mut self, rel_path: String, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self.set.spawn(work);
        self.paths.insert(handle.id(), rel_path);
    }

    /// A panicked worker never sent its outcome; report the file as a transient failure so the
    /// scan is incomplete and the file is retried. Aborted workers belong to a cancelled scan.
    async fn reap(
        &mut self,
        joined: std::result::Result<(task::Id, ()), JoinError>,
        tx: &mpsc::Sender<Outcome>,
    ) {
        let error = match joined {
            Ok((id, ())) => {
                self.paths.remove(&id);
                return;
            }
            Err(error) => error,
        };
        let rel_path = self.paths.remove(&error.id());
        if !error.is_panic() {
            return;
        }
        log::error!("Analysis task panicked: {error}");
        if let Some(rel_path) = rel_path {
            let outcome = Outcome::Transient {
                rel_path,
                message: "analysis panicked".to_string(),
            };
            if tx.send(outcome).await.is_err() {
                log::debug!("Committer gone; panic outcome dropped");
            }
        }
    }
}

/// What a worker found out about one candidate.
#[derive(Debug)]
enum Outcome {
    Analyzed(FileAnalysis),
    /// Content matches the recorded fingerprint
    Unchanged(String),
    /// Disappeared (or outgrew the size limit) between detection and read
    Gone(String),
    /// Not committed; retried by the next scan
    Transient { rel_path: String, message: String },
}

struct Job {
    rel_path: String,
    path: PathBuf,
    known: Option<String>,
    pipeline: AnalysisPipeline,
    parser: ResolvedParser,
    max_file_size: u64,
}

impl Job {
    async fn run(self) -> Outcome {
        let Job {
            rel_path,
            path,
            known,
            pipeline,
            parser,
            max_file_size,
        } = self;

        match tokio::fs::metadata(&path).await {
            Ok(meta) if !meta.is_file() || meta.len() > max_file_size => {
                return Outcome::Gone(rel_path)
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Outcome::Gone(rel_path),
            Err(e) => {
                return Outcome::Transient {
                    message: format!("stat failed: {e}"),
                    rel_path,
                }
            }
        }
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Outcome::Gone(rel_path),
            Err(e) => {
                return Outcome::Transient {
                    message: format!("read failed: {e}"),
                    rel_path,
                }
            }
        };

        if known.as_deref() == Some(fingerprint(&bytes).as_str()) {
            return Outcome::Unchanged(rel_path);
        }

        match pipeline.analyze_with(&parser, &rel_path, &bytes).await {
            Ok(analysis) => Outcome::Analyzed(analysis),
            Err(e) => {
                log::warn!("Analysis of {rel_path} failed: {e}");
                Outcome::Transient {
                    message: e.to_string(),
                    rel_path,
                }
            }
        }
    }
}

enum Change {
    Upsert(FileAnalysis),
    Remove(String),
}

/// The only writer of the index store and scan state during a scan.
struct Committer {
    store: Arc<dyn IndexStore>,
    state: ScanState,
    state_path: PathBuf,
    batch_size: usize,
    pending: Vec<Change>,
    report: ScanReport,
}

impl Committer {
    fn new(
        store: Arc<dyn IndexStore>,
        state: ScanState,
        state_path: PathBuf,
        batch_size: usize,
        report: ScanReport,
    ) -> Self {
        Self {
            store,
            state,
            state_path,
            batch_size,
            pending: Vec::new(),
            report,
        }
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Outcome>,
        deleted: Vec<String>,
        untouched: Vec<String>,
    ) -> Result<Self> {
        for rel_path in deleted {
            log::debug!("{rel_path} deleted");
            self.report.files_deleted += 1;
            self.push(Change::Remove(rel_path)).await?;
        }
        for rel_path in untouched {
            self.unchanged(&rel_path);
        }

        while let Some(outcome) = rx.recv().await {
            match outcome {
                Outcome::Analyzed(analysis) => {
                    if analysis.is_failed() {
                        log::warn!(
                            "{} has {} parse error(s)",
                            analysis.path,
                            analysis.diagnostics.len()
                        );
                    }
                    self.report.add_analysis(&analysis);
                    self.push(Change::Upsert(analysis)).await?;
                }
                Outcome::Unchanged(rel_path) => self.unchanged(&rel_path),
                Outcome::Gone(rel_path) => {
                    if self.state.get(&rel_path).is_some() {
                        self.report.files_deleted += 1;
                        self.push(Change::Remove(rel_path)).await?;
                    }
                }
                Outcome::Transient { rel_path, message } => {
                    log::warn!("{rel_path}: {message}");
                    self.report.add_transient(rel_path, message);
                }
            }
        }

        self.commit().await?;
        Ok(self)
    }

    fn unchanged(&mut self, rel_path: &str) {
        match self.state.get(rel_path) {
            Some(entry) => self.report.add_unchanged(rel_path, entry),
            None => log::debug!("{rel_path} unchanged but not recorded"),
        }
    }

    async fn push(&mut self, change: Change) -> Result<()> {
        self.pending.push(change);
        if self.pending.len() >= self.batch_size {
            self.commit().await?;
        }
        Ok(())
    }

    /// Store writes, then a store flush, then the scan state rewrite. A failure anywhere leaves
    /// the batch out of the scan state, so its files are picked up again next scan.
    async fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);

        for change in &batch {
            match change {
                Change::Upsert(analysis) if analysis.is_failed() => {
                    self.store.remove(&analysis.path).await?;
                }
                Change::Upsert(analysis) => self.store.upsert(analysis).await?,
                Change::Remove(rel_path) => self.store.remove(rel_path).await?,
            }
        }
        self.store.flush().await?;

        for change in batch {
            match change {
                Change::Upsert(analysis) => self.state.record(&analysis),
                Change::Remove(rel_path) => {
                    self.state.remove(&rel_path);
                }
            }
        }
        self.state.save(&self.state_path).await
    }
}
