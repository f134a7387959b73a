use crate::cancel::ScanCancel;
use crate::scanner::MAX_FILE_SIZE_BYTES;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 256;
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Knobs for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Re-analyze every file, ignoring recorded fingerprints
    pub force_full: bool,

    /// Use version control to narrow the candidate set when possible
    pub use_vcs: bool,

    /// Worker pool size; `None` reads `CODEATLAS_SCAN_WORKERS` or derives from CPUs
    pub workers: Option<usize>,

    /// Changes per atomic commit of store + scan state
    pub batch_size: usize,

    /// How long in-flight analyses may run after cancellation
    pub grace_period: Duration,

    /// Larger files are skipped
    pub max_file_size: u64,

    /// Where scan state and the writer lock live; defaults to `<root>/.codeatlas`
    pub state_dir: Option<PathBuf>,

    pub cancel: ScanCancel,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            force_full: false,
            use_vcs: true,
            workers: None,
            batch_size: DEFAULT_BATCH_SIZE,
            grace_period: DEFAULT_GRACE_PERIOD,
            max_file_size: MAX_FILE_SIZE_BYTES,
            state_dir: None,
            cancel: ScanCancel::new(),
        }
    }
}

impl ScanOptions {
    /// Re-analyze everything.
    pub fn full() -> Self {
        Self {
            force_full: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: ScanCancel) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    #[must_use]
    pub fn without_vcs(mut self) -> Self {
        self.use_vcs = false;
        self
    }

    pub(crate) fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
