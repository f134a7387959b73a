use crate::{IndexerError, Result};
use fs2::FileExt;
use std::path::{Path, PathBuf};
use std::time::Instant;

const LOCK_FILE_NAME: &str = "scan.lock";

/// Cross-process exclusive writer lock for one state directory. Released on drop.
pub(crate) struct ScanLock {
    file: std::fs::File,
    waited_ms: u64,
}

impl ScanLock {
    /// How long acquisition blocked behind another writer.
    pub(crate) fn waited_ms(&self) -> u64 {
        self.waited_ms
    }
}

impl Drop for ScanLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LOCK_FILE_NAME)
}

pub(crate) async fn acquire_scan_lock(state_dir: &Path) -> Result<ScanLock> {
    tokio::fs::create_dir_all(state_dir).await.map_err(|err| {
        IndexerError::Persistence(format!("create state dir {}: {err}", state_dir.display()))
    })?;
    let path = lock_path(state_dir);

    tokio::task::spawn_blocking(move || -> Result<ScanLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                IndexerError::Persistence(format!("open scan lock {}: {err}", path.display()))
            })?;

        let start = Instant::now();
        file.lock_exclusive().map_err(|err| {
            IndexerError::Persistence(format!("acquire scan lock {}: {err}", path.display()))
        })?;
        let waited_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        if waited_ms > 0 {
            log::debug!("Waited {waited_ms}ms for scan lock {}", path.display());
        }

        Ok(ScanLock { file, waited_ms })
    })
    .await
    .map_err(|err| IndexerError::Other(format!("join scan lock task: {err}")))?
}
