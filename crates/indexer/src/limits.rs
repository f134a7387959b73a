/// Environment override for the scan worker count.
pub const SCAN_WORKERS_ENV: &str = "CODEATLAS_SCAN_WORKERS";

pub const MAX_SCAN_WORKERS: usize = 64;

/// CPU-derived default: leave one core for the committer and the rest of the process.
fn default_scan_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_sub(1).clamp(1, MAX_SCAN_WORKERS)
}

fn parse_scan_workers(raw: Option<&str>, default_value: usize) -> usize {
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default_value)
        .clamp(1, MAX_SCAN_WORKERS)
}

/// Worker pool size: explicit request, else `CODEATLAS_SCAN_WORKERS`, else CPU-derived.
/// Always within `1..=64`.
pub fn scan_workers(requested: Option<usize>) -> usize {
    if let Some(requested) = requested {
        return requested.clamp(1, MAX_SCAN_WORKERS);
    }
    let raw = std::env::var(SCAN_WORKERS_ENV).ok();
    parse_scan_workers(raw.as_deref(), default_scan_workers())
}
