use crate::scan_state::StateEntry;
use codeatlas_parser::{Diagnostic, FileAnalysis, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How the scan decided which files to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeDetection {
    /// Every file re-analyzed regardless of recorded fingerprints
    Full,
    /// Whole tree walked, fingerprints compared against scan state
    Fingerprint,
    /// Version-control diff since the last reconciled commit
    Vcs,
}

impl std::fmt::Display for ChangeDetection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChangeDetection::Full => "full",
            ChangeDetection::Fingerprint => "fingerprint",
            ChangeDetection::Vcs => "vcs",
        })
    }
}

/// A diagnostic attributed to the file it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiagnostic {
    pub path: String,
    /// The file was not committed and will be retried by the next scan
    #[serde(default)]
    pub transient: bool,
    #[serde(flatten)]
    pub diagnostic: Diagnostic,
}

/// Statistics and per-file diagnostics of one scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub mode: ChangeDetection,

    /// Files present in the tree that this scan accounted for
    pub files_scanned: usize,

    /// Files parsed during this scan
    pub files_analyzed: usize,

    /// Files skipped because their content matched the scan state
    pub files_unchanged: usize,

    /// Files currently failed: syntax errors (fresh or carried over) and transient failures
    pub files_failed: usize,

    /// Files pruned from scan state and index store
    pub files_deleted: usize,

    pub cancelled: bool,

    pub diagnostics: Vec<FileDiagnostic>,

    /// Analyzed files per language
    pub languages: BTreeMap<String, usize>,

    /// Analyzed files per producing tier (`none` for the no-op parser)
    pub tiers: BTreeMap<String, usize>,

    /// Version-control commit observed at scan start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    pub lock_wait_ms: u64,

    pub time_ms: u64,
}

impl ScanReport {
    pub fn new(mode: ChangeDetection) -> Self {
        Self {
            mode,
            files_scanned: 0,
            files_analyzed: 0,
            files_unchanged: 0,
            files_failed: 0,
            files_deleted: 0,
            cancelled: false,
            diagnostics: Vec::new(),
            languages: BTreeMap::new(),
            tiers: BTreeMap::new(),
            commit: None,
            lock_wait_ms: 0,
            time_ms: 0,
        }
    }

    pub(crate) fn add_analysis(&mut self, analysis: &FileAnalysis) {
        self.files_scanned += 1;
        self.files_analyzed += 1;
        *self
            .languages
            .entry(analysis.language.as_str().to_string())
            .or_insert(0) += 1;
        let tier = analysis.tier.map_or("none", |t| t.as_str());
        *self.tiers.entry(tier.to_string()).or_insert(0) += 1;
        if analysis.is_failed() {
            self.files_failed += 1;
        }
        self.extend_diagnostics(&analysis.path, &analysis.diagnostics);
    }

    pub(crate) fn add_unchanged(&mut self, path: &str, entry: &StateEntry) {
        self.files_scanned += 1;
        self.files_unchanged += 1;
        if entry.is_failed() {
            self.files_failed += 1;
            self.extend_diagnostics(path, &entry.diagnostics);
        }
    }

    pub(crate) fn add_transient(&mut self, path: String, message: String) {
        self.files_scanned += 1;
        self.files_failed += 1;
        self.diagnostics.push(FileDiagnostic {
            path,
            transient: true,
            diagnostic: Diagnostic::error(message, None, None),
        });
    }

    fn extend_diagnostics(&mut self, path: &str, diagnostics: &[Diagnostic]) {
        self.diagnostics
            .extend(diagnostics.iter().map(|diagnostic| FileDiagnostic {
                path: path.to_string(),
                transient: false,
                diagnostic: diagnostic.clone(),
            }));
    }

    /// Stable order: by path, then by position.
    pub(crate) fn sort_diagnostics(&mut self) {
        self.diagnostics.sort_by(|a, b| {
            a.path.cmp(&b.path).then_with(|| {
                a.diagnostic
                    .span
                    .map(|s| s.start_line)
                    .cmp(&b.diagnostic.span.map(|s| s.start_line))
            })
        });
    }

    /// Paths with at least one error diagnostic.
    pub fn failed_paths(&self) -> BTreeSet<&str> {
        self.diagnostics
            .iter()
            .filter(|d| d.diagnostic.severity == Severity::Error)
            .map(|d| d.path.as_str())
            .collect()
    }

    pub fn transient_failures(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.transient).count()
    }

    /// Whether everything the scan set out to do was committed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.transient_failures() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan_state::EntryStatus;
    use codeatlas_parser::{Language, Span, Tier};
    use pretty_assertions::assert_eq;

    #[test]
    fn counts_fresh_carried_and_transient_failures() {
        let mut report = ScanReport::new(ChangeDetection::Fingerprint);

        let ok = FileAnalysis::for_tier("a.go", Language::Go, Tier::Ast);
        let mut broken = FileAnalysis::for_tier("b.go", Language::Go, Tier::Ast);
        broken.diagnostics.push(Diagnostic::error(
            "Missing `}`",
            Some(Span::line(3, 1)),
            Some(Tier::Ast),
        ));
        report.add_analysis(&ok);
        report.add_analysis(&broken);

        let carried = StateEntry {
            fingerprint: "f".into(),
            language: Language::Python,
            tier: Some(Tier::Regex),
            status: EntryStatus::Failed,
            diagnostics: vec![Diagnostic::error("bad", None, Some(Tier::Regex))],
        };
        report.add_unchanged("c.py", &carried);
        report.add_transient("d.go".into(), "read failed".into());
        report.sort_diagnostics();

        assert_eq!(report.files_scanned, 4);
        assert_eq!(report.files_analyzed, 2);
        assert_eq!(report.files_unchanged, 1);
        assert_eq!(report.files_failed, 3);
        assert_eq!(report.languages.get("go"), Some(&2));
        assert_eq!(report.tiers.get("ast"), Some(&2));
        assert_eq!(
            report.failed_paths().into_iter().collect::<Vec<_>>(),
            vec!["b.go", "c.py", "d.go"]
        );
        assert_eq!(report.transient_failures(), 1);
        assert!(!report.is_complete());
    }

    #[test]
    fn diagnostics_serialize_flat() {
        let diagnostic = FileDiagnostic {
            path: "b.go".into(),
            transient: false,
            diagnostic: Diagnostic::error("Missing `}`", None, Some(Tier::Ast)),
        };
        let value = serde_json::to_value(&diagnostic).unwrap();
        assert_eq!(value["path"], "b.go");
        assert_eq!(value["severity"], "error");
        assert_eq!(value["tier"], "ast");
    }
}
