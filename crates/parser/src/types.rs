use crate::language::Language;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Parsing strategy, ordered from least to most accurate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Regex,
    Ast,
    Semantic,
}

impl Tier {
    /// Resolution order: most accurate first.
    pub const PREFERENCE: [Tier; 3] = [Tier::Semantic, Tier::Ast, Tier::Regex];

    #[must_use]
    pub const fn confidence(self) -> Confidence {
        match self {
            Tier::Semantic => Confidence::Exact,
            Tier::Ast => Confidence::Structural,
            Tier::Regex => Confidence::Heuristic,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Regex => "regex",
            Tier::Ast => "ast",
            Tier::Semantic => "semantic",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much a consumer can trust the symbols of an analysis.
///
/// Regex results may miss nested or multi-line constructs; index consumers can filter on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// No parser was available; the analysis carries no symbols.
    None,
    /// Line-oriented pattern matching.
    Heuristic,
    /// Syntax tree from a compiled grammar.
    Structural,
    /// Resolved by a language server.
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Interface,
    Trait,
    TypeAlias,
    Module,
    Constant,
    Variable,
    Field,
    Macro,
    Other,
}

impl SymbolKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Enum => "enum",
            SymbolKind::Interface => "interface",
            SymbolKind::Trait => "trait",
            SymbolKind::TypeAlias => "type_alias",
            SymbolKind::Module => "module",
            SymbolKind::Constant => "constant",
            SymbolKind::Variable => "variable",
            SymbolKind::Field => "field",
            SymbolKind::Macro => "macro",
            SymbolKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Crate,
    Protected,
    Internal,
    Private,
}

/// Source range. Lines and columns are 1-based; `end` is inclusive of the last line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl Span {
    #[must_use]
    pub const fn new(start_line: usize, start_column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// Span covering a single line from column 1.
    #[must_use]
    pub const fn line(line: usize, width: usize) -> Self {
        Self::new(line, 1, line, width + 1)
    }

    #[must_use]
    pub const fn contains_line(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

/// A named construct extracted from one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Owning file (root-relative, `/` separated)
    pub file: String,
    pub span: Span,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    /// Enclosing type/module name for members
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Full name, e.g. `Config::load` or `Client.send`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualified_name: Option<String>,
    /// Signature or resolved type, when the backend knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Symbol {
    pub fn new(name: impl Into<String>, kind: SymbolKind, file: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            kind,
            file: file.into(),
            span,
            visibility: None,
            parent: None,
            qualified_name: None,
            signature: None,
        }
    }

    #[must_use]
    pub fn with_visibility(mut self, visibility: Option<Visibility>) -> Self {
        self.visibility = visibility;
        self
    }

    /// Set the enclosing scope and derive the qualified name with `separator`.
    #[must_use]
    pub fn with_parent(mut self, parent: Option<&str>, separator: &str) -> Self {
        if let Some(parent) = parent.filter(|p| !p.is_empty()) {
            self.qualified_name = Some(format!("{parent}{separator}{}", self.name));
            self.parent = Some(parent.to_string());
        }
        self
    }

    #[must_use]
    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature.filter(|s| !s.trim().is_empty());
        self
    }
}

/// A reference from one file to another module or path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub line: usize,
}

impl Import {
    pub fn new(target: impl Into<String>, line: usize) -> Self {
        Self {
            target: target.into(),
            alias: None,
            line,
        }
    }

    #[must_use]
    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias.filter(|a| !a.is_empty());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Non-fatal problem attached to a [`FileAnalysis`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    /// Tier that raised it; `None` for pipeline-level problems (I/O, encoding)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Option<Span>, tier: Option<Tier>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            span,
            tier,
        }
    }

    pub fn warning(message: impl Into<String>, span: Option<Span>, tier: Option<Tier>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            span,
            tier,
        }
    }
}

/// Result of analyzing one file at one instant.
///
/// Replaced wholesale on re-scan; never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub path: String,
    pub language: Language,
    /// Tier that produced the analysis; `None` when no parser served the language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    pub confidence: Confidence,
    pub symbols: Vec<Symbol>,
    pub imports: Vec<Import>,
    pub diagnostics: Vec<Diagnostic>,
    pub fingerprint: String,
}

impl FileAnalysis {
    /// Empty analysis carrying only identity; what the no-op parser returns.
    pub fn empty(path: impl Into<String>, language: Language) -> Self {
        Self {
            path: path.into(),
            language,
            tier: None,
            confidence: Confidence::None,
            symbols: Vec::new(),
            imports: Vec::new(),
            diagnostics: Vec::new(),
            fingerprint: String::new(),
        }
    }

    /// Empty analysis attributed to `tier`; backends start from this.
    pub fn for_tier(path: impl Into<String>, language: Language, tier: Tier) -> Self {
        Self {
            tier: Some(tier),
            confidence: tier.confidence(),
            ..Self::empty(path, language)
        }
    }

    /// A file is failed when any diagnostic is an error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Sort symbols/imports/diagnostics into source order and drop exact duplicates.
    pub fn normalize(&mut self) {
        for symbol in &mut self.symbols {
            if symbol.file != self.path {
                symbol.file.clone_from(&self.path);
            }
        }
        self.symbols.sort_by(|a, b| {
            a.span
                .cmp(&b.span)
                .then_with(|| a.name.cmp(&b.name))
        });
        self.symbols
            .dedup_by(|a, b| a.span == b.span && a.name == b.name && a.kind == b.kind);

        self.imports
            .sort_by(|a, b| a.line.cmp(&b.line).then_with(|| a.target.cmp(&b.target)));
        self.imports
            .dedup_by(|a, b| a.line == b.line && a.target == b.target);

        self.diagnostics.sort_by(|a, b| {
            a.span
                .map(|s| s.start_line)
                .cmp(&b.span.map(|s| s.start_line))
                .then_with(|| a.severity.cmp(&b.severity))
        });
    }
}

/// Lowercase hex SHA-256 of the raw bytes.
#[must_use]
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
