//! Line-oriented declaration/import extraction.
//!
//! Patterns are compiled once per process. Multi-line signatures and nested constructs deeper
//! than one member level are missed; results carry `Confidence::Heuristic`.

use super::ParserBackend;
use crate::error::Result;
use crate::language::Language;
use crate::types::{FileAnalysis, Import, Span, Symbol, SymbolKind, Tier, Visibility};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

static RULES: Lazy<HashMap<Language, LanguageRules>> = Lazy::new(|| {
    Language::ALL
        .iter()
        .filter(|language| **language != Language::Unknown)
        .map(|language| (*language, LanguageRules::build(*language)))
        .collect()
});

/// Words that can never be declaration names, even when a pattern matches them.
const KEYWORDS: &[&str] = &[
    "if", "else", "elif", "for", "foreach", "while", "do", "switch", "case", "match", "catch",
    "try", "return", "throw", "new", "delete", "sizeof", "typeof", "await", "yield", "with",
    "unless", "until", "loop", "function", "super", "using", "lock", "fixed",
];

const SCOPE: u8 = 0b001;
const MEMBER: u8 = 0b010;
const HIDDEN: u8 = 0b100;

/// Uncompiled symbol rule.
#[derive(Clone, Copy)]
struct SymbolPattern {
    pattern: &'static str,
    kind: SymbolKind,
    flags: u8,
}

const fn sym(pattern: &'static str, kind: SymbolKind) -> SymbolPattern {
    SymbolPattern {
        pattern,
        kind,
        flags: 0,
    }
}

impl SymbolPattern {
    /// Matching line opens a member scope.
    const fn scope(mut self) -> Self {
        self.flags |= SCOPE;
        self
    }

    /// Only tried on the first indentation level inside a scope.
    const fn member(mut self) -> Self {
        self.flags |= MEMBER;
        self
    }

    /// Opens a scope without emitting a symbol (`impl`, `extension`).
    const fn hidden(mut self) -> Self {
        self.flags |= HIDDEN | SCOPE;
        self
    }
}

struct SymbolRule {
    regex: Regex,
    kind: SymbolKind,
    flags: u8,
}

impl SymbolRule {
    fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Multi-line import group such as Go's `import ( ... )`.
struct ImportBlock {
    start: Regex,
    item: Regex,
}

struct LanguageRules {
    symbols: Vec<SymbolRule>,
    imports: Vec<Regex>,
    import_block: Option<ImportBlock>,
    separator: &'static str,
    comments: &'static [&'static str],
}

fn compile(language: Language, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            log::warn!("Skipping invalid {language} pattern {pattern:?}: {e}");
            None
        }
    }
}

impl LanguageRules {
    fn build(language: Language) -> Self {
        let symbols = symbol_patterns(language)
            .into_iter()
            .filter_map(|p| {
                compile(language, p.pattern).map(|regex| SymbolRule {
                    regex,
                    kind: p.kind,
                    flags: p.flags,
                })
            })
            .collect();
        let imports = import_patterns(language)
            .iter()
            .filter_map(|p| compile(language, p))
            .collect();
        let import_block = match import_block_patterns(language) {
            Some((start, item)) => compile(language, start)
                .zip(compile(language, item))
                .map(|(start, item)| ImportBlock { start, item }),
            None => None,
        };

        Self {
            symbols,
            imports,
            import_block,
            separator: if language == Language::Rust { "::" } else { "." },
            comments: comment_prefixes(language),
        }
    }

    fn is_comment(&self, trimmed: &str) -> bool {
        self.comments.iter().any(|prefix| trimmed.starts_with(prefix))
    }
}

fn comment_prefixes(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python
        | Language::Ruby
        | Language::Shell
        | Language::Dockerfile
        | Language::Makefile => &["#"],
        Language::C | Language::Cpp => &["//", "/*", "* ", "*/"],
        _ => &["//", "/*", "* ", "*/", "*\t"],
    }
}

fn symbol_patterns(language: Language) -> Vec<SymbolPattern> {
    use SymbolKind as K;
    match language {
        Language::Rust => vec![
            sym(r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:default\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+"[^"]*"\s+)?fn\s+(?P<name>[A-Za-z_]\w*)"#, K::Function),
            sym(r"^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+(?P<name>[A-Za-z_]\w*)", K::Struct),
            sym(r"^\s*(?:pub(?:\([^)]*\))?\s+)?union\s+(?P<name>[A-Za-z_]\w*)", K::Struct),
            sym(r"^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+(?P<name>[A-Za-z_]\w*)", K::Enum),
            sym(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:unsafe\s+)?trait\s+(?P<name>[A-Za-z_]\w*)", K::Trait).scope(),
            sym(r"^\s*(?:unsafe\s+)?impl(?:<[^>]*>)?\s+(?:[\w:]+(?:<[^>]*>)?\s+for\s+)?(?:\w+::)*(?P<name>[A-Za-z_]\w*)", K::Struct).hidden(),
            sym(r"^\s*(?:pub(?:\([^)]*\))?\s+)?type\s+(?P<name>[A-Za-z_]\w*)", K::TypeAlias),
            sym(r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(?P<name>[A-Za-z_]\w*)\s*\{", K::Module).scope(),
            sym(r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(?P<name>[A-Za-z_]\w*)\s*;", K::Module),
            sym(r"^\s*(?:pub(?:\([^)]*\))?\s+)?const\s+(?P<name>[A-Za-z_]\w*)\s*:", K::Constant),
            sym(r"^\s*(?:pub(?:\([^)]*\))?\s+)?static\s+(?:mut\s+)?(?P<name>[A-Za-z_]\w*)\s*:", K::Variable),
            sym(r"^\s*macro_rules!\s*(?P<name>[A-Za-z_]\w*)", K::Macro),
        ],
        Language::Python => vec![
            sym(r"^\s*(?:async\s+)?def\s+(?P<name>[A-Za-z_]\w*)\s*\(", K::Function),
            sym(r"^\s*class\s+(?P<name>[A-Za-z_]\w*)", K::Class).scope(),
            sym(r"^(?P<name>[A-Z][A-Z0-9_]*)\s*(?::[^=]+)?=[^=]", K::Constant),
        ],
        Language::JavaScript | Language::TypeScript => vec![
            sym(r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>[A-Za-z_$][\w$]*)", K::Function),
            sym(r"^\s*(?:export\s+)?(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?class\s+(?P<name>[A-Za-z_$][\w$]*)", K::Class).scope(),
            sym(r"^\s*(?:export\s+)?(?:declare\s+)?interface\s+(?P<name>[A-Za-z_$][\w$]*)", K::Interface),
            sym(r"^\s*(?:export\s+)?(?:declare\s+)?type\s+(?P<name>[A-Za-z_$][\w$]*)\s*(?:<[^>]*>)?\s*=", K::TypeAlias),
            sym(r"^\s*(?:export\s+)?(?:declare\s+)?(?:const\s+)?enum\s+(?P<name>[A-Za-z_$][\w$]*)", K::Enum),
            sym(r"^\s*(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*(?::[^=]+)?=>|[A-Za-z_$][\w$]*\s*=>)", K::Function),
            sym(r"^\s+(?:(?:public|private|protected|static|readonly|async|abstract|override|get|set)\s+)*\*?(?P<name>#?[A-Za-z_$][\w$]*)\s*(?:<[^>]*>)?\s*\(", K::Method).member(),
        ],
        Language::Go => vec![
            sym(r"^func\s+\(\s*(?:\w+\s+)?(?P<recv>[^)]+?)\s*\)\s*(?P<name>[A-Za-z_]\w*)", K::Method),
            sym(r"^func\s+(?P<name>[A-Za-z_]\w*)", K::Function),
            sym(r"^type\s+(?P<name>[A-Za-z_]\w*)(?:\[[^\]]*\])?\s+struct\b", K::Struct),
            sym(r"^type\s+(?P<name>[A-Za-z_]\w*)(?:\[[^\]]*\])?\s+interface\b", K::Interface),
            sym(r"^type\s+(?P<name>[A-Za-z_]\w*)(?:\[[^\]]*\])?\s+=?\s*\S", K::TypeAlias),
            sym(r"^const\s+(?P<name>[A-Za-z_]\w*)", K::Constant),
            sym(r"^var\s+(?P<name>[A-Za-z_]\w*)", K::Variable),
        ],
        Language::Java => vec![
            sym(r"^\s*(?:(?:public|private|protected|static|final|abstract|sealed|non-sealed|strictfp)\s+)*class\s+(?P<name>[A-Za-z_]\w*)", K::Class).scope(),
            sym(r"^\s*(?:(?:public|private|protected|static|sealed|non-sealed|strictfp)\s+)*@?interface\s+(?P<name>[A-Za-z_]\w*)", K::Interface).scope(),
            sym(r"^\s*(?:(?:public|private|protected|static|final)\s+)*enum\s+(?P<name>[A-Za-z_]\w*)", K::Enum).scope(),
            sym(r"^\s*(?:(?:public|private|protected|static|final)\s+)*record\s+(?P<name>[A-Za-z_]\w*)", K::Class).scope(),
            sym(r"^\s+(?:(?:public|private|protected|static|final|abstract|synchronized|native|default)\s+)*(?:<[^>]+>\s+)?[\w<>\[\],.?]+(?:\s*<[^>]*>)?(?:\[\])*\s+(?P<name>[A-Za-z_]\w*)\s*\(", K::Method).member(),
        ],
        Language::Kotlin => vec![
            sym(r"^\s*(?:(?:public|private|protected|internal|open|abstract|sealed|data|enum|annotation|inner|value)\s+)*class\s+(?P<name>[A-Za-z_]\w*)", K::Class).scope(),
            sym(r"^\s*(?:(?:public|private|protected|internal|sealed|fun)\s+)*interface\s+(?P<name>[A-Za-z_]\w*)", K::Interface).scope(),
            sym(r"^\s*(?:(?:public|private|protected|internal|data|companion)\s+)*object\s+(?P<name>[A-Za-z_]\w*)", K::Class).scope(),
            sym(r"^\s*(?:(?:public|private|protected|internal|open|override|abstract|suspend|inline|operator|infix|tailrec|external)\s+)*fun\s+(?:<[^>]+>\s*)?(?:[\w.]+\.)?(?P<name>[A-Za-z_]\w*)\s*\(", K::Function),
            sym(r"^\s*(?:(?:public|private|protected|internal)\s+)*typealias\s+(?P<name>[A-Za-z_]\w*)", K::TypeAlias),
            sym(r"^(?:(?:public|private|internal)\s+)*const\s+val\s+(?P<name>[A-Za-z_]\w*)", K::Constant),
        ],
        Language::CSharp => vec![
            sym(r"^\s*namespace\s+(?P<name>[\w.]+)", K::Module),
            sym(r"^\s*(?:(?:public|private|protected|internal|static|sealed|abstract|partial|unsafe|file)\s+)*class\s+(?P<name>[A-Za-z_]\w*)", K::Class).scope(),
            sym(r"^\s*(?:(?:public|private|protected|internal|static|sealed|abstract|partial|file)\s+)*record\s+(?:class\s+|struct\s+)?(?P<name>[A-Za-z_]\w*)", K::Class).scope(),
            sym(r"^\s*(?:(?:public|private|protected|internal|readonly|ref|partial|unsafe)\s+)*struct\s+(?P<name>[A-Za-z_]\w*)", K::Struct).scope(),
            sym(r"^\s*(?:(?:public|private|protected|internal|partial)\s+)*interface\s+(?P<name>[A-Za-z_]\w*)", K::Interface).scope(),
            sym(r"^\s*(?:(?:public|private|protected|internal)\s+)*enum\s+(?P<name>[A-Za-z_]\w*)", K::Enum),
            sym(r"^\s+(?:(?:public|private|protected|internal|static|virtual|override|abstract|async|sealed|extern|unsafe|new|partial|readonly)\s+)*[\w<>\[\],.?]+(?:\s*<[^>]*>)?\s+(?P<name>[A-Za-z_]\w*)\s*(?:<[^>]*>)?\s*\(", K::Method).member(),
        ],
        Language::C | Language::Cpp => vec![
            sym(r"^\s*#\s*define\s+(?P<name>[A-Za-z_]\w*)", K::Macro),
            sym(r"^\s*namespace\s+(?P<name>[A-Za-z_][\w:]*)", K::Module),
            sym(r"^\s*(?:template\s*<[^>]*>\s*)?class\s+(?P<name>[A-Za-z_]\w*)[^;]*$", K::Class).scope(),
            sym(r"^\s*(?:typedef\s+)?struct\s+(?P<name>[A-Za-z_]\w*)\s*(?::[^{;]*)?\{", K::Struct).scope(),
            sym(r"^\s*(?:typedef\s+)?union\s+(?P<name>[A-Za-z_]\w*)\s*\{", K::Struct),
            sym(r"^\s*(?:typedef\s+)?enum\s+(?:class\s+|struct\s+)?(?P<name>[A-Za-z_]\w*)\s*(?::[^{;]*)?\{", K::Enum),
            sym(r"^(?:(?:static|inline|extern|const|unsigned|signed|virtual|constexpr|struct)\s+)*[A-Za-z_][\w:<>,]*(?:\s*[\*&]+\s*|\s+)(?:\w+::)*(?P<name>~?[A-Za-z_]\w*)\s*\([^;]*$", K::Function),
            sym(r"^\s+(?:(?:virtual|static|inline|explicit|constexpr)\s+)*(?:[\w:<>,]+(?:\s*[\*&]+\s*|\s+))?(?P<name>~?[A-Za-z_]\w*)\s*\([^;]*\)\s*(?:const\s*)?(?:override\s*)?(?:=\s*0\s*)?[;{]?\s*$", K::Method).member(),
        ],
        Language::Ruby => vec![
            sym(r"^\s*class\s+(?P<name>[A-Z][\w:]*)", K::Class).scope(),
            sym(r"^\s*module\s+(?P<name>[A-Z][\w:]*)", K::Module).scope(),
            sym(r"^\s*def\s+(?:self\.)?(?P<name>[A-Za-z_]\w*[?!=]?)", K::Function),
            sym(r"^\s*(?P<name>[A-Z][A-Z0-9_]*)\s*=[^=]", K::Constant),
        ],
        Language::Swift => vec![
            sym(r"^\s*(?:(?:public|private|fileprivate|internal|open|final)\s+)*(?:class|actor)\s+(?P<name>[A-Za-z_]\w*)", K::Class).scope(),
            sym(r"^\s*(?:(?:public|private|fileprivate|internal)\s+)*struct\s+(?P<name>[A-Za-z_]\w*)", K::Struct).scope(),
            sym(r"^\s*(?:(?:public|private|fileprivate|internal|indirect)\s+)*enum\s+(?P<name>[A-Za-z_]\w*)", K::Enum).scope(),
            sym(r"^\s*(?:(?:public|private|fileprivate|internal)\s+)*protocol\s+(?P<name>[A-Za-z_]\w*)", K::Interface).scope(),
            sym(r"^\s*(?:(?:public|private|fileprivate|internal)\s+)*extension\s+(?P<name>[A-Za-z_]\w*)", K::Class).hidden(),
            sym(r"^\s*(?:(?:public|private|fileprivate|internal|open|static|class|override|final|mutating|nonmutating|@\w+)\s+)*func\s+(?P<name>[A-Za-z_]\w*)", K::Function),
            sym(r"^\s*(?:(?:public|private|fileprivate|internal)\s+)*typealias\s+(?P<name>[A-Za-z_]\w*)", K::TypeAlias),
        ],
        Language::Shell => vec![
            sym(r"^\s*function\s+(?P<name>[A-Za-z_][\w.-]*)", K::Function),
            sym(r"^\s*(?P<name>[A-Za-z_][\w.-]*)\s*\(\s*\)", K::Function),
            sym(r"^(?:export\s+|readonly\s+|declare\s+(?:-\w+\s+)?)?(?P<name>[A-Z_][A-Z0-9_]*)=", K::Variable),
        ],
        Language::Dockerfile => vec![
            sym(r"(?i)^FROM\s+(?:--\S+\s+)*\S+\s+AS\s+(?P<name>\S+)", K::Module),
            sym(r"(?i)^(?:ARG|ENV)\s+(?P<name>[A-Za-z_]\w*)", K::Variable),
        ],
        Language::Makefile => vec![
            sym(r"^(?:export\s+|override\s+)?(?P<name>[A-Za-z_][\w.]*)\s*(?::=|::=|\?=|\+=|!=|=)", K::Variable),
            sym(r"^(?P<name>[A-Za-z0-9_][\w.\-/%]*)\s*:(?:[^=]|$)", K::Function),
            sym(r"^define\s+(?P<name>[A-Za-z_][\w.-]*)", K::Macro),
        ],
        Language::Unknown => Vec::new(),
    }
}

/// Import patterns capture `target` and optionally `alias`; the first match per line wins.
fn import_patterns(language: Language) -> &'static [&'static str] {
    match language {
        Language::Rust => &[
            r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+(?P<target>[\w:]+?)(?:::\{|::\*|\s+as\s+(?P<alias>\w+)|\s*;|\s*$)",
            r"^\s*extern\s+crate\s+(?P<target>\w+)(?:\s+as\s+(?P<alias>\w+))?",
        ],
        Language::Python => &[
            r"^\s*from\s+(?P<target>\.*[\w.]*)\s+import\b",
            r"^\s*import\s+(?P<target>[\w.]+)(?:\s+as\s+(?P<alias>\w+))?",
        ],
        Language::JavaScript | Language::TypeScript => &[
            r#"^\s*import\s+(?:type\s+)?\*\s+as\s+(?P<alias>[A-Za-z_$][\w$]*)\s+from\s+['"](?P<target>[^'"]+)['"]"#,
            r#"^\s*import\s+(?:type\s+)?(?P<alias>[A-Za-z_$][\w$]*)\s+from\s+['"](?P<target>[^'"]+)['"]"#,
            r#"^\s*import\s+.*?\bfrom\s+['"](?P<target>[^'"]+)['"]"#,
            r#"^\s*import\s+['"](?P<target>[^'"]+)['"]"#,
            r#"^\s*\}\s*from\s+['"](?P<target>[^'"]+)['"]"#,
            r#"^\s*export\s+.*?\bfrom\s+['"](?P<target>[^'"]+)['"]"#,
            r#"^\s*(?:const|let|var)\s+(?P<alias>[A-Za-z_$][\w$]*)\s*=\s*require\(\s*['"](?P<target>[^'"]+)['"]\s*\)"#,
            r#"\brequire\(\s*['"](?P<target>[^'"]+)['"]\s*\)"#,
        ],
        Language::Go => &[r#"^import\s+(?:(?P<alias>[\w.]+)\s+)?"(?P<target>[^"]+)""#],
        Language::Java => &[r"^\s*import\s+(?:static\s+)?(?P<target>[\w.]+(?:\.\*)?)\s*;"],
        Language::Kotlin => &[r"^\s*import\s+(?P<target>[\w.]+(?:\.\*)?)(?:\s+as\s+(?P<alias>\w+))?"],
        Language::CSharp => &[
            r"^\s*(?:global\s+)?using\s+(?:static\s+)?(?:(?P<alias>\w+)\s*=\s*)?(?P<target>[\w.]+)\s*;",
        ],
        Language::C | Language::Cpp => &[r#"^\s*#\s*include\s*[<"](?P<target>[^>"]+)[>"]"#],
        Language::Ruby => &[r#"^\s*(?:require|require_relative|load)\s*\(?\s*['"](?P<target>[^'"]+)['"]"#],
        Language::Swift => &[
            r"^\s*(?:@\w+\s+)?import\s+(?:(?:class|struct|enum|protocol|func|var|let|typealias)\s+)?(?P<target>[\w.]+)",
        ],
        Language::Shell => &[r"^\s*(?:source|\.)\s+(?P<target>[^\s;]+)"],
        Language::Dockerfile => &[
            r"(?i)^FROM\s+(?:--\S+\s+)*(?P<target>\S+)(?:\s+AS\s+(?P<alias>\S+))?",
            r"(?i)^COPY\s+--from=(?P<target>\S+)",
        ],
        Language::Makefile => &[r"^-?s?include\s+(?P<target>.+?)\s*$"],
        Language::Unknown => &[],
    }
}

fn import_block_patterns(language: Language) -> Option<(&'static str, &'static str)> {
    match language {
        Language::Go => Some((
            r"^import\s*\(\s*$",
            r#"^\s*(?:(?P<alias>[\w.]+)\s+)?"(?P<target>[^"]+)""#,
        )),
        _ => None,
    }
}

fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

fn first_word(trimmed: &str) -> &str {
    trimmed
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or("")
}

/// Open member scope (class body, impl block, ...).
struct Scope {
    name: String,
    kind: SymbolKind,
    indent: usize,
    body_indent: Option<usize>,
}

const fn is_type_scope(kind: SymbolKind) -> bool {
    matches!(
        kind,
        SymbolKind::Class
            | SymbolKind::Struct
            | SymbolKind::Trait
            | SymbolKind::Interface
            | SymbolKind::Enum
    )
}

/// Strip pointer/generic decoration from a Go receiver type: `*Server[T]` → `Server`.
fn receiver_type(recv: &str) -> String {
    let recv = recv.trim().trim_start_matches('*');
    let end = recv.find('[').unwrap_or(recv.len());
    recv[..end].trim().to_string()
}

fn visibility(language: Language, line: &str, name: &str, member: bool) -> Option<Visibility> {
    let trimmed = line.trim_start();
    let has = |word: &str| {
        trimmed
            .split_whitespace()
            .take_while(|w| *w != name)
            .any(|w| w == word)
    };
    match language {
        Language::Rust => {
            if trimmed.starts_with("pub(") {
                Some(Visibility::Crate)
            } else if trimmed.starts_with("pub ") {
                Some(Visibility::Public)
            } else {
                Some(Visibility::Private)
            }
        }
        Language::Python => {
            let dunder = name.starts_with("__") && name.ends_with("__");
            if name.starts_with('_') && !dunder {
                Some(Visibility::Private)
            } else {
                Some(Visibility::Public)
            }
        }
        Language::Go => name.chars().next().map(|c| {
            if c.is_uppercase() {
                Visibility::Public
            } else {
                Visibility::Private
            }
        }),
        Language::JavaScript | Language::TypeScript => {
            if has("private") || name.starts_with('#') {
                Some(Visibility::Private)
            } else if has("protected") {
                Some(Visibility::Protected)
            } else if member || trimmed.starts_with("export") {
                Some(Visibility::Public)
            } else {
                Some(Visibility::Private)
            }
        }
        Language::Java | Language::Kotlin | Language::CSharp | Language::Swift => {
            if has("public") || has("open") {
                Some(Visibility::Public)
            } else if has("private") || has("fileprivate") {
                Some(Visibility::Private)
            } else if has("protected") {
                Some(Visibility::Protected)
            } else if has("internal") {
                Some(Visibility::Internal)
            } else {
                Some(match language {
                    Language::Kotlin => Visibility::Public,
                    Language::CSharp if member => Visibility::Private,
                    _ => Visibility::Internal,
                })
            }
        }
        Language::C | Language::Cpp if !member => {
            if has("static") {
                Some(Visibility::Private)
            } else {
                Some(Visibility::Public)
            }
        }
        _ => None,
    }
}

/// 1-based column of the byte offset `start` within `line`.
fn column(line: &str, start: usize) -> usize {
    line[..start].chars().count() + 1
}

fn capture_import(caps: &Captures<'_>, line_no: usize) -> Option<Import> {
    let target = caps.name("target")?.as_str().trim();
    if target.is_empty() {
        return None;
    }
    let alias = caps.name("alias").map(|m| m.as_str().to_string());
    Some(Import::new(target, line_no).with_alias(alias))
}

/// Single pass over `content`; symbols are skipped when `with_symbols` is false.
fn scan(
    language: Language,
    content: &str,
    path: &str,
    with_symbols: bool,
) -> (Vec<Symbol>, Vec<Import>) {
    let mut symbols = Vec::new();
    let mut imports = Vec::new();
    let Some(rules) = RULES.get(&language) else {
        return (symbols, imports);
    };

    let mut scopes: Vec<Scope> = Vec::new();
    let mut in_import_block = false;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end();
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            continue;
        }

        if in_import_block {
            if trimmed.starts_with(')') {
                in_import_block = false;
            } else if let Some(block) = &rules.import_block {
                if let Some(import) = block
                    .item
                    .captures(line)
                    .and_then(|caps| capture_import(&caps, line_no))
                {
                    imports.push(import);
                }
            }
            continue;
        }

        if rules.is_comment(trimmed) {
            continue;
        }

        let indent = line.len() - trimmed.len();
        while scopes.last().is_some_and(|s| indent <= s.indent) {
            scopes.pop();
        }
        if let Some(top) = scopes.last_mut() {
            top.body_indent.get_or_insert(indent);
        }

        if rules
            .import_block
            .as_ref()
            .is_some_and(|block| block.start.is_match(line))
        {
            in_import_block = true;
            continue;
        }

        if let Some(import) = rules
            .imports
            .iter()
            .find_map(|regex| regex.captures(line))
            .and_then(|caps| capture_import(&caps, line_no))
        {
            imports.push(import);
        }

        if !with_symbols {
            continue;
        }

        let at_member_level = scopes
            .last()
            .is_some_and(|s| s.body_indent == Some(indent));

        for rule in &rules.symbols {
            if rule.has(MEMBER) && !at_member_level {
                continue;
            }
            let Some(caps) = rule.regex.captures(line) else {
                continue;
            };
            let Some(name_match) = caps.name("name") else {
                continue;
            };
            let name = name_match.as_str();
            if is_keyword(name) || (rule.has(MEMBER) && is_keyword(first_word(trimmed))) {
                continue;
            }

            if !rule.has(HIDDEN) {
                let mut kind = rule.kind;
                let mut parent: Option<String> = None;

                if let Some(recv) = caps.name("recv") {
                    parent = Some(receiver_type(recv.as_str()));
                } else if at_member_level {
                    if let Some(top) = scopes.last() {
                        if kind == SymbolKind::Function && is_type_scope(top.kind) {
                            kind = SymbolKind::Method;
                        }
                        parent = Some(
                            scopes
                                .iter()
                                .map(|s| s.name.as_str())
                                .collect::<Vec<_>>()
                                .join(rules.separator),
                        );
                    }
                }

                let start_column = column(line, name_match.start());
                let span = Span::new(line_no, start_column, line_no, line.chars().count() + 1);
                let member = parent.is_some();
                symbols.push(
                    Symbol::new(name, kind, path, span)
                        .with_visibility(visibility(language, line, name, member))
                        .with_parent(parent.as_deref(), rules.separator)
                        .with_signature(Some(trimmed.trim_end_matches('{').trim_end().to_string())),
                );
            }

            if rule.has(SCOPE) {
                scopes.push(Scope {
                    name: name.to_string(),
                    kind: rule.kind,
                    indent,
                    body_indent: None,
                });
            }
            break;
        }
    }

    (symbols, imports)
}

/// Imports only; used by backends that get symbols elsewhere.
pub fn extract_imports(language: Language, content: &str) -> Vec<Import> {
    scan(language, content, "", false).1
}

/// Always-available tier backed by per-language line patterns.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexBackend;

impl RegexBackend {
    pub const fn new() -> Self {
        Self
    }

    /// Synchronous analysis; the async trait method delegates here.
    pub fn analyze(&self, language: Language, content: &str, path: &str) -> FileAnalysis {
        let mut analysis = FileAnalysis::for_tier(path, language, Tier::Regex);
        let (symbols, imports) = scan(language, content, path, true);
        analysis.symbols = symbols;
        analysis.imports = imports;
        analysis
    }
}

#[async_trait]
impl ParserBackend for RegexBackend {
    fn tier(&self) -> Tier {
        Tier::Regex
    }

    fn supports(&self, language: Language) -> bool {
        language != Language::Unknown
    }

    async fn probe(&self, language: Language) -> bool {
        RULES
            .get(&language)
            .is_some_and(|rules| !rules.symbols.is_empty() || !rules.imports.is_empty())
    }

    async fn parse(&self, language: Language, content: &str, path: &str) -> Result<FileAnalysis> {
        Ok(self.analyze(language, content, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(analysis: &FileAnalysis) -> Vec<(&str, SymbolKind)> {
        analysis
            .symbols
            .iter()
            .map(|s| (s.name.as_str(), s.kind))
            .collect()
    }

    #[test]
    fn every_pattern_compiles() {
        for language in Language::ALL {
            for pattern in symbol_patterns(language) {
                assert!(Regex::new(pattern.pattern).is_ok(), "{language}: {}", pattern.pattern);
            }
            for pattern in import_patterns(language) {
                assert!(Regex::new(pattern).is_ok(), "{language}: {pattern}");
            }
            if let Some((start, item)) = import_block_patterns(language) {
                assert!(Regex::new(start).is_ok() && Regex::new(item).is_ok());
            }
        }
    }

    #[test]
    fn rust_declarations_and_impl_methods() {
        let code = r#"use std::collections::HashMap;
use crate::error::{Result, ParserError};

pub struct Config {
    name: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        todo!()
    }

    fn validate(&self) -> bool {
        true
    }
}

pub(crate) fn helper() {}
const LIMIT: usize = 4;
"#;
        let analysis = RegexBackend.analyze(Language::Rust, code, "src/config.rs");
        assert_eq!(
            names(&analysis),
            vec![
                ("Config", SymbolKind::Struct),
                ("load", SymbolKind::Method),
                ("validate", SymbolKind::Method),
                ("helper", SymbolKind::Function),
                ("LIMIT", SymbolKind::Constant),
            ]
        );

        let load = &analysis.symbols[1];
        assert_eq!(load.qualified_name.as_deref(), Some("Config::load"));
        assert_eq!(load.visibility, Some(Visibility::Public));
        assert_eq!(load.span.start_line, 9);
        assert_eq!(load.span.start_column, 12);
        assert_eq!(analysis.symbols[2].visibility, Some(Visibility::Private));
        assert_eq!(analysis.symbols[3].visibility, Some(Visibility::Crate));

        let targets: Vec<_> = analysis.imports.iter().map(|i| i.target.as_str()).collect();
        assert_eq!(targets, vec!["std::collections::HashMap", "crate::error"]);
        assert_eq!(analysis.tier, Some(Tier::Regex));
    }

    #[test]
    fn python_classes_scope_methods_by_indent() {
        let code = r#"import os.path as osp
from typing import List

MAX_RETRIES = 3

class Client:
    """Docs."""

    def send(self, payload):
        def inner():
            pass
        return payload

    def _reset(self):
        pass

def main():
    pass
"#;
        let analysis = RegexBackend.analyze(Language::Python, code, "client.py");
        assert_eq!(
            names(&analysis),
            vec![
                ("MAX_RETRIES", SymbolKind::Constant),
                ("Client", SymbolKind::Class),
                ("send", SymbolKind::Method),
                ("inner", SymbolKind::Function),
                ("_reset", SymbolKind::Method),
                ("main", SymbolKind::Function),
            ]
        );
        assert_eq!(analysis.symbols[2].qualified_name.as_deref(), Some("Client.send"));
        assert!(analysis.symbols[3].parent.is_none());
        assert_eq!(analysis.symbols[4].visibility, Some(Visibility::Private));
        assert!(analysis.symbols[5].parent.is_none());

        assert_eq!(analysis.imports[0].target, "os.path");
        assert_eq!(analysis.imports[0].alias.as_deref(), Some("osp"));
        assert_eq!(analysis.imports[1].target, "typing");
    }

    #[test]
    fn go_receivers_and_import_blocks() {
        let code = r#"package server

import (
	"context"
	log "github.com/sirupsen/logrus"
)

import "fmt"

type Server struct {
	addr string
}

func (s *Server) Start(ctx context.Context) error {
	return nil
}

func newServer() *Server {
	return &Server{}
}
"#;
        let analysis = RegexBackend.analyze(Language::Go, code, "server.go");
        assert_eq!(
            names(&analysis),
            vec![
                ("Server", SymbolKind::Struct),
                ("Start", SymbolKind::Method),
                ("newServer", SymbolKind::Function),
            ]
        );
        assert_eq!(analysis.symbols[1].qualified_name.as_deref(), Some("Server.Start"));
        assert_eq!(analysis.symbols[1].visibility, Some(Visibility::Public));
        assert_eq!(analysis.symbols[2].visibility, Some(Visibility::Private));

        let imports: Vec<_> = analysis
            .imports
            .iter()
            .map(|i| (i.target.as_str(), i.alias.as_deref(), i.line))
            .collect();
        assert_eq!(
            imports,
            vec![
                ("context", None, 4),
                ("github.com/sirupsen/logrus", Some("log"), 5),
                ("fmt", None, 8),
            ]
        );
    }

    #[test]
    fn typescript_class_members_ignore_calls_in_bodies() {
        let code = r#"import * as path from 'path';
import { readFile } from "fs/promises";
import './polyfill';

export class Loader {
  private cache = new Map();

  async load(file: string): Promise<string> {
    if (this.cache.has(file)) {
      return this.cache.get(file);
    }
    validate(file);
    return readFile(file, 'utf8');
  }
}

export const toUpper = (s: string) => s.toUpperCase();
function internal() {}
"#;
        let analysis = RegexBackend.analyze(Language::TypeScript, code, "src/loader.ts");
        assert_eq!(
            names(&analysis),
            vec![
                ("Loader", SymbolKind::Class),
                ("load", SymbolKind::Method),
                ("toUpper", SymbolKind::Function),
                ("internal", SymbolKind::Function),
            ]
        );
        assert_eq!(analysis.symbols[0].visibility, Some(Visibility::Public));
        assert_eq!(analysis.symbols[3].visibility, Some(Visibility::Private));

        let targets: Vec<_> = analysis.imports.iter().map(|i| i.target.as_str()).collect();
        assert_eq!(targets, vec!["path", "fs/promises", "./polyfill"]);
        assert_eq!(analysis.imports[0].alias.as_deref(), Some("path"));
    }

    #[test]
    fn java_methods_inside_class() {
        let code = r#"package app;

import java.util.List;

public class Service {
    private final List<String> items;

    public List<String> items() {
        return items;
    }

    void reset() {
        items.clear();
    }
}
"#;
        let analysis = RegexBackend.analyze(Language::Java, code, "Service.java");
        assert_eq!(
            names(&analysis),
            vec![
                ("Service", SymbolKind::Class),
                ("items", SymbolKind::Method),
                ("reset", SymbolKind::Method),
            ]
        );
        assert_eq!(analysis.symbols[2].visibility, Some(Visibility::Internal));
        assert_eq!(analysis.imports[0].target, "java.util.List");
    }

    #[test]
    fn build_files() {
        let dockerfile = "FROM rust:1.80 AS builder\nARG PROFILE=release\nFROM debian:bookworm\nCOPY --from=builder /app /app\n";
        let analysis = RegexBackend.analyze(Language::Dockerfile, dockerfile, "Dockerfile");
        assert_eq!(
            names(&analysis),
            vec![("builder", SymbolKind::Module), ("PROFILE", SymbolKind::Variable)]
        );
        let targets: Vec<_> = analysis.imports.iter().map(|i| i.target.as_str()).collect();
        assert_eq!(targets, vec!["rust:1.80", "debian:bookworm", "builder"]);

        let makefile = "CC := gcc\ninclude common.mk\n\nbuild: main.o\n\t$(CC) -o app main.o\n\n.PHONY: build\n";
        let analysis = RegexBackend.analyze(Language::Makefile, makefile, "Makefile");
        assert_eq!(
            names(&analysis),
            vec![("CC", SymbolKind::Variable), ("build", SymbolKind::Function)]
        );
        assert_eq!(analysis.imports[0].target, "common.mk");
    }

    #[test]
    fn unknown_language_yields_nothing() {
        let analysis = RegexBackend.analyze(Language::Unknown, "fn main() {}", "notes.txt");
        assert!(analysis.symbols.is_empty() && analysis.imports.is_empty());
    }

    #[test]
    fn import_extraction_skips_symbols() {
        let imports = extract_imports(Language::Rust, "use std::fs;\nfn main() {}\n");
        assert_eq!(imports.len(), 1);
        assert_eq!(imports[0].target, "std::fs");
    }
}
