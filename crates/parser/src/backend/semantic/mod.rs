//! Language-server tier.
//!
//! One long-lived session per language, started lazily by the first probe. Any failure to start
//! or initialize, or the server process dying later, demotes the language for the rest of the
//! process; the registry then falls through to the next tier.

mod session;
mod transport;

pub use self::session::{file_uri, find_on_path, LspSession};

use super::regex::extract_imports;
use super::ParserBackend;
use crate::config::{SemanticConfig, ServerSpec};
use crate::error::{ParserError, Result};
use crate::language::Language;
use crate::types::{Diagnostic, FileAnalysis, Span, Symbol, SymbolKind, Tier};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Starts a connected (not yet initialized) session for a server spec.
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    async fn launch(&self, spec: &ServerSpec, workspace_root: &Path) -> Result<LspSession>;
}

/// Launches servers as child processes speaking LSP over stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl ServerLauncher for ProcessLauncher {
    async fn launch(&self, spec: &ServerSpec, workspace_root: &Path) -> Result<LspSession> {
        LspSession::spawn(&spec.command, &spec.args, workspace_root)
    }
}

struct LanguageSlot {
    spec: ServerSpec,
    session: OnceCell<Option<Arc<LspSession>>>,
    demoted: AtomicBool,
}

pub struct SemanticBackend {
    config: SemanticConfig,
    workspace_root: PathBuf,
    launcher: Arc<dyn ServerLauncher>,
    slots: HashMap<Language, LanguageSlot>,
}

impl SemanticBackend {
    pub fn new(config: SemanticConfig) -> Self {
        Self::with_launcher(config, Arc::new(ProcessLauncher))
    }

    pub fn with_launcher(config: SemanticConfig, launcher: Arc<dyn ServerLauncher>) -> Self {
        let workspace_root = config
            .workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        let mut slots = HashMap::new();
        for spec in &config.servers {
            slots.entry(spec.language).or_insert_with(|| LanguageSlot {
                spec: spec.clone(),
                session: OnceCell::new(),
                demoted: AtomicBool::new(false),
            });
        }

        Self {
            config,
            workspace_root,
            launcher,
            slots,
        }
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    fn demote(&self, language: Language, reason: &str) {
        if let Some(slot) = self.slots.get(&language) {
            if !slot.demoted.swap(true, Ordering::AcqRel) {
                log::warn!(
                    "Semantic tier demoted for {language} ({}): {reason}",
                    slot.spec.command
                );
            }
        }
    }

    async fn start(&self, slot: &LanguageSlot) -> Result<Arc<LspSession>> {
        let handshake = async {
            let session = self.launcher.launch(&slot.spec, &self.workspace_root).await?;
            let capabilities = session
                .initialize(&self.workspace_root, self.config.handshake_timeout())
                .await?;
            let has_symbols = match capabilities.get("documentSymbolProvider") {
                Some(Value::Bool(enabled)) => *enabled,
                Some(Value::Object(_)) => true,
                _ => false,
            };
            if !has_symbols {
                session.shutdown().await;
                return Err(ParserError::BackendUnavailable(format!(
                    "{} does not provide document symbols",
                    slot.spec.command
                )));
            }
            Ok::<_, ParserError>(session)
        };

        match tokio::time::timeout(self.config.handshake_timeout(), handshake).await {
            Ok(result) => result.map(Arc::new),
            Err(_) => Err(ParserError::Timeout {
                method: "initialize".to_string(),
                timeout_ms: self.config.handshake_timeout_ms,
            }),
        }
    }

    /// The session for `language`, starting it on first use. `None` once demoted.
    async fn session(&self, language: Language) -> Option<Arc<LspSession>> {
        let slot = self.slots.get(&language)?;
        if slot.demoted.load(Ordering::Acquire) {
            return None;
        }
        let session = slot
            .session
            .get_or_init(|| async {
                match self.start(slot).await {
                    Ok(session) => {
                        log::info!("Semantic tier ready for {language} via {}", slot.spec.command);
                        Some(session)
                    }
                    Err(e) => {
                        self.demote(language, &e.to_string());
                        None
                    }
                }
            })
            .await
            .clone();

        match session {
            Some(session) if session.is_alive() => Some(session),
            Some(_) => {
                self.demote(language, "server process exited");
                None
            }
            None => None,
        }
    }

    /// Open the document, fetch its symbols and whatever diagnostics the server publishes for it,
    /// then close it again.
    async fn document_symbols(
        &self,
        session: &LspSession,
        language: Language,
        content: &str,
        path: &str,
    ) -> Result<(Value, Vec<Value>)> {
        let uri = file_uri(&self.workspace_root.join(path));
        session.forget_diagnostics(&uri).await;
        session
            .notify(
                "textDocument/didOpen",
                json!({
                    "textDocument": {
                        "uri": uri,
                        "languageId": language.as_str(),
                        "version": 1,
                        "text": content,
                    }
                }),
            )
            .await?;

        let result = session
            .request(
                "textDocument/documentSymbol",
                json!({ "textDocument": { "uri": uri } }),
                self.config.request_timeout(),
            )
            .await;
        let published = match result {
            Ok(_) => session
                .take_diagnostics(&uri, self.config.diagnostics_wait())
                .await
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        if let Err(e) = session
            .notify("textDocument/didClose", json!({ "textDocument": { "uri": uri } }))
            .await
        {
            log::debug!("didClose for {path} not delivered: {e}");
        }
        result.map(|symbols| (symbols, published))
    }
}

#[async_trait]
impl ParserBackend for SemanticBackend {
    fn tier(&self) -> Tier {
        Tier::Semantic
    }

    fn supports(&self, language: Language) -> bool {
        self.slots.contains_key(&language)
    }

    async fn probe(&self, language: Language) -> bool {
        self.session(language).await.is_some()
    }

    fn is_demoted(&self, language: Language) -> bool {
        self.slots
            .get(&language)
            .map_or(true, |slot| slot.demoted.load(Ordering::Acquire))
    }

    /// Shut down every started session.
    async fn shutdown(&self) {
        for slot in self.slots.values() {
            if let Some(Some(session)) = slot.session.get() {
                session.shutdown().await;
            }
        }
    }

    async fn parse(&self, language: Language, content: &str, path: &str) -> Result<FileAnalysis> {
        let session = self.session(language).await.ok_or_else(|| {
            ParserError::BackendUnavailable(format!("no language server for {language}"))
        })?;

        let (result, published) =
            match self.document_symbols(&session, language, content, path).await {
                Ok(result) => result,
                Err(e) => {
                    if !session.is_alive() {
                        self.demote(language, &e.to_string());
                    }
                    return Err(e);
                }
            };

        let separator = if language == Language::Rust { "::" } else { "." };
        let mut analysis = FileAnalysis::for_tier(path, language, Tier::Semantic);
        analysis.symbols = convert_symbols(&result, path, separator)?;
        analysis.imports = extract_imports(language, content);
        analysis.diagnostics = published.iter().filter_map(convert_diagnostic).collect();
        Ok(analysis)
    }
}

/// LSP severities: 1 error, 2 warning, 3 information, 4 hint. Only the first two are kept; a
/// missing severity counts as an error.
fn convert_diagnostic(item: &Value) -> Option<Diagnostic> {
    let message = item.get("message").and_then(Value::as_str)?;
    let span = item.get("range").and_then(range_span);
    match item.get("severity").and_then(Value::as_u64) {
        None | Some(1) => Some(Diagnostic::error(message, span, Some(Tier::Semantic))),
        Some(2) => Some(Diagnostic::warning(message, span, Some(Tier::Semantic))),
        _ => None,
    }
}

/// LSP `SymbolKind` numbers.
fn symbol_kind(kind: u64) -> SymbolKind {
    match kind {
        1..=4 => SymbolKind::Module,
        5 => SymbolKind::Class,
        6 | 9 => SymbolKind::Method,
        7 | 8 => SymbolKind::Field,
        10 => SymbolKind::Enum,
        11 => SymbolKind::Interface,
        12 | 25 => SymbolKind::Function,
        13 => SymbolKind::Variable,
        14 | 22 => SymbolKind::Constant,
        23 => SymbolKind::Struct,
        26 => SymbolKind::TypeAlias,
        _ => SymbolKind::Other,
    }
}

/// LSP ranges are 0-based; spans are 1-based.
fn range_span(range: &Value) -> Option<Span> {
    let position = |key: &str| -> Option<(usize, usize)> {
        let pos = range.get(key)?;
        let line = usize::try_from(pos.get("line")?.as_u64()?).ok()?;
        let character = usize::try_from(pos.get("character")?.as_u64()?).ok()?;
        Some((line + 1, character + 1))
    };
    let (start_line, start_column) = position("start")?;
    let (end_line, end_column) = position("end")?;
    Some(Span::new(start_line, start_column, end_line, end_column))
}

/// Accepts both `DocumentSymbol[]` (hierarchical) and `SymbolInformation[]` (flat).
fn convert_symbols(result: &Value, path: &str, separator: &str) -> Result<Vec<Symbol>> {
    let items = match result {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(ParserError::protocol(format!(
                "documentSymbol returned {}",
                if other.is_object() { "an object" } else { "a scalar" }
            )))
        }
    };

    let mut symbols = Vec::new();
    let mut scope = Vec::new();
    for item in items {
        convert_one(item, path, separator, &mut scope, &mut symbols)?;
    }
    Ok(symbols)
}

fn convert_one(
    item: &Value,
    path: &str,
    separator: &str,
    scope: &mut Vec<String>,
    out: &mut Vec<Symbol>,
) -> Result<()> {
    let name = item
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ParserError::protocol("symbol without a name"))?;
    let kind = symbol_kind(item.get("kind").and_then(Value::as_u64).unwrap_or_default());
    let signature = item
        .get("detail")
        .and_then(Value::as_str)
        .map(str::to_string);

    // SymbolInformation carries `location` and an optional flat `containerName`.
    if let Some(location) = item.get("location") {
        let span = location
            .get("range")
            .and_then(range_span)
            .ok_or_else(|| ParserError::protocol(format!("symbol `{name}` has no range")))?;
        let container = item
            .get("containerName")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty());
        out.push(
            Symbol::new(name, kind, path, span)
                .with_parent(container, separator)
                .with_signature(signature),
        );
        return Ok(());
    }

    let span = item
        .get("range")
        .and_then(range_span)
        .ok_or_else(|| ParserError::protocol(format!("symbol `{name}` has no range")))?;
    let parent = (!scope.is_empty()).then(|| scope.join(separator));
    out.push(
        Symbol::new(name, kind, path, span)
            .with_parent(parent.as_deref(), separator)
            .with_signature(signature),
    );

    if let Some(children) = item.get("children").and_then(Value::as_array) {
        scope.push(name.to_string());
        for child in children {
            convert_one(child, path, separator, scope, out)?;
        }
        scope.pop();
    }
    Ok(())
}
