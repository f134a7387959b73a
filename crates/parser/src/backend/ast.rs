//! Tree-sitter tier.
//!
//! Grammars are compiled in; the probe only checks that the grammar ABI is accepted by the linked
//! runtime. Parsing happens on the blocking pool with a fresh `Parser` per file.

use super::ParserBackend;
use crate::error::{ParserError, Result};
use crate::language::Language;
use crate::types::{Diagnostic, FileAnalysis, Import, Span, Symbol, SymbolKind, Tier, Visibility};
use async_trait::async_trait;
use tree_sitter::{Node, Parser};

/// Syntax errors reported per file before the rest are summarized.
const MAX_SYNTAX_DIAGNOSTICS: usize = 32;

/// Longest signature kept on a symbol.
const MAX_SIGNATURE_CHARS: usize = 200;

#[derive(Debug, Default, Clone, Copy)]
pub struct AstBackend;

impl AstBackend {
    pub const fn new() -> Self {
        Self
    }

    /// Synchronous analysis; callers on the async runtime should go through [`ParserBackend::parse`].
    pub fn analyze(&self, language: Language, content: &str, path: &str) -> Result<FileAnalysis> {
        let grammar = language
            .tree_sitter_language(path)
            .ok_or_else(|| ParserError::unsupported_language(language.as_str()))?;

        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|e| ParserError::tree_sitter(format!("Failed to set language: {e}")))?;

        let tree = parser
            .parse(content, None)
            .ok_or_else(|| ParserError::tree_sitter("Failed to parse source code"))?;
        let root = tree.root_node();

        let mut walker = Walker::new(language, content, path);
        walker.walk(root);

        let mut analysis = FileAnalysis::for_tier(path, language, Tier::Ast);
        analysis.symbols = walker.symbols;
        analysis.imports = walker.imports;
        collect_syntax_errors(root, content, &mut analysis.diagnostics);
        Ok(analysis)
    }
}

#[async_trait]
impl ParserBackend for AstBackend {
    fn tier(&self) -> Tier {
        Tier::Ast
    }

    fn supports(&self, language: Language) -> bool {
        language.supports_ast()
    }

    async fn probe(&self, language: Language) -> bool {
        let Some(grammar) = language.tree_sitter_language("") else {
            return false;
        };
        let mut parser = Parser::new();
        match parser.set_language(&grammar) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Tree-sitter grammar for {language} rejected: {e}");
                false
            }
        }
    }

    async fn parse(&self, language: Language, content: &str, path: &str) -> Result<FileAnalysis> {
        let backend = *self;
        let content = content.to_string();
        let path = path.to_string();
        tokio::task::spawn_blocking(move || backend.analyze(language, &content, &path))
            .await
            .map_err(|e| ParserError::tree_sitter(format!("Parse task failed: {e}")))?
    }
}

fn span_of(node: Node<'_>) -> Span {
    let start = node.start_position();
    let end = node.end_position();
    Span::new(start.row + 1, start.column + 1, end.row + 1, end.column + 1)
}

fn strip_quotes(raw: &str) -> &str {
    raw.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

/// Record every `ERROR` and `MISSING` node, outermost first.
fn collect_syntax_errors(root: Node<'_>, source: &str, out: &mut Vec<Diagnostic>) {
    if !root.has_error() {
        return;
    }

    let before = out.len();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if out.len() - before >= MAX_SYNTAX_DIAGNOSTICS {
            out.push(Diagnostic::warning(
                format!("More than {MAX_SYNTAX_DIAGNOSTICS} syntax errors; the rest are omitted"),
                None,
                Some(Tier::Ast),
            ));
            break;
        }

        if node.is_missing() {
            out.push(Diagnostic::error(
                format!("Missing `{}`", node.kind()),
                Some(span_of(node)),
                Some(Tier::Ast),
            ));
            continue;
        }

        if node.is_error() {
            let snippet: String = node
                .utf8_text(source.as_bytes())
                .unwrap_or("")
                .lines()
                .next()
                .unwrap_or("")
                .trim()
                .chars()
                .take(40)
                .collect();
            out.push(Diagnostic::error(
                format!("Syntax error near `{snippet}`"),
                Some(span_of(node)),
                Some(Tier::Ast),
            ));
            continue;
        }

        if node.has_error() {
            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }

    if out.len() == before {
        out.push(Diagnostic::error(
            "Syntax error",
            Some(span_of(root)),
            Some(Tier::Ast),
        ));
    }
}

/// Pending traversal work, taken last-in first-out.
enum Step<'t> {
    /// Visit a node; the flag marks direct members of a class/impl/trait/interface body.
    Visit(Node<'t>, bool),
    Declarator {
        node: Node<'t>,
        is_const: bool,
        visibility: Visibility,
    },
    Enter(String),
    Leave,
}

/// Pre-order declaration collector. Traversal runs off an explicit work list, so nesting depth
/// is bounded by the heap rather than the thread stack. `scope` holds enclosing declaration names.
struct Walker<'a> {
    language: Language,
    source: &'a str,
    path: &'a str,
    separator: &'static str,
    scope: Vec<String>,
    work: Vec<Step<'a>>,
    symbols: Vec<Symbol>,
    imports: Vec<Import>,
}

impl<'a> Walker<'a> {
    fn new(language: Language, source: &'a str, path: &'a str) -> Self {
        Self {
            language,
            source,
            path,
            separator: if language == Language::Rust { "::" } else { "." },
            scope: Vec::new(),
            work: Vec::new(),
            symbols: Vec::new(),
            imports: Vec::new(),
        }
    }

    fn walk(&mut self, root: Node<'a>) {
        self.work.push(Step::Visit(root, false));
        while let Some(step) = self.work.pop() {
            match step {
                Step::Visit(node, in_type) => self.visit(node, in_type),
                Step::Declarator {
                    node,
                    is_const,
                    visibility,
                } => self.js_declarator(node, is_const, visibility),
                Step::Enter(name) => self.scope.push(name),
                Step::Leave => {
                    self.scope.pop();
                }
            }
        }
    }

    fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    fn field_text(&self, node: Node<'_>, field: &str) -> Option<&'a str> {
        node.child_by_field_name(field)
            .map(|child| self.text(child))
            .filter(|text| !text.is_empty())
    }

    /// Declaration header: text up to the body, whitespace collapsed.
    fn signature(&self, node: Node<'_>) -> Option<String> {
        let end = node
            .child_by_field_name("body")
            .map_or(node.end_byte(), |body| body.start_byte());
        let header = self.source.get(node.start_byte()..end)?;
        let collapsed = header.split_whitespace().collect::<Vec<_>>().join(" ");
        let collapsed = collapsed.trim_end_matches(['{', ':', ';']).trim_end();
        Some(collapsed.chars().take(MAX_SIGNATURE_CHARS).collect())
    }

    /// Record a declaration under the current scope.
    fn push_symbol(
        &mut self,
        node: Node<'_>,
        name: &str,
        kind: SymbolKind,
        visibility: Option<Visibility>,
    ) {
        let parent = (!self.scope.is_empty()).then(|| self.scope.join(self.separator));
        self.push_symbol_under(node, name, kind, parent.as_deref(), visibility);
    }

    fn push_symbol_under(
        &mut self,
        node: Node<'_>,
        name: &str,
        kind: SymbolKind,
        parent: Option<&str>,
        visibility: Option<Visibility>,
    ) {
        let symbol = Symbol::new(name, kind, self.path, span_of(node))
            .with_visibility(visibility)
            .with_parent(parent, self.separator)
            .with_signature(self.signature(node));
        self.symbols.push(symbol);
    }

    fn push_import(&mut self, node: Node<'_>, target: &str, alias: Option<&str>) {
        let target = target.trim();
        if target.is_empty() {
            return;
        }
        self.imports.push(
            Import::new(target, node.start_position().row + 1)
                .with_alias(alias.map(str::to_string)),
        );
    }

    fn visit(&mut self, node: Node<'a>, in_type: bool) {
        let handled = match self.language {
            Language::Rust => self.visit_rust(node, in_type),
            Language::Python => self.visit_python(node, in_type),
            Language::JavaScript | Language::TypeScript => self.visit_js(node, in_type),
            Language::Go => self.visit_go(node),
            _ => false,
        };
        if !handled {
            self.visit_children(node, in_type);
        }
    }

    /// Queue `node`'s named children so the first one is visited next.
    fn visit_children(&mut self, node: Node<'a>, in_type: bool) {
        let mut cursor = node.walk();
        let children: Vec<_> = node.named_children(&mut cursor).collect();
        self.work
            .extend(children.into_iter().rev().map(|child| Step::Visit(child, in_type)));
    }

    /// Queue `node`'s `field` child's members with `name` pushed onto the scope.
    fn visit_nested(&mut self, node: Node<'a>, field: &str, name: &str, in_type: bool) {
        if let Some(body) = node.child_by_field_name(field) {
            self.work.push(Step::Leave);
            self.visit_children(body, in_type);
            self.work.push(Step::Enter(name.to_string()));
        }
    }

    // Rust

    fn visit_rust(&mut self, node: Node<'a>, in_type: bool) -> bool {
        let kind = match node.kind() {
            "function_item" | "function_signature_item" if in_type => SymbolKind::Method,
            "function_item" | "function_signature_item" => SymbolKind::Function,
            "struct_item" | "union_item" => SymbolKind::Struct,
            "enum_item" => SymbolKind::Enum,
            "trait_item" => SymbolKind::Trait,
            "type_item" => SymbolKind::TypeAlias,
            "mod_item" => SymbolKind::Module,
            "const_item" => SymbolKind::Constant,
            "static_item" => SymbolKind::Variable,
            "macro_definition" => SymbolKind::Macro,
            "impl_item" => {
                let target = node
                    .child_by_field_name("type")
                    .and_then(|ty| self.rust_type_name(ty));
                match target {
                    Some(target) => self.visit_nested(node, "body", &target, true),
                    None => {
                        if let Some(body) = node.child_by_field_name("body") {
                            self.visit_children(body, true);
                        }
                    }
                }
                return true;
            }
            "use_declaration" => {
                self.rust_use(node);
                return true;
            }
            "extern_crate_declaration" => {
                if let Some(name) = self.field_text(node, "name") {
                    let alias = self.field_text(node, "alias");
                    self.push_import(node, name, alias);
                }
                return true;
            }
            _ => return false,
        };

        let Some(name) = self.field_text(node, "name") else {
            return false;
        };
        let visibility = self.rust_visibility(node);
        self.push_symbol(node, name, kind, Some(visibility));

        match kind {
            SymbolKind::Trait => self.visit_nested(node, "body", name, true),
            SymbolKind::Module | SymbolKind::Function | SymbolKind::Method => {
                self.visit_nested(node, "body", name, false);
            }
            _ => {}
        }
        true
    }

    fn rust_visibility(&self, node: Node<'_>) -> Visibility {
        let mut cursor = node.walk();
        let modifier = node
            .named_children(&mut cursor)
            .find(|child| child.kind() == "visibility_modifier")
            .map(|child| self.text(child));
        match modifier {
            Some("pub") => Visibility::Public,
            Some(_) => Visibility::Crate,
            None => Visibility::Private,
        }
    }

    /// Base type name of an impl target: `impl<T> Foo<T>` → `Foo`, `impl a::Foo` → `Foo`.
    fn rust_type_name(&self, node: Node<'_>) -> Option<String> {
        let mut node = node;
        loop {
            match node.kind() {
                "generic_type" | "reference_type" | "pointer_type" => {
                    node = node.child_by_field_name("type")?;
                }
                "scoped_type_identifier" => {
                    return self.field_text(node, "name").map(str::to_string)
                }
                _ => return Some(self.text(node).to_string()).filter(|name| !name.is_empty()),
            }
        }
    }

    fn rust_use(&mut self, node: Node<'_>) {
        let Some(argument) = node.child_by_field_name("argument") else {
            return;
        };
        let (target, alias) = match argument.kind() {
            "use_as_clause" => (
                self.field_text(argument, "path"),
                self.field_text(argument, "alias"),
            ),
            "scoped_use_list" => (self.field_text(argument, "path"), None),
            "use_wildcard" => (
                Some(self.text(argument).trim_end_matches('*').trim_end_matches("::")),
                None,
            ),
            _ => (Some(self.text(argument)), None),
        };
        if let Some(target) = target {
            self.push_import(node, target, alias);
        }
    }

    // Python

    fn visit_python(&mut self, node: Node<'a>, in_type: bool) -> bool {
        match node.kind() {
            "function_definition" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                let kind = if in_type {
                    SymbolKind::Method
                } else {
                    SymbolKind::Function
                };
                self.push_symbol(node, name, kind, Some(python_visibility(name)));
                self.visit_nested(node, "body", name, false);
                true
            }
            "class_definition" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                self.push_symbol(node, name, SymbolKind::Class, Some(python_visibility(name)));
                self.visit_nested(node, "body", name, true);
                true
            }
            "import_statement" => {
                let mut cursor = node.walk();
                let names: Vec<_> = node.children_by_field_name("name", &mut cursor).collect();
                for name in names {
                    if name.kind() == "aliased_import" {
                        if let Some(target) = self.field_text(name, "name") {
                            let alias = self.field_text(name, "alias");
                            self.push_import(node, target, alias);
                        }
                    } else {
                        let target = self.text(name);
                        self.push_import(node, target, None);
                    }
                }
                true
            }
            "import_from_statement" => {
                if let Some(module) = self.field_text(node, "module_name") {
                    self.push_import(node, module, None);
                }
                true
            }
            "expression_statement" if self.scope.is_empty() => {
                let assignment = node
                    .named_child(0)
                    .filter(|child| child.kind() == "assignment");
                if let Some(left) = assignment.and_then(|a| a.child_by_field_name("left")) {
                    let name = self.text(left);
                    if left.kind() == "identifier" && is_upper_snake(name) {
                        self.push_symbol(node, name, SymbolKind::Constant, Some(python_visibility(name)));
                    }
                }
                true
            }
            _ => false,
        }
    }

    // JavaScript / TypeScript

    fn visit_js(&mut self, node: Node<'a>, in_type: bool) -> bool {
        let exported = node
            .parent()
            .is_some_and(|parent| parent.kind() == "export_statement");
        let top_visibility = if exported {
            Visibility::Public
        } else {
            Visibility::Private
        };

        match node.kind() {
            "function_declaration" | "generator_function_declaration" | "function_signature" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                self.push_symbol(node, name, SymbolKind::Function, Some(top_visibility));
                self.visit_nested(node, "body", name, false);
                true
            }
            "class_declaration" | "abstract_class_declaration" | "class" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                self.push_symbol(node, name, SymbolKind::Class, Some(top_visibility));
                self.visit_nested(node, "body", name, true);
                true
            }
            "interface_declaration" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                self.push_symbol(node, name, SymbolKind::Interface, Some(top_visibility));
                self.visit_nested(node, "body", name, true);
                true
            }
            "type_alias_declaration" | "enum_declaration" => {
                let Some(name) = self.field_text(node, "name") else {
                    return false;
                };
                let kind = if node.kind() == "enum_declaration" {
                    SymbolKind::Enum
                } else {
                    SymbolKind::TypeAlias
                };
                self.push_symbol(node, name, kind, Some(top_visibility));
                true
            }
            "method_definition" | "method_signature" | "abstract_method_signature" if in_type => {
                let Some(name_node) = node.child_by_field_name("name") else {
                    return false;
                };
                let name = self.text(name_node);
                let visibility = self.js_member_visibility(node, name_node);
                self.push_symbol(node, name, SymbolKind::Method, Some(visibility));
                self.visit_nested(node, "body", name, false);
                true
            }
            "lexical_declaration" | "variable_declaration" => {
                let is_const = self.text(node).starts_with("const");
                let mut cursor = node.walk();
                let declarators: Vec<_> = node
                    .named_children(&mut cursor)
                    .filter(|child| child.kind() == "variable_declarator")
                    .collect();
                self.work.extend(declarators.into_iter().rev().map(|node| Step::Declarator {
                    node,
                    is_const,
                    visibility: top_visibility,
                }));
                true
            }
            "import_statement" => {
                if let Some(source) = self.field_text(node, "source") {
                    let alias = self.js_import_alias(node);
                    self.push_import(node, strip_quotes(source), alias);
                }
                true
            }
            "export_statement" => {
                if let Some(source) = self.field_text(node, "source") {
                    self.push_import(node, strip_quotes(source), None);
                }
                false
            }
            "call_expression" => {
                let is_require = self.field_text(node, "function") == Some("require");
                if is_require {
                    let argument = node
                        .child_by_field_name("arguments")
                        .and_then(|args| args.named_child(0))
                        .filter(|arg| arg.kind() == "string");
                    if let Some(argument) = argument {
                        let target = strip_quotes(self.text(argument));
                        self.push_import(node, target, None);
                    }
                }
                false
            }
            _ => false,
        }
    }

    fn js_declarator(&mut self, declarator: Node<'a>, is_const: bool, visibility: Visibility) {
        let Some(name_node) = declarator
            .child_by_field_name("name")
            .filter(|n| n.kind() == "identifier")
        else {
            self.visit_children(declarator, false);
            return;
        };
        let name = self.text(name_node);
        let value = declarator.child_by_field_name("value");
        let is_function = value.is_some_and(|v| {
            matches!(
                v.kind(),
                "arrow_function" | "function_expression" | "function" | "generator_function"
            )
        });

        if is_function {
            self.push_symbol(declarator, name, SymbolKind::Function, Some(visibility));
            if let Some(value) = value {
                self.visit_nested(value, "body", name, false);
            }
            return;
        }

        if self.scope.is_empty() {
            let kind = if is_const {
                SymbolKind::Constant
            } else {
                SymbolKind::Variable
            };
            self.push_symbol(declarator, name, kind, Some(visibility));
        }
        if let Some(value) = value {
            self.work.push(Step::Visit(value, false));
        }
    }

    fn js_member_visibility(&self, node: Node<'_>, name_node: Node<'_>) -> Visibility {
        if name_node.kind() == "private_property_identifier" {
            return Visibility::Private;
        }
        let mut cursor = node.walk();
        let modifier = node
            .children(&mut cursor)
            .find(|child| child.kind() == "accessibility_modifier")
            .map(|child| self.text(child));
        match modifier {
            Some("private") => Visibility::Private,
            Some("protected") => Visibility::Protected,
            _ => Visibility::Public,
        }
    }

    /// `import x from`, `import * as x from` → `x`.
    fn js_import_alias(&self, node: Node<'_>) -> Option<&'a str> {
        let mut cursor = node.walk();
        let clause = node
            .named_children(&mut cursor)
            .find(|child| child.kind() == "import_clause")?;
        let mut clause_cursor = clause.walk();
        let alias = clause
            .named_children(&mut clause_cursor)
            .find_map(|child| match child.kind() {
                "identifier" => Some(self.text(child)),
                "namespace_import" => {
                    let mut ns_cursor = child.walk();
                    let ident = child
                        .named_children(&mut ns_cursor)
                        .find(|n| n.kind() == "identifier")
                        .map(|n| self.text(n));
                    ident
                }
                _ => None,
            });
        alias
    }

    // Go

    fn visit_go(&mut self, node: Node<'_>) -> bool {
        match node.kind() {
            "function_declaration" => {
                if let Some(name) = self.field_text(node, "name") {
                    self.push_symbol(node, name, SymbolKind::Function, go_visibility(name));
                }
                true
            }
            "method_declaration" => {
                let Some(name) = self.field_text(node, "name") else {
                    return true;
                };
                let receiver = node
                    .child_by_field_name("receiver")
                    .and_then(|list| list.named_child(0))
                    .and_then(|param| self.field_text(param, "type"))
                    .map(go_receiver_type)
                    .filter(|recv| !recv.is_empty());
                self.push_symbol_under(
                    node,
                    name,
                    SymbolKind::Method,
                    receiver.as_deref(),
                    go_visibility(name),
                );
                true
            }
            "type_spec" | "type_alias" => {
                let Some(name) = self.field_text(node, "name") else {
                    return true;
                };
                let kind = match node.child_by_field_name("type").map(|t| t.kind()) {
                    Some("struct_type") if node.kind() == "type_spec" => SymbolKind::Struct,
                    Some("interface_type") if node.kind() == "type_spec" => SymbolKind::Interface,
                    _ => SymbolKind::TypeAlias,
                };
                self.push_symbol(node, name, kind, go_visibility(name));
                true
            }
            "const_spec" | "var_spec" => {
                if inside_go_function(node) {
                    return true;
                }
                let kind = if node.kind() == "const_spec" {
                    SymbolKind::Constant
                } else {
                    SymbolKind::Variable
                };
                let mut cursor = node.walk();
                let names: Vec<_> = node.children_by_field_name("name", &mut cursor).collect();
                for name_node in names {
                    let name = self.text(name_node);
                    if name != "_" {
                        self.push_symbol(node, name, kind, go_visibility(name));
                    }
                }
                true
            }
            "import_spec" => {
                if let Some(path) = self.field_text(node, "path") {
                    let alias = self.field_text(node, "name");
                    self.push_import(node, strip_quotes(path), alias);
                }
                true
            }
            _ => false,
        }
    }
}

fn python_visibility(name: &str) -> Visibility {
    let dunder = name.starts_with("__") && name.ends_with("__");
    if name.starts_with('_') && !dunder {
        Visibility::Private
    } else {
        Visibility::Public
    }
}

fn is_upper_snake(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn go_visibility(name: &str) -> Option<Visibility> {
    name.chars().next().map(|c| {
        if c.is_uppercase() {
            Visibility::Public
        } else {
            Visibility::Private
        }
    })
}

/// `*Server[T]` → `Server`.
fn go_receiver_type(raw: &str) -> String {
    let raw = raw.trim().trim_start_matches('*');
    let end = raw.find('[').unwrap_or(raw.len());
    raw[..end].trim().to_string()
}

fn inside_go_function(node: Node<'_>) -> bool {
    let mut current = node.parent();
    while let Some(parent) = current {
        match parent.kind() {
            "function_declaration" | "method_declaration" | "func_literal" => return true,
            "source_file" => return false,
            _ => current = parent.parent(),
        }
    }
    false
}
