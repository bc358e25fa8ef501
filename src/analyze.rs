//! Language analyzers: one file's bytes in, a normalized `FileSummary` out.
//!
//! Each analyzer is a pure `text -> symbols` function so parsing is trivially
//! parallelizable and unit-testable. Analyzers never raise out of `parse`;
//! failure is a `FileIssue` in the returned summary and the pipeline stays
//! total.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::warn;
use tree_sitter::{Language, Node, Parser};

use crate::types::{ext_of, FileIssue, FileSummary, SymbolInfo, SymbolKind, MAX_FILE_READ};

/// Soft per-file parse budget. On expiry the summary carries a timeout issue
/// and no symbols.
const PARSE_TIMEOUT_MICROS: u64 = 2_000_000;

/// Options threaded from settings into every parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    pub include_docstrings: bool,
}

// ---------------------------------------------------------------------------
// Analyzer trait and registry
// ---------------------------------------------------------------------------

/// Converts one file's decoded text into symbols and issues.
pub trait Analyzer: Send + Sync {
    /// Opaque language tag recorded on summaries this analyzer produces.
    fn language(&self, rel_path: &str) -> &'static str;

    /// Does this analyzer handle the given path?
    fn supports(&self, rel_path: &str) -> bool;

    /// Extract top-level symbols. Never panics and never errors out; problems
    /// are returned as issues.
    fn parse(
        &self,
        rel_path: &str,
        source: &str,
        opts: &ParseOptions,
    ) -> (Vec<SymbolInfo>, Vec<FileIssue>);
}

/// Extension-dispatched analyzer set.
pub struct AnalyzerRegistry {
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    /// The default set: Python, JS/TS, and a permissive markup fallback.
    pub fn with_defaults() -> Self {
        AnalyzerRegistry {
            analyzers: vec![
                Box::new(PythonAnalyzer),
                Box::new(ScriptAnalyzer),
                Box::new(MarkupAnalyzer::new()),
            ],
        }
    }

    /// First analyzer claiming the path, or `None` for "known but not parsed".
    pub fn for_path(&self, rel_path: &str) -> Option<&dyn Analyzer> {
        self.analyzers.iter().find(|a| a.supports(rel_path)).map(|a| a.as_ref())
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ---------------------------------------------------------------------------
// File-level entry point
// ---------------------------------------------------------------------------

/// Read, hash, decode, and parse one file into its summary.
///
/// Every failure mode short of "the path cannot be stat'ed at all" still
/// registers the file: oversized and unreadable files get an issue and an
/// empty symbol list, unknown extensions get the `plain` tag.
pub fn summarize_file(
    registry: &AnalyzerRegistry,
    root: &Path,
    rel_path: &str,
    opts: &ParseOptions,
) -> FileSummary {
    let abs = root.join(rel_path);
    let language = registry.for_path(rel_path).map(|a| a.language(rel_path)).unwrap_or("plain");

    let meta = match fs::metadata(&abs) {
        Ok(m) => m,
        Err(e) => return read_error_summary(rel_path, language, e),
    };
    let modified_at = mtime_utc(&meta);

    if meta.len() as usize > MAX_FILE_READ {
        let content_hash = hash_file(&abs).unwrap_or_default();
        return FileSummary {
            path: rel_path.to_string(),
            language: language.to_string(),
            modified_at,
            content_hash,
            symbols: Vec::new(),
            errors: vec![FileIssue::new(format!(
                "file exceeds {MAX_FILE_READ} byte parse limit ({} bytes)",
                meta.len()
            ))],
        };
    }

    let bytes = match fs::read(&abs) {
        Ok(b) => b,
        Err(e) => return read_error_summary(rel_path, language, e),
    };
    let content_hash = hash_bytes(&bytes);

    let (text, had_invalid_utf8) = decode_lossy(&bytes);
    let mut errors = Vec::new();
    if had_invalid_utf8 {
        errors.push(FileIssue::new("file contains invalid UTF-8; decoded lossily"));
    }

    let symbols = match registry.for_path(rel_path) {
        None => Vec::new(),
        Some(analyzer) => {
            let (symbols, parse_errors) = analyzer.parse(rel_path, &text, opts);
            errors.extend(parse_errors);
            symbols
        }
    };

    FileSummary {
        path: rel_path.to_string(),
        language: language.to_string(),
        modified_at,
        content_hash,
        symbols,
        errors,
    }
}

fn read_error_summary(rel_path: &str, language: &str, e: std::io::Error) -> FileSummary {
    FileSummary {
        path: rel_path.to_string(),
        language: language.to_string(),
        modified_at: Utc::now(),
        content_hash: String::new(),
        symbols: Vec::new(),
        errors: vec![FileIssue::new(format!("failed to read file: {e}"))],
    }
}

fn mtime_utc(meta: &fs::Metadata) -> DateTime<Utc> {
    meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now())
}

/// Lossy UTF-8 decode. The boolean reports whether any replacement occurred.
fn decode_lossy(bytes: &[u8]) -> (String, bool) {
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(s) => (s.to_string(), false),
        Cow::Owned(s) => (s, true),
    }
}

// ---------------------------------------------------------------------------
// Content hashing
// ---------------------------------------------------------------------------

/// SHA-256 of a byte slice, lowercase hex.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Streaming SHA-256 of a file's contents; avoids loading oversized files.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::with_capacity(8192, file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Shared tree-sitter helpers
// ---------------------------------------------------------------------------

fn new_parser(lang: &Language) -> Option<Parser> {
    let mut parser = Parser::new();
    if let Err(e) = parser.set_language(lang) {
        warn!(error = %e, "tree-sitter language version mismatch");
        return None;
    }
    #[allow(deprecated)]
    parser.set_timeout_micros(PARSE_TIMEOUT_MICROS);
    Some(parser)
}

fn node_text<'a>(node: &Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn field_text(node: &Node, field: &str, source: &str) -> Option<String> {
    let name = node.child_by_field_name(field)?;
    let text = node_text(&name, source).trim();
    if text.is_empty() { None } else { Some(text.to_string()) }
}

/// 1-based line of the first ERROR or MISSING node, depth-first.
fn first_error_line(node: &Node) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(line) = first_error_line(&child) {
            return Some(line);
        }
    }
    None
}

/// Strip NULs, trim, and keep the first paragraph.
fn normalize_docstring(raw: &str) -> Option<String> {
    let cleaned = raw.replace('\u{0}', "").replace("\r\n", "\n");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return None;
    }
    let first_paragraph = trimmed.split("\n\n").next().unwrap_or(trimmed);
    Some(first_paragraph.trim().to_string())
}

fn sort_symbols(symbols: &mut [SymbolInfo]) {
    symbols.sort_by(|a, b| a.lineno.cmp(&b.lineno).then_with(|| a.name.cmp(&b.name)));
}

// ---------------------------------------------------------------------------
// Python analyzer
// ---------------------------------------------------------------------------

/// Structured analyzer for Python: module-level classes and functions, direct
/// class-body methods, optional docstrings. Nested functions are ignored.
pub struct PythonAnalyzer;

impl PythonAnalyzer {
    fn collect_module(&self, root: &Node, source: &str, opts: &ParseOptions, out: &mut Vec<SymbolInfo>) {
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match unwrap_decorated(&child) {
                Some(def) if def.kind() == "class_definition" => {
                    self.collect_class(&def, source, opts, out);
                }
                Some(def) if def.kind() == "function_definition" => {
                    if let Some(name) = field_text(&def, "name", source) {
                        out.push(SymbolInfo {
                            name,
                            kind: SymbolKind::Function,
                            parent: None,
                            lineno: def.start_position().row + 1,
                            docstring: python_docstring(&def, source, opts),
                        });
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_class(&self, class: &Node, source: &str, opts: &ParseOptions, out: &mut Vec<SymbolInfo>) {
        let Some(class_name) = field_text(class, "name", source) else { return };
        out.push(SymbolInfo {
            name: class_name.clone(),
            kind: SymbolKind::Class,
            parent: None,
            lineno: class.start_position().row + 1,
            docstring: python_docstring(class, source, opts),
        });

        // Only direct children of the class body count as methods.
        let Some(body) = class.child_by_field_name("body") else { return };
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            if let Some(def) = unwrap_decorated(&child) {
                if def.kind() == "function_definition" {
                    if let Some(name) = field_text(&def, "name", source) {
                        out.push(SymbolInfo {
                            name,
                            kind: SymbolKind::Method,
                            parent: Some(class_name.clone()),
                            lineno: def.start_position().row + 1,
                            docstring: python_docstring(&def, source, opts),
                        });
                    }
                }
            }
        }
    }
}

/// Unwrap `decorated_definition` to the definition it wraps; the declaration
/// line is the `def`/`class` keyword line, not the decorator's.
fn unwrap_decorated<'t>(node: &Node<'t>) -> Option<Node<'t>> {
    match node.kind() {
        "decorated_definition" => node.child_by_field_name("definition"),
        "class_definition" | "function_definition" => Some(*node),
        _ => None,
    }
}

/// First leading string literal of a definition body, normalized.
fn python_docstring(def: &Node, source: &str, opts: &ParseOptions) -> Option<String> {
    if !opts.include_docstrings {
        return None;
    }
    let body = def.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let mut content = String::new();
    let mut cursor = string.walk();
    for part in string.named_children(&mut cursor) {
        if part.kind() == "string_content" {
            content.push_str(node_text(&part, source));
        }
    }
    normalize_docstring(&content)
}

impl Analyzer for PythonAnalyzer {
    fn language(&self, _rel_path: &str) -> &'static str {
        "python"
    }

    fn supports(&self, rel_path: &str) -> bool {
        matches!(ext_of(rel_path).to_lowercase().as_str(), "py" | "pyi")
    }

    fn parse(
        &self,
        _rel_path: &str,
        source: &str,
        opts: &ParseOptions,
    ) -> (Vec<SymbolInfo>, Vec<FileIssue>) {
        let lang: Language = tree_sitter_python::LANGUAGE.into();
        let Some(mut parser) = new_parser(&lang) else {
            return (Vec::new(), vec![FileIssue::new("python parser unavailable")]);
        };
        let Some(tree) = parser.parse(source, None) else {
            return (Vec::new(), vec![FileIssue::new("parse timed out")]);
        };
        let root = tree.root_node();
        if root.has_error() {
            let lineno = first_error_line(&root).unwrap_or(1);
            return (Vec::new(), vec![FileIssue::at("syntax error", lineno)]);
        }

        let mut symbols = Vec::new();
        self.collect_module(&root, source, opts, &mut symbols);
        sort_symbols(&mut symbols);
        (symbols, Vec::new())
    }
}

// ---------------------------------------------------------------------------
// JS / TS analyzer
// ---------------------------------------------------------------------------

/// Structured analyzer for the JS/TS family: top-level functions and classes,
/// direct class-body methods. Docstrings are never extracted here — a JS
/// directive prologue (`"use strict"`) would satisfy the leading-string rule
/// spuriously.
pub struct ScriptAnalyzer;

impl ScriptAnalyzer {
    fn collect_program(&self, root: &Node, source: &str, out: &mut Vec<SymbolInfo>) {
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            // `export function f() {}` wraps the declaration.
            let decl = if child.kind() == "export_statement" {
                match child.child_by_field_name("declaration") {
                    Some(d) => d,
                    None => continue,
                }
            } else {
                child
            };
            self.collect_declaration(&decl, source, out);
        }
    }

    fn collect_declaration(&self, decl: &Node, source: &str, out: &mut Vec<SymbolInfo>) {
        match decl.kind() {
            "function_declaration" | "generator_function_declaration" => {
                if let Some(name) = field_text(decl, "name", source) {
                    out.push(SymbolInfo {
                        name,
                        kind: SymbolKind::Function,
                        parent: None,
                        lineno: decl.start_position().row + 1,
                        docstring: None,
                    });
                }
            }
            "class_declaration" | "abstract_class_declaration" => {
                self.collect_class(decl, source, out);
            }
            _ => {}
        }
    }

    fn collect_class(&self, class: &Node, source: &str, out: &mut Vec<SymbolInfo>) {
        let Some(class_name) = field_text(class, "name", source) else { return };
        out.push(SymbolInfo {
            name: class_name.clone(),
            kind: SymbolKind::Class,
            parent: None,
            lineno: class.start_position().row + 1,
            docstring: None,
        });
        let Some(body) = class.child_by_field_name("body") else { return };
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            if member.kind() == "method_definition" {
                if let Some(name) = field_text(&member, "name", source) {
                    out.push(SymbolInfo {
                        name,
                        kind: SymbolKind::Method,
                        parent: Some(class_name.clone()),
                        lineno: member.start_position().row + 1,
                        docstring: None,
                    });
                }
            }
        }
    }
}

impl Analyzer for ScriptAnalyzer {
    fn language(&self, rel_path: &str) -> &'static str {
        match ext_of(rel_path).to_lowercase().as_str() {
            "ts" | "tsx" => "typescript",
            _ => "javascript",
        }
    }

    fn supports(&self, rel_path: &str) -> bool {
        matches!(
            ext_of(rel_path).to_lowercase().as_str(),
            "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx"
        )
    }

    fn parse(
        &self,
        rel_path: &str,
        source: &str,
        _opts: &ParseOptions,
    ) -> (Vec<SymbolInfo>, Vec<FileIssue>) {
        let lang: Language = match ext_of(rel_path).to_lowercase().as_str() {
            "ts" => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            "tsx" => tree_sitter_typescript::LANGUAGE_TSX.into(),
            _ => tree_sitter_javascript::LANGUAGE.into(),
        };
        let Some(mut parser) = new_parser(&lang) else {
            return (Vec::new(), vec![FileIssue::new("javascript parser unavailable")]);
        };
        let Some(tree) = parser.parse(source, None) else {
            return (Vec::new(), vec![FileIssue::new("parse timed out")]);
        };
        let root = tree.root_node();
        if root.has_error() {
            let lineno = first_error_line(&root).unwrap_or(1);
            return (Vec::new(), vec![FileIssue::at("syntax error", lineno)]);
        }

        let mut symbols = Vec::new();
        self.collect_program(&root, source, &mut symbols);
        sort_symbols(&mut symbols);
        (symbols, Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Markup fallback analyzer
// ---------------------------------------------------------------------------

/// Permissive regex fallback for HTML and other markup: picks up script-block
/// function and class declarations without a real parse.
pub struct MarkupAnalyzer {
    function_re: regex::Regex,
    class_re: regex::Regex,
}

impl MarkupAnalyzer {
    pub fn new() -> Self {
        MarkupAnalyzer {
            function_re: regex::Regex::new(r"(?:^|\s)(?:async\s+)?function\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*\(")
                .unwrap(),
            class_re: regex::Regex::new(r"(?:^|\s)class\s+([A-Za-z_$][A-Za-z0-9_$]*)[\s{]").unwrap(),
        }
    }
}

impl Default for MarkupAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer for MarkupAnalyzer {
    fn language(&self, _rel_path: &str) -> &'static str {
        "html"
    }

    fn supports(&self, rel_path: &str) -> bool {
        matches!(ext_of(rel_path).to_lowercase().as_str(), "html" | "htm" | "xhtml" | "vue" | "svelte")
    }

    fn parse(
        &self,
        _rel_path: &str,
        source: &str,
        _opts: &ParseOptions,
    ) -> (Vec<SymbolInfo>, Vec<FileIssue>) {
        let mut symbols = Vec::new();
        for (i, line) in source.lines().enumerate() {
            for cap in self.function_re.captures_iter(line) {
                symbols.push(SymbolInfo {
                    name: cap[1].to_string(),
                    kind: SymbolKind::Function,
                    parent: None,
                    lineno: i + 1,
                    docstring: None,
                });
            }
            for cap in self.class_re.captures_iter(line) {
                symbols.push(SymbolInfo {
                    name: cap[1].to_string(),
                    kind: SymbolKind::Class,
                    parent: None,
                    lineno: i + 1,
                    docstring: None,
                });
            }
        }
        sort_symbols(&mut symbols);
        (symbols, Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_py(src: &str, include_docstrings: bool) -> (Vec<SymbolInfo>, Vec<FileIssue>) {
        PythonAnalyzer.parse("src/a.py", src, &ParseOptions { include_docstrings })
    }

    #[test]
    fn test_python_class_method_function() {
        let src = "class A:\n    def m(self):\n        \"\"\"d\"\"\"\n        pass\n\ndef f():\n    pass\n";
        let (symbols, errors) = parse_py(src, true);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(symbols.len(), 3);

        assert_eq!(symbols[0].name, "A");
        assert_eq!(symbols[0].kind, SymbolKind::Class);
        assert_eq!(symbols[0].lineno, 1);

        assert_eq!(symbols[1].name, "m");
        assert_eq!(symbols[1].kind, SymbolKind::Method);
        assert_eq!(symbols[1].parent.as_deref(), Some("A"));
        assert_eq!(symbols[1].lineno, 2);
        assert_eq!(symbols[1].docstring.as_deref(), Some("d"));

        assert_eq!(symbols[2].name, "f");
        assert_eq!(symbols[2].kind, SymbolKind::Function);
        assert_eq!(symbols[2].lineno, 6);
    }

    #[test]
    fn test_python_syntax_error_reports_line() {
        let (symbols, errors) = parse_py("def broken(:\n", true);
        assert!(symbols.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].lineno, Some(1));
    }

    #[test]
    fn test_python_docstrings_toggled_off() {
        let src = "def f():\n    \"\"\"doc\"\"\"\n    pass\n";
        let (symbols, _) = parse_py(src, false);
        assert_eq!(symbols.len(), 1);
        assert!(symbols[0].docstring.is_none());
    }

    #[test]
    fn test_python_nested_functions_ignored() {
        let src = "def outer():\n    def inner():\n        pass\n\nclass C:\n    def m(self):\n        def helper():\n            pass\n";
        let (symbols, _) = parse_py(src, true);
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["outer", "C", "m"]);
    }

    #[test]
    fn test_python_decorated_lineno_is_def_keyword() {
        let src = "@decorator\ndef f():\n    pass\n\nclass C:\n    @property\n    def p(self):\n        pass\n";
        let (symbols, _) = parse_py(src, true);
        let f = symbols.iter().find(|s| s.name == "f").unwrap();
        assert_eq!(f.lineno, 2);
        let p = symbols.iter().find(|s| s.name == "p").unwrap();
        assert_eq!(p.kind, SymbolKind::Method);
        assert_eq!(p.lineno, 7);
    }

    #[test]
    fn test_python_docstring_first_paragraph_only() {
        let src = "def f():\n    \"\"\"Summary line.\n\n    Long description that should\n    not be kept.\n    \"\"\"\n    pass\n";
        let (symbols, _) = parse_py(src, true);
        assert_eq!(symbols[0].docstring.as_deref(), Some("Summary line."));
    }

    #[test]
    fn test_python_every_method_has_class_parent() {
        let src = "class A:\n    def m1(self): pass\n    def m2(self): pass\n\nclass B:\n    def m3(self): pass\n";
        let (symbols, _) = parse_py(src, true);
        let class_names: Vec<&str> = symbols
            .iter()
            .filter(|s| s.kind == SymbolKind::Class)
            .map(|s| s.name.as_str())
            .collect();
        for sym in symbols.iter().filter(|s| s.kind == SymbolKind::Method) {
            let parent = sym.parent.as_deref().expect("method without parent");
            assert!(class_names.contains(&parent), "parent {parent} is not a class in the file");
        }
    }

    #[test]
    fn test_javascript_classes_and_methods() {
        let src = "export function formatName(name) {\n  return name.trim();\n}\n\nclass App {\n  constructor(config) {\n    this.config = config;\n  }\n\n  getName() {\n    return this.config.title;\n  }\n}\n";
        let (symbols, errors) =
            ScriptAnalyzer.parse("src/app.js", src, &ParseOptions::default());
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["formatName", "App", "constructor", "getName"]);
        assert_eq!(symbols[0].kind, SymbolKind::Function);
        assert_eq!(symbols[1].kind, SymbolKind::Class);
        assert_eq!(symbols[2].kind, SymbolKind::Method);
        assert_eq!(symbols[2].parent.as_deref(), Some("App"));
    }

    #[test]
    fn test_typescript_parses_annotations() {
        let src = "export class Store {\n  items: string[] = [];\n\n  add(item: string): void {\n    this.items.push(item);\n  }\n}\n\nfunction helper(n: number): number {\n  return n * 2;\n}\n";
        let (symbols, errors) =
            ScriptAnalyzer.parse("src/store.ts", src, &ParseOptions::default());
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Store", "add", "helper"]);
    }

    #[test]
    fn test_markup_fallback_finds_script_declarations() {
        let src = "<html>\n<body>\n<script>\nfunction init() {}\nclass Widget {\n}\n</script>\n</body>\n</html>\n";
        let (symbols, errors) =
            MarkupAnalyzer::new().parse("index.html", src, &ParseOptions::default());
        assert!(errors.is_empty());
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["init", "Widget"]);
        assert_eq!(symbols[0].lineno, 4);
        assert_eq!(symbols[1].lineno, 5);
    }

    #[test]
    fn test_registry_dispatch() {
        let registry = AnalyzerRegistry::with_defaults();
        assert_eq!(registry.for_path("a.py").unwrap().language("a.py"), "python");
        assert_eq!(registry.for_path("a.ts").unwrap().language("a.ts"), "typescript");
        assert_eq!(registry.for_path("a.jsx").unwrap().language("a.jsx"), "javascript");
        assert_eq!(registry.for_path("a.html").unwrap().language("a.html"), "html");
        assert!(registry.for_path("a.rs").is_none());
        assert!(registry.for_path("Makefile").is_none());
    }

    #[test]
    fn test_hash_bytes_stable() {
        let h1 = hash_bytes(b"hello world");
        let h2 = hash_bytes(b"hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, hash_bytes(b"hello"));
    }

    #[test]
    fn test_normalize_docstring() {
        assert_eq!(normalize_docstring("  d  "), Some("d".to_string()));
        assert_eq!(normalize_docstring("a\n\nb"), Some("a".to_string()));
        assert_eq!(normalize_docstring("nul\u{0}byte"), Some("nulbyte".to_string()));
        assert_eq!(normalize_docstring("   "), None);
    }

    #[test]
    fn test_decode_lossy_flags_replacement() {
        let (text, lossy) = decode_lossy(b"ok");
        assert_eq!(text, "ok");
        assert!(!lossy);
        let (_, lossy) = decode_lossy(&[0x66, 0xFF, 0x6F]);
        assert!(lossy);
    }

    #[test]
    fn test_summarize_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "def f():\n    pass\n").unwrap();
        let registry = AnalyzerRegistry::with_defaults();
        let opts = ParseOptions { include_docstrings: true };

        let summary = summarize_file(&registry, dir.path(), "src/a.py", &opts);
        assert_eq!(summary.path, "src/a.py");
        assert_eq!(summary.language, "python");
        assert_eq!(summary.symbols.len(), 1);
        assert_eq!(summary.content_hash, hash_bytes(b"def f():\n    pass\n"));
        assert!(summary.errors.is_empty());
    }

    #[test]
    fn test_summarize_unknown_extension_is_tracked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "just text").unwrap();
        let registry = AnalyzerRegistry::with_defaults();

        let summary =
            summarize_file(&registry, dir.path(), "notes.txt", &ParseOptions::default());
        assert_eq!(summary.language, "plain");
        assert!(summary.symbols.is_empty());
        assert!(summary.errors.is_empty());
    }

    #[test]
    fn test_summarize_missing_file_registers_issue() {
        let dir = tempfile::tempdir().unwrap();
        let registry = AnalyzerRegistry::with_defaults();
        let summary = summarize_file(&registry, dir.path(), "gone.py", &ParseOptions::default());
        assert!(summary.symbols.is_empty());
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].message.contains("failed to read file"));
    }
}
