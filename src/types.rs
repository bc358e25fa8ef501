use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum file size (in bytes) that will be read and parsed.
pub const MAX_FILE_READ: usize = 512 * 1024;

/// Directory under the root reserved for our own metadata. Always excluded
/// from scanning.
pub const METADATA_DIR: &str = ".code-map";

/// Snapshot file name inside [`METADATA_DIR`].
pub const SNAPSHOT_FILE: &str = "code-map.json";

/// Settings file name inside [`METADATA_DIR`].
pub const SETTINGS_FILE: &str = "settings.json";

// ---------------------------------------------------------------------------
// Symbols
// ---------------------------------------------------------------------------

/// The kind of a top-level declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Class,
    Function,
    Method,
}

impl SymbolKind {
    pub fn label(&self) -> &'static str {
        match self {
            SymbolKind::Class => "class",
            SymbolKind::Function => "function",
            SymbolKind::Method => "method",
        }
    }
}

/// One declaration found in a file.
///
/// `parent` is the enclosing class name when `kind` is a method; `docstring`
/// is retained only when docstring extraction is enabled. Both keys are
/// omitted from serialized output when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: SymbolKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// 1-based line of the declaration keyword.
    pub lineno: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
}

/// A parse problem. Its presence never prevents a [`FileSummary`] from
/// existing; a malformed file yields an empty symbol list plus issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIssue {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<usize>,
}

impl FileIssue {
    pub fn new(message: impl Into<String>) -> Self {
        FileIssue { message: message.into(), lineno: None }
    }

    pub fn at(message: impl Into<String>, lineno: usize) -> Self {
        FileIssue { message: message.into(), lineno: Some(lineno) }
    }
}

/// The unit of indexing: everything we know about one file.
///
/// Field order is the serialized key order of the snapshot format — keep it
/// stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    /// Root-relative, forward-slash normalized.
    pub path: String,
    /// Opaque tag set by the analyzer that produced this summary.
    pub language: String,
    /// Source mtime, UTC.
    pub modified_at: DateTime<Utc>,
    /// Stable digest of the file bytes; used to skip re-parse on no-op events.
    pub content_hash: String,
    /// Ordered by `lineno` ascending, ties broken by `name`.
    pub symbols: Vec<SymbolInfo>,
    pub errors: Vec<FileIssue>,
}

impl FileSummary {
    /// Summary for a file no analyzer claims: tracked in the tree with zero
    /// symbols.
    pub fn unparsed(path: String, modified_at: DateTime<Utc>, content_hash: String) -> Self {
        FileSummary {
            path,
            language: "plain".to_string(),
            modified_at,
            content_hash,
            symbols: Vec::new(),
            errors: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Project tree
// ---------------------------------------------------------------------------

/// A directory or file node for the UI. Built on demand from the index, never
/// stored independently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectTreeNode {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<ProjectTreeNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<SymbolInfo>>,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Directory names skipped by default, on top of any user-configured set.
/// Dot-prefixed directory names are always skipped as well.
pub fn default_exclude_dirs() -> BTreeSet<String> {
    [
        ".git",
        "node_modules",
        "__pycache__",
        ".venv",
        "venv",
        "target",
        "dist",
        "build",
        ".next",
        "vendor",
        METADATA_DIR,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// User-facing configuration. `exclude_dirs` holds the user-configured tokens
/// only; the defaults are always added on top (see [`AppSettings::effective_excludes`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    pub root_path: PathBuf,
    pub exclude_dirs: BTreeSet<String>,
    pub include_docstrings: bool,
}

impl AppSettings {
    pub fn new(root_path: PathBuf) -> Self {
        AppSettings { root_path, exclude_dirs: BTreeSet::new(), include_docstrings: true }
    }

    /// Defaults ∪ user set, lowercased for case-insensitive comparison.
    pub fn effective_excludes(&self) -> BTreeSet<String> {
        default_exclude_dirs()
            .iter()
            .chain(self.exclude_dirs.iter())
            .map(|s| s.to_lowercase())
            .collect()
    }
}

/// A directory is skipped iff its name (not full path) matches the effective
/// exclusion set case-insensitively, or starts with a dot.
pub fn is_excluded_dir_name(name: &str, excludes: &BTreeSet<String>) -> bool {
    name.starts_with('.') || excludes.contains(&name.to_lowercase())
}

/// Whether any directory component of a relative path is excluded.
pub fn path_is_excluded(rel_path: &str, excludes: &BTreeSet<String>) -> bool {
    let mut components: Vec<&str> = rel_path.split('/').collect();
    components.pop(); // the final component is the file itself
    components.iter().any(|c| is_excluded_dir_name(c, excludes))
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Root-relative path with forward slashes, or `None` when `abs` is outside
/// the root.
pub fn rel_path_of(root: &Path, abs: &Path) -> Option<String> {
    let rel = abs.strip_prefix(root).ok()?;
    let s = rel.to_string_lossy().replace('\\', "/");
    if s.is_empty() { None } else { Some(s) }
}

/// File extension (no dot) of a relative path.
pub fn ext_of(rel_path: &str) -> &str {
    let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    file_name.rsplit_once('.').map(|(_, e)| e).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_serialization_omits_absent_keys() {
        let sym = SymbolInfo {
            name: "f".to_string(),
            kind: SymbolKind::Function,
            parent: None,
            lineno: 3,
            docstring: None,
        };
        let json = serde_json::to_string(&sym).unwrap();
        assert_eq!(json, r#"{"name":"f","kind":"function","lineno":3}"#);

        let method = SymbolInfo {
            name: "m".to_string(),
            kind: SymbolKind::Method,
            parent: Some("A".to_string()),
            lineno: 2,
            docstring: Some("d".to_string()),
        };
        let json = serde_json::to_string(&method).unwrap();
        assert_eq!(
            json,
            r#"{"name":"m","kind":"method","parent":"A","lineno":2,"docstring":"d"}"#
        );
    }

    #[test]
    fn test_exclusion_is_name_based_and_case_insensitive() {
        let excludes = AppSettings::new(PathBuf::from("/tmp")).effective_excludes();
        assert!(is_excluded_dir_name("node_modules", &excludes));
        assert!(is_excluded_dir_name("NODE_MODULES", &excludes));
        assert!(is_excluded_dir_name(".venv", &excludes));
        assert!(is_excluded_dir_name(".anything-hidden", &excludes));
        assert!(!is_excluded_dir_name("src", &excludes));

        assert!(path_is_excluded(".venv/lib/foo.py", &excludes));
        assert!(path_is_excluded("a/Target/b.py", &excludes));
        // Only directory components count — a file named like an exclude is fine.
        assert!(!path_is_excluded("src/target", &excludes));
    }

    #[test]
    fn test_ext_of() {
        assert_eq!(ext_of("src/a.py"), "py");
        assert_eq!(ext_of("Makefile"), "");
        assert_eq!(ext_of("a/b/c.spec.ts"), "ts");
    }
}
