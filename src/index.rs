//! The authoritative in-memory symbol store.
//!
//! Single-writer, multi-reader: mutation takes the exclusive lock and
//! publishes whole batches in one commit; queries take the shared lock and
//! always observe a consistent state.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::types::{FileSummary, ProjectTreeNode, SymbolInfo, SymbolKind};

/// Result cap applied when a search caller does not pass its own limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

const DOCSTRING_EXCERPT_CHARS: usize = 80;

// ---------------------------------------------------------------------------
// Batch types
// ---------------------------------------------------------------------------

/// One mutation inside a committed batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchItem {
    Upsert(FileSummary),
    Delete(String),
}

impl BatchItem {
    pub fn path(&self) -> &str {
        match self {
            BatchItem::Upsert(s) => &s.path,
            BatchItem::Delete(p) => p,
        }
    }
}

/// Paths a committed batch actually touched, alphabetical.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedBatch {
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

impl AppliedBatch {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub symbol_name: String,
    pub kind: SymbolKind,
    pub lineno: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring_excerpt: Option<String>,
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

pub struct SymbolIndex {
    files: RwLock<BTreeMap<String, FileSummary>>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        SymbolIndex { files: RwLock::new(BTreeMap::new()) }
    }

    /// Atomically swap the entire content (full-scan commit).
    pub fn replace_all(&self, summaries: Vec<FileSummary>) {
        let map: BTreeMap<String, FileSummary> =
            summaries.into_iter().map(|s| (s.path.clone(), s)).collect();
        *self.files.write().unwrap() = map;
    }

    /// Apply a batch in one commit, in deterministic (alphabetical) order.
    ///
    /// Deleting a path also removes anything indexed beneath it, so a
    /// directory removal reported as a single event clears its subtree.
    pub fn apply_batch(&self, mut items: Vec<BatchItem>) -> AppliedBatch {
        items.sort_by(|a, b| a.path().cmp(b.path()));

        let mut applied = AppliedBatch::default();
        let mut files = self.files.write().unwrap();
        for item in items {
            match item {
                BatchItem::Upsert(summary) => {
                    applied.updated.push(summary.path.clone());
                    files.insert(summary.path.clone(), summary);
                }
                BatchItem::Delete(path) => {
                    let mut removed = false;
                    if files.remove(&path).is_some() {
                        removed = true;
                    }
                    let prefix = format!("{path}/");
                    let nested: Vec<String> = files
                        .range(prefix.clone()..)
                        .take_while(|(p, _)| p.starts_with(&prefix))
                        .map(|(p, _)| p.clone())
                        .collect();
                    for p in nested {
                        files.remove(&p);
                        applied.deleted.push(p);
                        removed = true;
                    }
                    if removed {
                        applied.deleted.push(path);
                    }
                }
            }
        }
        applied.deleted.sort();
        applied
    }

    pub fn file(&self, path: &str) -> Option<FileSummary> {
        self.files.read().unwrap().get(path).cloned()
    }

    /// Stored content hash for a path, for no-op change detection.
    pub fn content_hash(&self, path: &str) -> Option<String> {
        self.files.read().unwrap().get(path).map(|s| s.content_hash.clone())
    }

    pub fn file_count(&self) -> usize {
        self.files.read().unwrap().len()
    }

    pub fn symbol_count(&self) -> usize {
        self.files.read().unwrap().values().map(|s| s.symbols.len()).sum()
    }

    /// All summaries in path order (the snapshot body).
    pub fn all_summaries(&self) -> Vec<FileSummary> {
        self.files.read().unwrap().values().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Tree
    // -----------------------------------------------------------------------

    /// Hierarchical view rooted at `""`. Directory children are sorted
    /// directories-first, then files, each alphabetically (case-insensitive).
    pub fn tree(&self) -> ProjectTreeNode {
        #[derive(Default)]
        struct DirBuilder {
            dirs: BTreeMap<String, DirBuilder>,
            files: Vec<(String, String, Vec<SymbolInfo>)>,
        }

        fn build(name: String, path: String, node: DirBuilder) -> ProjectTreeNode {
            let mut dirs: Vec<ProjectTreeNode> = node
                .dirs
                .into_iter()
                .map(|(child_name, child)| {
                    let child_path = if path.is_empty() {
                        child_name.clone()
                    } else {
                        format!("{path}/{child_name}")
                    };
                    build(child_name, child_path, child)
                })
                .collect();
            dirs.sort_by_key(|n| n.name.to_lowercase());

            let mut files: Vec<ProjectTreeNode> = node
                .files
                .into_iter()
                .map(|(file_name, file_path, symbols)| ProjectTreeNode {
                    name: file_name,
                    path: file_path,
                    is_dir: false,
                    children: None,
                    symbols: Some(symbols),
                })
                .collect();
            files.sort_by_key(|n| n.name.to_lowercase());

            dirs.extend(files);
            ProjectTreeNode { name, path, is_dir: true, children: Some(dirs), symbols: None }
        }

        let mut root = DirBuilder::default();
        {
            let files = self.files.read().unwrap();
            for (path, summary) in files.iter() {
                let mut parts: Vec<&str> = path.split('/').collect();
                let file_name = parts.pop().unwrap_or_default().to_string();
                let mut node = &mut root;
                for part in parts {
                    node = node.dirs.entry(part.to_string()).or_default();
                }
                node.files.push((file_name, path.clone(), summary.symbols.clone()));
            }
        }

        build(String::new(), String::new(), root)
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Ranked symbol search: exact case-insensitive name matches first, then
    /// substring matches; ties broken by shorter path, then path order.
    pub fn search(&self, term: &str, limit: Option<usize>) -> Vec<SearchHit> {
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let term_lower = term.to_lowercase();
        if term_lower.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<(u8, SearchHit)> = Vec::new();
        {
            let files = self.files.read().unwrap();
            for (path, summary) in files.iter() {
                for sym in &summary.symbols {
                    let name_lower = sym.name.to_lowercase();
                    let rank = if name_lower == term_lower {
                        0
                    } else if name_lower.contains(&term_lower) {
                        1
                    } else {
                        continue;
                    };
                    ranked.push((
                        rank,
                        SearchHit {
                            path: path.clone(),
                            symbol_name: sym.name.clone(),
                            kind: sym.kind,
                            lineno: sym.lineno,
                            docstring_excerpt: sym
                                .docstring
                                .as_ref()
                                .map(|d| d.chars().take(DOCSTRING_EXCERPT_CHARS).collect()),
                        },
                    ));
                }
            }
        }

        ranked.sort_by(|(rank_a, a), (rank_b, b)| {
            rank_a
                .cmp(rank_b)
                .then_with(|| a.path.len().cmp(&b.path.len()))
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.lineno.cmp(&b.lineno))
        });
        ranked.truncate(limit);
        ranked.into_iter().map(|(_, hit)| hit).collect()
    }
}

impl Default for SymbolIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn summary(path: &str, symbols: Vec<SymbolInfo>) -> FileSummary {
        FileSummary {
            path: path.to_string(),
            language: "python".to_string(),
            modified_at: Utc::now(),
            content_hash: format!("hash-{path}"),
            symbols,
            errors: Vec::new(),
        }
    }

    fn sym(name: &str, kind: SymbolKind, lineno: usize) -> SymbolInfo {
        SymbolInfo { name: name.to_string(), kind, parent: None, lineno, docstring: None }
    }

    #[test]
    fn test_replace_all_and_file_lookup() {
        let index = SymbolIndex::new();
        index.replace_all(vec![summary("src/a.py", vec![sym("f", SymbolKind::Function, 1)])]);
        assert_eq!(index.file_count(), 1);
        assert_eq!(index.symbol_count(), 1);
        assert!(index.file("src/a.py").is_some());
        assert!(index.file("src/missing.py").is_none());
    }

    #[test]
    fn test_tree_ordering_dirs_first_case_insensitive() {
        let index = SymbolIndex::new();
        index.replace_all(vec![
            summary("zeta.py", vec![]),
            summary("Alpha.py", vec![]),
            summary("src/b.py", vec![]),
            summary("Lib/a.py", vec![]),
        ]);

        let tree = index.tree();
        assert_eq!(tree.path, "");
        assert!(tree.is_dir);
        let children = tree.children.unwrap();
        let names: Vec<&str> = children.iter().map(|n| n.name.as_str()).collect();
        // Directories first (Lib, src), then files (Alpha.py, zeta.py).
        assert_eq!(names, vec!["Lib", "src", "Alpha.py", "zeta.py"]);
        assert!(children[0].is_dir);
        assert!(!children[2].is_dir);
        assert_eq!(children[2].path, "Alpha.py");
    }

    #[test]
    fn test_tree_has_exactly_one_node_per_file() {
        let index = SymbolIndex::new();
        index.replace_all(vec![summary("a/b/c.py", vec![]), summary("a/b/d.py", vec![])]);
        let tree = index.tree();
        let a = &tree.children.unwrap()[0];
        let b = &a.children.as_ref().unwrap()[0];
        let files = b.children.as_ref().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "a/b/c.py");
        assert_eq!(files[1].path, "a/b/d.py");
    }

    #[test]
    fn test_apply_batch_is_idempotent() {
        let index = SymbolIndex::new();
        let batch = vec![
            BatchItem::Upsert(summary("src/a.py", vec![sym("f", SymbolKind::Function, 1)])),
            BatchItem::Delete("src/old.py".to_string()),
        ];
        index.replace_all(vec![summary("src/old.py", vec![])]);

        let first = index.apply_batch(batch.clone());
        let state_one = index.all_summaries();
        let second = index.apply_batch(batch);
        let state_two = index.all_summaries();

        assert_eq!(state_one, state_two);
        assert_eq!(first.updated, vec!["src/a.py"]);
        assert_eq!(first.deleted, vec!["src/old.py"]);
        // Second application deletes nothing (already gone) but converges.
        assert_eq!(second.updated, vec!["src/a.py"]);
        assert!(second.deleted.is_empty());
    }

    #[test]
    fn test_delete_removes_subtree() {
        let index = SymbolIndex::new();
        index.replace_all(vec![
            summary("pkg/a.py", vec![]),
            summary("pkg/sub/b.py", vec![]),
            summary("other.py", vec![]),
        ]);
        let applied = index.apply_batch(vec![BatchItem::Delete("pkg".to_string())]);
        assert_eq!(applied.deleted, vec!["pkg", "pkg/a.py", "pkg/sub/b.py"]);
        assert_eq!(index.file_count(), 1);
    }

    #[test]
    fn test_search_ranking() {
        let index = SymbolIndex::new();
        index.replace_all(vec![
            summary("deep/nested/dir/m.py", vec![sym("config", SymbolKind::Function, 1)]),
            summary("a.py", vec![sym("config", SymbolKind::Function, 5)]),
            summary("b.py", vec![sym("config_loader", SymbolKind::Class, 2)]),
        ]);

        let hits = index.search("Config", None);
        assert_eq!(hits.len(), 3);
        // Exact matches first; among those, shorter path wins.
        assert_eq!(hits[0].path, "a.py");
        assert_eq!(hits[1].path, "deep/nested/dir/m.py");
        // Substring match last.
        assert_eq!(hits[2].symbol_name, "config_loader");
    }

    #[test]
    fn test_search_respects_limit() {
        let index = SymbolIndex::new();
        index.replace_all(vec![summary(
            "a.py",
            (1..=10).map(|i| sym(&format!("handler_{i}"), SymbolKind::Function, i)).collect(),
        )]);
        assert_eq!(index.search("handler", Some(3)).len(), 3);
    }

    #[test]
    fn test_search_excerpts_docstring() {
        let index = SymbolIndex::new();
        let mut s = sym("f", SymbolKind::Function, 1);
        s.docstring = Some("x".repeat(200));
        index.replace_all(vec![summary("a.py", vec![s])]);
        let hits = index.search("f", None);
        assert_eq!(hits[0].docstring_excerpt.as_ref().unwrap().len(), 80);
    }
}
