//! Repository-level views: file tree, per-file symbol tables, a compact
//! `<repo_map>` for prompts and plain regex search.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::extractor::{Symbol, SymbolExtractor, SymbolKind};

const VCS_NAMES: [&str; 3] = [".git", ".hg", ".svn"];

/// Label for scans of the checked-out files.
pub(crate) const WORKTREE_REF: &str = "worktree";

/// One entry of [`RepoMapper::file_tree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// Path relative to the root, `/`-separated.
    pub path: String,
    pub is_dir: bool,
    /// Size in bytes; `None` for directories.
    pub size: Option<u64>,
}

/// A file the mapper could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    pub path: String,
    pub message: String,
}

/// Symbol table of one mapping pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoSymbols {
    pub files: BTreeMap<String, Vec<Symbol>>,
    pub warnings: Vec<ScanWarning>,
    pub files_scanned: usize,
    pub files_skipped: usize,
}

/// One line matched by [`RepoMapper::search_text`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMatch {
    pub path: String,
    /// 0-indexed.
    pub line: usize,
    pub text: String,
}

type CacheKey = (PathBuf, String);

/// Walks repositories and caches their symbol tables per `(root, ref)`.
pub struct RepoMapper {
    extractor: Arc<SymbolExtractor>,
    cache: RwLock<HashMap<CacheKey, Arc<RepoSymbols>>>,
}

impl std::fmt::Debug for RepoMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoMapper")
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

impl RepoMapper {
    #[must_use]
    pub fn new(extractor: Arc<SymbolExtractor>) -> Self {
        Self {
            extractor,
            cache: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn extractor(&self) -> &Arc<SymbolExtractor> {
        &self.extractor
    }

    /// Files and directories under `root`, depth-first, siblings sorted by name.
    ///
    /// Honors `.gitignore`/`.ignore` files, includes hidden entries and skips
    /// VCS metadata, whether `.git` is a directory or a worktree link file.
    /// `git_ref` only labels the scan; the caller checks out the revision.
    ///
    /// # Errors
    ///
    /// Returns an IO error if `root` is not a directory.
    pub fn file_tree(&self, root: &Path, git_ref: &str) -> Result<Vec<FileNode>> {
        self.walk_tree(root, git_ref).map(|(nodes, _)| nodes)
    }

    /// [`Self::file_tree`] plus one warning per entry the walk could not read.
    pub(crate) fn walk_tree(
        &self,
        root: &Path,
        git_ref: &str,
    ) -> Result<(Vec<FileNode>, Vec<ScanWarning>)> {
        if !root.is_dir() {
            return Err(IndexError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", root.display()),
            )));
        }

        let mut nodes = Vec::new();
        let mut warnings = Vec::new();
        for result in walker(root) {
            let entry = match result {
                Ok(entry) => entry,
                Err(e) => {
                    let path = walk_error_path(&e)
                        .map_or_else(|| ".".to_string(), |p| relative_path(root, p));
                    tracing::warn!(path = %path, error = %e, "skipping unreadable entry");
                    warnings.push(ScanWarning {
                        path,
                        message: IndexError::Walk(e).to_string(),
                    });
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            let size = if is_dir {
                None
            } else {
                entry.metadata().ok().map(|m| m.len())
            };
            nodes.push(FileNode {
                path: relative_path(root, entry.path()),
                is_dir,
                size,
            });
        }

        tracing::debug!(
            root = %root.display(),
            git_ref,
            entries = nodes.len(),
            unreadable = warnings.len(),
            "file tree"
        );
        Ok((nodes, warnings))
    }

    /// Symbols of one file. Unreadable, non-UTF-8 or unparsable files yield
    /// an empty list and a warning.
    #[must_use]
    pub fn symbols_for_file(&self, path: &Path) -> Vec<Symbol> {
        match self.try_symbols(path) {
            Ok(symbols) => symbols,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "symbol extraction skipped");
                Vec::new()
            }
        }
    }

    fn try_symbols(&self, path: &Path) -> Result<Vec<Symbol>> {
        let source = std::fs::read_to_string(path)?;
        self.extractor.extract_from_path(path, &source)
    }

    /// Cached symbol table for `(root, git_ref)`, built on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be walked. Per-file failures are
    /// reported as warnings inside the result.
    pub fn symbol_map(&self, root: &Path, git_ref: &str) -> Result<Arc<RepoSymbols>> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.get(&(root.to_path_buf(), git_ref.to_string())) {
                return Ok(Arc::clone(hit));
            }
        }
        self.refresh(root, git_ref)
    }

    /// Map `root` again and replace the cached entry.
    ///
    /// # Errors
    ///
    /// See [`Self::symbol_map`].
    pub fn refresh(&self, root: &Path, git_ref: &str) -> Result<Arc<RepoSymbols>> {
        let symbols = Arc::new(self.scan(root, git_ref)?);
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(
            (root.to_path_buf(), git_ref.to_string()),
            Arc::clone(&symbols),
        );
        Ok(symbols)
    }

    /// Drop every cached symbol table.
    pub fn invalidate(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn scan(&self, root: &Path, git_ref: &str) -> Result<RepoSymbols> {
        let registry = self.extractor.registry();
        let (nodes, warnings) = self.walk_tree(root, git_ref)?;
        let mut out = RepoSymbols {
            files_skipped: warnings.len(),
            warnings,
            ..RepoSymbols::default()
        };

        for node in nodes {
            let path = root.join(&node.path);
            if node.is_dir || !registry.is_supported(&path) {
                continue;
            }
            match self.try_symbols(&path) {
                Ok(symbols) => {
                    out.files_scanned += 1;
                    out.files.insert(node.path, symbols);
                }
                Err(e) => {
                    tracing::warn!(path = %node.path, error = %e, "file skipped");
                    out.files_skipped += 1;
                    out.warnings.push(ScanWarning {
                        path: node.path,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            root = %root.display(),
            git_ref,
            scanned = out.files_scanned,
            skipped = out.files_skipped,
            "repository mapped"
        );
        Ok(out)
    }

    /// Compact structural map of the project, at most `token_budget` tokens.
    ///
    /// Files with more definitions come first.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` cannot be walked.
    pub fn generate_repo_map(&self, root: &Path, token_budget: usize) -> Result<String> {
        let symbols = self.scan(root, WORKTREE_REF)?;
        Ok(render_repo_map(&symbols, token_budget))
    }

    /// Lines matching `pattern` in text files under `root`, in walk order.
    ///
    /// `file_glob` is matched against the relative path and the file name.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Pattern`] for an invalid regex or glob.
    pub fn search_text(
        &self,
        root: &Path,
        pattern: &str,
        file_glob: Option<&str>,
    ) -> Result<Vec<TextMatch>> {
        let regex = regex::Regex::new(pattern).map_err(|e| IndexError::Pattern(e.to_string()))?;
        let glob = file_glob
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| IndexError::Pattern(e.to_string()))?;

        let mut matches = Vec::new();
        for node in self.file_tree(root, WORKTREE_REF)? {
            if node.is_dir {
                continue;
            }
            if let Some(glob) = &glob {
                let name = node.path.rsplit('/').next().unwrap_or(&node.path);
                if !glob.matches(&node.path) && !glob.matches(name) {
                    continue;
                }
            }
            let Ok(source) = std::fs::read_to_string(root.join(&node.path)) else {
                continue;
            };
            for (idx, line) in source.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(TextMatch {
                        path: node.path.clone(),
                        line: idx,
                        text: line.to_string(),
                    });
                }
            }
        }
        Ok(matches)
    }
}

/// Token estimate used for budgets.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

fn render_repo_map(symbols: &RepoSymbols, token_budget: usize) -> String {
    let mut entries: Vec<(&str, Vec<String>)> = symbols
        .files
        .iter()
        .filter_map(|(path, syms)| {
            let mut labels: Vec<String> = Vec::new();
            for s in syms.iter().filter(|s| s.kind.is_definition()) {
                let label = format!("{}:{}", short_kind(&s.kind), s.name);
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
            (!labels.is_empty()).then_some((path.as_str(), labels))
        })
        .collect();
    entries.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let header = "<repo_map>\n";
    let footer = "</repo_map>";
    let mut map = String::from(header);
    let mut used = estimate_tokens(header) + estimate_tokens(footer);

    for (idx, (path, labels)) in entries.iter().enumerate() {
        let line = format!("  {path} :: {}\n", labels.join(", "));
        let cost = estimate_tokens(&line);
        if used + cost > token_budget {
            let remaining = entries.len() - idx;
            let _ = writeln!(map, "  ... and {remaining} more files");
            break;
        }
        map.push_str(&line);
        used += cost;
    }

    map.push_str(footer);
    map
}

fn short_kind(kind: &SymbolKind) -> &str {
    match kind {
        SymbolKind::Function | SymbolKind::Method => "fn",
        SymbolKind::Variable => "var",
        other => other.as_str(),
    }
}

fn walker(root: &Path) -> ignore::Walk {
    ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|e| {
            !e.file_name()
                .to_str()
                .is_some_and(|name| VCS_NAMES.contains(&name))
        })
        .build()
}

fn walk_error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            walk_error_path(err)
        }
        _ => None,
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
