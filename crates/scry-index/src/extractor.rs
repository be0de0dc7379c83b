//! Query-driven symbol extraction.
//!
//! The extractor owns no language knowledge: it looks up the plugin for a file
//! extension, runs the plugin's capture patterns in registration order and
//! turns every `@name` + `@kind` match into a [`Symbol`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tree_sitter::{Parser, Query, QueryCursor, StreamingIterator};

use crate::error::{IndexError, Result};
use crate::registry::{GrammarRegistry, LanguagePlugin};

/// Kind half of a `kind[.subtype]` capture name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    Struct,
    Enum,
    Variable,
    Import,
    Call,
    /// Any capture name outside the shared vocabulary (`impl`, `macro`, ...).
    Custom(String),
}

impl SymbolKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Struct => "struct",
            Self::Enum => "enum",
            Self::Variable => "variable",
            Self::Import => "import",
            Self::Call => "call",
            Self::Custom(name) => name,
        }
    }

    /// Whether the symbol defines something (as opposed to importing or calling it).
    #[must_use]
    pub fn is_definition(&self) -> bool {
        !matches!(self, Self::Import | Self::Call)
    }
}

impl From<&str> for SymbolKind {
    fn from(s: &str) -> Self {
        match s {
            "function" => Self::Function,
            "method" => Self::Method,
            "class" => Self::Class,
            "interface" => Self::Interface,
            "struct" => Self::Struct,
            "enum" => Self::Enum,
            "variable" => Self::Variable,
            "import" => Self::Import,
            "call" => Self::Call,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for SymbolKind {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<SymbolKind> for String {
    fn from(kind: SymbolKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted symbol. Lines are 0-indexed, `end_line` inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SymbolKind,
    pub start_line: usize,
    pub end_line: usize,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

struct CompiledLanguage {
    revision: u64,
    grammar: tree_sitter::Language,
    queries: Vec<Query>,
}

/// Extracts symbols using the patterns registered in a [`GrammarRegistry`].
///
/// Compiled queries are cached per language and dropped whenever the
/// language's revision changes.
pub struct SymbolExtractor {
    registry: Arc<GrammarRegistry>,
    cache: RwLock<HashMap<String, Arc<CompiledLanguage>>>,
}

impl std::fmt::Debug for SymbolExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolExtractor")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl SymbolExtractor {
    #[must_use]
    pub fn new(registry: Arc<GrammarRegistry>) -> Self {
        Self {
            registry,
            cache: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<GrammarRegistry> {
        &self.registry
    }

    /// Extract every symbol the patterns for `file_extension` capture.
    ///
    /// An extension no language claims yields an empty list. Results of
    /// different pattern files are concatenated; overlapping captures are kept.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::GrammarLoad`] if a pattern no longer compiles and
    /// [`IndexError::Parse`] if tree-sitter produces no tree.
    pub fn extract_symbols(&self, file_extension: &str, source: &str) -> Result<Vec<Symbol>> {
        let Some(plugin) = self.registry.plugin_for_extension(file_extension) else {
            return Ok(Vec::new());
        };
        let compiled = self.compiled(&plugin)?;

        let mut parser = Parser::new();
        parser
            .set_language(&compiled.grammar)
            .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| IndexError::Parse(format!("no tree for {} source", plugin.name())))?;

        let bytes = source.as_bytes();
        let mut symbols = Vec::new();
        for query in &compiled.queries {
            let names = query.capture_names();
            let mut cursor = QueryCursor::new();
            let mut matches = cursor.matches(query, tree.root_node(), bytes);
            while let Some(m) = matches.next() {
                let mut name_node = None;
                let mut kind_capture = None;
                for cap in m.captures {
                    let capture_name = names[cap.index as usize];
                    if capture_name == "name" {
                        name_node = Some(cap.node);
                    } else if !capture_name.starts_with('_') {
                        kind_capture = Some((capture_name, cap.node));
                    }
                }
                let (Some(name_node), Some((capture_name, node))) = (name_node, kind_capture) else {
                    continue;
                };

                let (kind, subtype) = match capture_name.split_once('.') {
                    Some((kind, sub)) => (kind, Some(sub.to_string())),
                    None => (capture_name, None),
                };
                symbols.push(Symbol {
                    name: source[name_node.byte_range()].to_string(),
                    kind: SymbolKind::from(kind),
                    start_line: node.start_position().row,
                    end_line: end_line(&node),
                    code: source[node.byte_range()].to_string(),
                    subtype,
                });
            }
        }

        tracing::debug!(
            language = plugin.name(),
            symbols = symbols.len(),
            "symbols extracted"
        );
        Ok(symbols)
    }

    /// [`Self::extract_symbols`] keyed by the extension of `path`.
    ///
    /// # Errors
    ///
    /// See [`Self::extract_symbols`].
    pub fn extract_from_path(&self, path: &Path, source: &str) -> Result<Vec<Symbol>> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extract_symbols(ext, source),
            None => Ok(Vec::new()),
        }
    }

    fn compiled(&self, plugin: &LanguagePlugin) -> Result<Arc<CompiledLanguage>> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = cache.get(plugin.name())
                && entry.revision == plugin.revision()
            {
                return Ok(Arc::clone(entry));
            }
        }

        let queries = plugin
            .patterns()
            .iter()
            .map(|p| {
                Query::new(plugin.grammar(), &p.text).map_err(|e| IndexError::GrammarLoad {
                    language: plugin.name().to_string(),
                    reason: format!("{}: {e}", p.origin),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let entry = Arc::new(CompiledLanguage {
            revision: plugin.revision(),
            grammar: plugin.grammar().clone(),
            queries,
        });

        tracing::debug!(
            language = plugin.name(),
            revision = plugin.revision(),
            "compiled capture patterns"
        );
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(plugin.name().to_string(), Arc::clone(&entry));
        Ok(entry)
    }
}

/// Inclusive end row. A node ending at column 0 stops on the previous line.
fn end_line(node: &tree_sitter::Node<'_>) -> usize {
    let start = node.start_position();
    let end = node.end_position();
    if end.column == 0 && end.row > start.row {
        end.row - 1
    } else {
        end.row
    }
}
