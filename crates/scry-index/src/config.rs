//! Engine configuration: TOML file, defaults, then `SCRY_*` environment overrides.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use scry_store::VectorConfig;

use crate::chunker::ChunkStrategy;
use crate::error::Result;
use crate::registry::{GrammarRegistry, GrammarSource, LanguageSpec};
use crate::searcher::SearcherConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub repo_map: RepoMapConfig,
    /// Extra languages registered on top of the built-ins.
    #[serde(default)]
    pub languages: Vec<LanguageConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub collection: String,
    pub chunk_by: ChunkStrategy,
    pub max_lines: usize,
    pub batch_size: usize,
    pub max_file_bytes: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let searcher = SearcherConfig::default();
        Self {
            collection: searcher.collection,
            chunk_by: ChunkStrategy::default(),
            max_lines: searcher.max_lines,
            batch_size: searcher.batch_size,
            max_file_bytes: searcher.max_file_bytes,
        }
    }
}

impl IndexConfig {
    #[must_use]
    pub fn searcher_config(&self) -> SearcherConfig {
        SearcherConfig {
            collection: self.collection.clone(),
            max_lines: self.max_lines,
            batch_size: self.batch_size,
            max_file_bytes: self.max_file_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { max_chars: 12_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoMapConfig {
    pub token_budget: usize,
}

impl Default for RepoMapConfig {
    fn default() -> Self {
        Self { token_budget: 1024 }
    }
}

/// A `[[languages]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    /// Built-in grammar to parse with, e.g. `"go"`.
    pub grammar: String,
    pub extensions: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<PathBuf>,
    #[serde(default)]
    pub pattern_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub overwrite: bool,
}

impl LanguageConfig {
    #[must_use]
    pub fn to_spec(&self) -> LanguageSpec {
        let mut spec = LanguageSpec::new(&self.name, GrammarSource::Builtin(self.grammar.clone()))
            .extensions(self.extensions.iter().cloned())
            .overwrite(self.overwrite);
        for dir in &self.pattern_dirs {
            spec = spec.pattern_dir(dir);
        }
        for file in &self.patterns {
            spec = spec.pattern_file(file);
        }
        spec
    }
}

impl Config {
    /// Load from `path` (defaults if the file is missing), then apply
    /// environment overrides.
    ///
    /// Relative pattern paths of `[[languages]]` entries also resolve
    /// against the directory holding the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            for lang in &mut config.languages {
                lang.pattern_dirs.push(dir.to_path_buf());
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Override fields from `SCRY_*` variables. Invalid values are ignored
    /// with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SCRY_VECTOR_BACKEND") {
            match v.parse() {
                Ok(kind) => self.vector.backend = kind,
                Err(_) => tracing::warn!("ignoring invalid SCRY_VECTOR_BACKEND value: {v}"),
            }
        }
        if let Ok(v) = std::env::var("SCRY_SQLITE_PATH") {
            self.vector.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("SCRY_QDRANT_URL") {
            self.vector.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("SCRY_INDEX_COLLECTION") {
            self.index.collection = v;
        }
        if let Ok(v) = std::env::var("SCRY_INDEX_CHUNK_BY") {
            match v.parse() {
                Ok(strategy) => self.index.chunk_by = strategy,
                Err(_) => tracing::warn!("ignoring invalid SCRY_INDEX_CHUNK_BY value: {v}"),
            }
        }
        if let Some(n) = env_usize("SCRY_INDEX_MAX_LINES") {
            self.index.max_lines = n;
        }
        if let Some(n) = env_usize("SCRY_INDEX_BATCH_SIZE") {
            self.index.batch_size = n;
        }
        if let Some(n) = env_usize("SCRY_CONTEXT_MAX_CHARS") {
            self.context.max_chars = n;
        }
        if let Some(n) = env_usize("SCRY_REPO_MAP_TOKENS") {
            self.repo_map.token_budget = n;
        }
    }

    /// Register every `[[languages]]` entry with `registry`, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first registration error.
    pub fn register_languages(&self, registry: &GrammarRegistry) -> Result<usize> {
        for lang in &self.languages {
            registry.register_language(lang.to_spec())?;
        }
        Ok(self.languages.len())
    }
}

fn env_usize(key: &str) -> Option<usize> {
    let v = std::env::var(key).ok()?;
    match v.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!("ignoring invalid {key} value: {v}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use scry_store::BackendKind;

    const ENV_KEYS: [&str; 9] = [
        "SCRY_VECTOR_BACKEND",
        "SCRY_SQLITE_PATH",
        "SCRY_QDRANT_URL",
        "SCRY_INDEX_COLLECTION",
        "SCRY_INDEX_CHUNK_BY",
        "SCRY_INDEX_MAX_LINES",
        "SCRY_INDEX_BATCH_SIZE",
        "SCRY_CONTEXT_MAX_CHARS",
        "SCRY_REPO_MAP_TOKENS",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn missing_file_gives_defaults() {
        clear_env();
        let config = Config::load(Path::new("/nonexistent/scry.toml")).unwrap();
        assert_eq!(config.index, IndexConfig::default());
        assert_eq!(config.vector.backend, BackendKind::Sqlite);
        assert_eq!(config.context.max_chars, 12_000);
        assert_eq!(config.repo_map.token_budget, 1024);
        assert!(config.languages.is_empty());
    }

    #[test]
    #[serial]
    fn parse_toml_sections() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scry.toml");
        std::fs::write(
            &path,
            r#"
[index]
collection = "repo"
chunk_by = "lines"
max_lines = 40

[vector]
backend = "memory"

[context]
max_chars = 500

[[languages]]
name = "toy"
grammar = "go"
extensions = ["toy"]
patterns = ["toy.scm"]
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.index.collection, "repo");
        assert_eq!(config.index.chunk_by, ChunkStrategy::Lines);
        assert_eq!(config.index.max_lines, 40);
        assert_eq!(config.index.batch_size, 32);
        assert_eq!(config.vector.backend, BackendKind::Memory);
        assert_eq!(config.context.max_chars, 500);
        assert_eq!(config.languages.len(), 1);
        assert_eq!(config.languages[0].pattern_dirs, [dir.path().to_path_buf()]);
    }

    #[test]
    #[serial]
    fn invalid_toml_is_an_error() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scry.toml");
        std::fs::write(&path, "[index\nmax_lines = ").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    #[serial]
    fn env_overrides_apply() {
        clear_env();
        unsafe {
            std::env::set_var("SCRY_VECTOR_BACKEND", "qdrant");
            std::env::set_var("SCRY_QDRANT_URL", "http://qdrant:6334");
            std::env::set_var("SCRY_INDEX_CHUNK_BY", "lines");
            std::env::set_var("SCRY_INDEX_MAX_LINES", "25");
            std::env::set_var("SCRY_CONTEXT_MAX_CHARS", "900");
            std::env::set_var("SCRY_REPO_MAP_TOKENS", "64");
        }
        let mut config = Config::default();
        config.apply_env_overrides();
        clear_env();

        assert_eq!(config.vector.backend, BackendKind::Qdrant);
        assert_eq!(config.vector.qdrant_url, "http://qdrant:6334");
        assert_eq!(config.index.chunk_by, ChunkStrategy::Lines);
        assert_eq!(config.index.max_lines, 25);
        assert_eq!(config.context.max_chars, 900);
        assert_eq!(config.repo_map.token_budget, 64);
    }

    #[test]
    #[serial]
    fn invalid_env_values_are_ignored() {
        clear_env();
        unsafe {
            std::env::set_var("SCRY_VECTOR_BACKEND", "cassandra");
            std::env::set_var("SCRY_INDEX_CHUNK_BY", "ast");
            std::env::set_var("SCRY_INDEX_BATCH_SIZE", "lots");
            std::env::set_var("SCRY_INDEX_MAX_LINES", "-3");
            std::env::set_var("SCRY_CONTEXT_MAX_CHARS", "1e3");
            std::env::set_var("SCRY_REPO_MAP_TOKENS", "");
        }
        let mut config = Config::default();
        config.apply_env_overrides();
        clear_env();

        assert_eq!(config.vector.backend, BackendKind::Sqlite);
        assert_eq!(config.index.chunk_by, ChunkStrategy::Symbols);
        assert_eq!(config.index.batch_size, 32);
        assert_eq!(config.index.max_lines, 60);
        assert_eq!(config.context.max_chars, 12_000);
        assert_eq!(config.repo_map.token_budget, 1024);
    }

    #[cfg(feature = "lang-go")]
    #[test]
    #[serial]
    fn register_languages_from_config() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("toy.scm"),
            "(function_declaration name: (identifier) @name) @function\n",
        )
        .unwrap();
        let path = dir.path().join("scry.toml");
        std::fs::write(
            &path,
            "[[languages]]\nname = \"toy\"\ngrammar = \"go\"\nextensions = [\".toy\"]\npatterns = [\"toy.scm\"]\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        let registry = GrammarRegistry::new();
        assert_eq!(config.register_languages(&registry).unwrap(), 1);
        assert_eq!(registry.language_for_extension("toy").as_deref(), Some("toy"));
    }

    #[test]
    fn searcher_config_mirrors_index_section() {
        let index = IndexConfig {
            collection: "c".into(),
            max_lines: 7,
            ..IndexConfig::default()
        };
        let searcher = index.searcher_config();
        assert_eq!(searcher.collection, "c");
        assert_eq!(searcher.max_lines, 7);
        assert_eq!(searcher.batch_size, index.batch_size);
    }
}
