//! Grammar registry: which languages exist, which extensions they claim and
//! which capture patterns run against them.
//!
//! Lifecycle: a registry starts with the built-in languages, is mutated only
//! through [`GrammarRegistry::register_language`] and
//! [`GrammarRegistry::extend_language`], and [`GrammarRegistry::reset_plugins`]
//! restores exactly the built-in set. All state sits behind one `RwLock`;
//! readers take a snapshot of a plugin, so an extraction in flight sees the
//! registry either before or after a mutation, never half of one.
//!
//! Pattern files are tree-sitter queries. Each match must capture `@name`
//! (the symbol name) and one more capture whose name is the symbol kind,
//! optionally followed by a subtype: `@function`, `@function.test`,
//! `@call.method`. Captures starting with `_` are helpers for predicates and
//! are ignored.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use crate::error::{IndexError, Result};
use crate::languages::{self, builtin_grammar};

static GLOBAL: LazyLock<Arc<GrammarRegistry>> = LazyLock::new(|| Arc::new(GrammarRegistry::new()));

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

fn next_revision() -> u64 {
    NEXT_REVISION.fetch_add(1, Ordering::Relaxed)
}

/// One loaded pattern file.
#[derive(Debug, Clone)]
pub struct PatternSource {
    /// Path it was read from, or `builtin:<file>` for embedded patterns.
    pub origin: String,
    pub text: Arc<str>,
}

/// Where a language's grammar comes from.
#[derive(Clone)]
pub enum GrammarSource {
    /// Reuse the grammar of a built-in language (`"go"`, `"python"`, ...).
    Builtin(String),
    /// Any grammar the caller links, e.g. `tree_sitter_ruby::LANGUAGE.into()`.
    Language(tree_sitter::Language),
}

impl std::fmt::Debug for GrammarSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin(name) => f.debug_tuple("Builtin").field(name).finish(),
            Self::Language(_) => f.write_str("Language(..)"),
        }
    }
}

/// Request to register a language at runtime.
#[derive(Debug, Clone)]
pub struct LanguageSpec {
    name: String,
    grammar: GrammarSource,
    extensions: Vec<String>,
    pattern_files: Vec<PathBuf>,
    pattern_dirs: Vec<PathBuf>,
    overwrite: bool,
}

impl LanguageSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, grammar: GrammarSource) -> Self {
        Self {
            name: name.into(),
            grammar,
            extensions: Vec::new(),
            pattern_files: Vec::new(),
            pattern_dirs: Vec::new(),
            overwrite: false,
        }
    }

    #[must_use]
    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        self.extensions.push(ext.into());
        self
    }

    #[must_use]
    pub fn extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions.extend(exts.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn pattern_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pattern_files.push(path.into());
        self
    }

    /// Extra directory searched for relative pattern file names.
    #[must_use]
    pub fn pattern_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pattern_dirs.push(dir.into());
        self
    }

    /// Replace an existing language of the same name instead of failing.
    #[must_use]
    pub fn overwrite(mut self, yes: bool) -> Self {
        self.overwrite = yes;
        self
    }
}

/// A registered language.
#[derive(Clone)]
pub struct LanguagePlugin {
    name: String,
    extensions: BTreeSet<String>,
    patterns: Vec<PatternSource>,
    pattern_dirs: Vec<PathBuf>,
    grammar: tree_sitter::Language,
    revision: u64,
}

impl LanguagePlugin {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    /// Pattern sources in registration order.
    #[must_use]
    pub fn patterns(&self) -> &[PatternSource] {
        &self.patterns
    }

    #[must_use]
    pub fn pattern_dirs(&self) -> &[PathBuf] {
        &self.pattern_dirs
    }

    #[must_use]
    pub fn grammar(&self) -> &tree_sitter::Language {
        &self.grammar
    }

    /// Changes on every mutation of this language; compiled caches key on it.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl std::fmt::Debug for LanguagePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguagePlugin")
            .field("name", &self.name)
            .field("extensions", &self.extensions)
            .field(
                "patterns",
                &self.patterns.iter().map(|p| &p.origin).collect::<Vec<_>>(),
            )
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryState {
    plugins: BTreeMap<String, LanguagePlugin>,
    by_extension: HashMap<String, String>,
}

impl RegistryState {
    fn builtin() -> Self {
        let mut state = Self::default();
        for (lang, grammar) in languages::enabled() {
            let (origin, text) = lang.patterns();
            state.insert(LanguagePlugin {
                name: lang.id().to_string(),
                extensions: lang.extensions().iter().map(|e| (*e).to_string()).collect(),
                patterns: vec![PatternSource {
                    origin: origin.to_string(),
                    text: Arc::from(text),
                }],
                pattern_dirs: Vec::new(),
                grammar,
                revision: next_revision(),
            });
        }
        state
    }

    /// Insert a plugin, moving any extension it claims away from other languages.
    fn insert(&mut self, plugin: LanguagePlugin) {
        if let Some(old) = self.plugins.remove(&plugin.name) {
            for ext in &old.extensions {
                self.by_extension.remove(ext);
            }
        }
        for ext in &plugin.extensions {
            if let Some(previous) = self.by_extension.insert(ext.clone(), plugin.name.clone())
                && let Some(prev_plugin) = self.plugins.get_mut(&previous)
            {
                prev_plugin.extensions.remove(ext);
                tracing::debug!(ext, from = %previous, to = %plugin.name, "extension remapped");
            }
        }
        self.plugins.insert(plugin.name.clone(), plugin);
    }
}

/// Process-wide or per-caller set of language plugins.
pub struct GrammarRegistry {
    state: RwLock<RegistryState>,
}

impl Default for GrammarRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GrammarRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrammarRegistry")
            .field("languages", &self.list_supported_languages().len())
            .finish()
    }
}

impl GrammarRegistry {
    /// Registry holding only the built-in languages.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::builtin()),
        }
    }

    /// The shared process-wide registry.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Add a language.
    ///
    /// Pattern files are read and compiled here, so a bad file fails the
    /// registration instead of a later extraction.
    ///
    /// # Errors
    ///
    /// - [`IndexError::InvalidLanguageSpec`] for an empty name, no extensions
    ///   or an unknown built-in grammar
    /// - [`IndexError::GrammarLoad`] if a pattern file is missing or does not compile
    /// - [`IndexError::DuplicateLanguage`] if the name exists and overwrite was not set
    pub fn register_language(&self, spec: LanguageSpec) -> Result<()> {
        let LanguageSpec {
            name,
            grammar,
            extensions,
            pattern_files,
            pattern_dirs,
            overwrite,
        } = spec;

        if name.trim().is_empty() {
            return Err(IndexError::InvalidLanguageSpec {
                name,
                reason: "name is empty".into(),
            });
        }
        let extensions: BTreeSet<String> = extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| !e.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(IndexError::InvalidLanguageSpec {
                name,
                reason: "at least one file extension is required".into(),
            });
        }
        let grammar = match grammar {
            GrammarSource::Language(language) => language,
            GrammarSource::Builtin(base) => {
                builtin_grammar(&base).ok_or_else(|| IndexError::InvalidLanguageSpec {
                    name: name.clone(),
                    reason: format!("no built-in grammar named {base}"),
                })?
            }
        };

        let patterns = pattern_files
            .iter()
            .map(|file| load_pattern(&name, &grammar, file, &pattern_dirs))
            .collect::<Result<Vec<_>>>()?;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.plugins.contains_key(&name) && !overwrite {
            return Err(IndexError::DuplicateLanguage(name));
        }
        tracing::info!(
            language = %name,
            extensions = ?extensions,
            patterns = patterns.len(),
            "language registered"
        );
        state.insert(LanguagePlugin {
            name,
            extensions,
            patterns,
            pattern_dirs,
            grammar,
            revision: next_revision(),
        });
        Ok(())
    }

    /// Append one pattern file to an existing language.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::UnknownLanguage`] if `name` is not registered and
    /// [`IndexError::GrammarLoad`] if the file is missing or does not compile.
    pub fn extend_language(&self, name: &str, pattern_file: impl AsRef<Path>) -> Result<()> {
        let (grammar, dirs, seen) = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            let plugin = state
                .plugins
                .get(name)
                .ok_or_else(|| IndexError::UnknownLanguage(name.to_string()))?;
            (
                plugin.grammar.clone(),
                plugin.pattern_dirs.clone(),
                plugin.revision,
            )
        };

        let pattern = load_pattern(name, &grammar, pattern_file.as_ref(), &dirs)?;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let plugin = state
            .plugins
            .get_mut(name)
            .ok_or_else(|| IndexError::UnknownLanguage(name.to_string()))?;
        // The language may have been replaced while the file was loading.
        if plugin.revision != seen {
            compile_pattern(name, &plugin.grammar, &pattern.text, &pattern.origin)?;
        }
        tracing::info!(language = name, origin = %pattern.origin, "language extended");
        plugin.patterns.push(pattern);
        plugin.revision = next_revision();
        Ok(())
    }

    /// Language name to extension set.
    #[must_use]
    pub fn list_supported_languages(&self) -> BTreeMap<String, BTreeSet<String>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .plugins
            .values()
            .map(|p| (p.name.clone(), p.extensions.clone()))
            .collect()
    }

    /// Drop every runtime registration and extension.
    pub fn reset_plugins(&self) {
        let fresh = RegistryState::builtin();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = fresh;
        tracing::info!("language registry reset to built-ins");
    }

    /// Name of the language claiming `ext` (with or without the leading dot).
    #[must_use]
    pub fn language_for_extension(&self, ext: &str) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.by_extension.get(&normalize_extension(ext)).cloned()
    }

    /// Snapshot of the plugin claiming `ext`.
    #[must_use]
    pub fn plugin_for_extension(&self, ext: &str) -> Option<LanguagePlugin> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let name = state.by_extension.get(&normalize_extension(ext))?;
        state.plugins.get(name).cloned()
    }

    /// Snapshot of a plugin by name.
    #[must_use]
    pub fn plugin(&self, name: &str) -> Option<LanguagePlugin> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.plugins.get(name).cloned()
    }

    /// Whether some language claims the extension of `path`.
    #[must_use]
    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.language_for_extension(ext).is_some())
    }
}

pub(crate) fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn resolve_pattern_path(file: &Path, dirs: &[PathBuf]) -> Option<PathBuf> {
    if file.is_absolute() || file.exists() {
        return file.exists().then(|| file.to_path_buf());
    }
    dirs.iter().map(|dir| dir.join(file)).find(|p| p.exists())
}

fn load_pattern(
    language: &str,
    grammar: &tree_sitter::Language,
    file: &Path,
    dirs: &[PathBuf],
) -> Result<PatternSource> {
    let path = resolve_pattern_path(file, dirs).ok_or_else(|| IndexError::GrammarLoad {
        language: language.to_string(),
        reason: format!(
            "pattern file {} not found (searched {} extra dirs)",
            file.display(),
            dirs.len()
        ),
    })?;
    let text = std::fs::read_to_string(&path).map_err(|e| IndexError::GrammarLoad {
        language: language.to_string(),
        reason: format!("{}: {e}", path.display()),
    })?;
    let origin = path.display().to_string();
    compile_pattern(language, grammar, &text, &origin)?;
    Ok(PatternSource {
        origin,
        text: Arc::from(text),
    })
}

fn compile_pattern(
    language: &str,
    grammar: &tree_sitter::Language,
    text: &str,
    origin: &str,
) -> Result<()> {
    tree_sitter::Query::new(grammar, text).map_err(|e| IndexError::GrammarLoad {
        language: language.to_string(),
        reason: format!("{origin}: {e}"),
    })?;
    Ok(())
}
