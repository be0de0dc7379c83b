//! Built-in languages: compiled-in tree-sitter grammars plus their embedded
//! capture patterns.

use serde::{Deserialize, Serialize};

/// Language shipped with the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Bash,
}

impl Lang {
    pub const ALL: [Lang; 7] = [
        Lang::Rust,
        Lang::Python,
        Lang::JavaScript,
        Lang::TypeScript,
        Lang::Tsx,
        Lang::Go,
        Lang::Bash,
    ];

    /// Registry name of the language.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
            Self::Bash => "bash",
        }
    }

    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.id() == id)
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-js")]
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[cfg(feature = "lang-bash")]
            Self::Bash => Some(tree_sitter_bash::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// File extensions claimed at startup, lowercase and without the dot.
    #[must_use]
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["rs"],
            Self::Python => &["py", "pyi"],
            Self::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Self::TypeScript => &["ts", "mts", "cts"],
            Self::Tsx => &["tsx"],
            Self::Go => &["go"],
            Self::Bash => &["sh", "bash", "zsh"],
        }
    }

    /// Embedded pattern file as `(origin, source)`.
    #[must_use]
    pub fn patterns(self) -> (&'static str, &'static str) {
        match self {
            Self::Rust => ("builtin:rust.scm", include_str!("../queries/rust.scm")),
            Self::Python => ("builtin:python.scm", include_str!("../queries/python.scm")),
            Self::JavaScript => (
                "builtin:javascript.scm",
                include_str!("../queries/javascript.scm"),
            ),
            Self::TypeScript | Self::Tsx => (
                "builtin:typescript.scm",
                include_str!("../queries/typescript.scm"),
            ),
            Self::Go => ("builtin:go.scm", include_str!("../queries/go.scm")),
            Self::Bash => ("builtin:bash.scm", include_str!("../queries/bash.scm")),
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Built-in languages whose grammar feature is enabled.
pub fn enabled() -> impl Iterator<Item = (Lang, tree_sitter::Language)> {
    Lang::ALL
        .into_iter()
        .filter_map(|lang| lang.grammar().map(|g| (lang, g)))
}

/// Grammar of a built-in language by registry name.
#[must_use]
pub fn builtin_grammar(name: &str) -> Option<tree_sitter::Language> {
    Lang::from_id(name).and_then(Lang::grammar)
}
