use serde::{Deserialize, Serialize};
use std::path::Path;

/// Language identifier derived purely from a file path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    CSharp,
    Ruby,
    Swift,
    Kotlin,
    Shell,
    Dockerfile,
    Makefile,
    Unknown,
}

impl Language {
    /// Every variant, in declaration order. `Language::ALL[l.index()] == l`.
    pub const ALL: [Language; 16] = [
        Language::Rust,
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Go,
        Language::Java,
        Language::C,
        Language::Cpp,
        Language::CSharp,
        Language::Ruby,
        Language::Swift,
        Language::Kotlin,
        Language::Shell,
        Language::Dockerfile,
        Language::Makefile,
        Language::Unknown,
    ];

    /// Detect language from file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "rs" => Language::Rust,
            "py" | "pyw" | "pyi" => Language::Python,
            "js" | "mjs" | "cjs" | "jsx" => Language::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Language::Cpp,
            "cs" => Language::CSharp,
            "rb" | "rake" | "gemspec" => Language::Ruby,
            "swift" => Language::Swift,
            "kt" | "kts" => Language::Kotlin,
            "sh" | "bash" | "zsh" => Language::Shell,
            "dockerfile" => Language::Dockerfile,
            "mk" => Language::Makefile,
            _ => Language::Unknown,
        }
    }

    /// Detect language from a fixed file name (extensionless build/config files).
    fn from_file_name(name: &str) -> Option<Self> {
        let language = match name {
            "Dockerfile" | "dockerfile" | "Containerfile" => Language::Dockerfile,
            "Makefile" | "makefile" | "GNUmakefile" => Language::Makefile,
            "Gemfile" | "Rakefile" | "Guardfile" => Language::Ruby,
            ".bashrc" | ".bash_profile" | ".zshrc" | ".profile" => Language::Shell,
            _ if name.starts_with("Dockerfile.") => Language::Dockerfile,
            _ => return None,
        };
        Some(language)
    }

    /// Detect language from file path. Never fails: unrecognized paths are `Unknown`.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if let Some(language) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(Self::from_file_name)
        {
            return language;
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Language::Unknown)
    }

    /// Position of this variant in [`Language::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Get language name as string
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Swift => "swift",
            Language::Kotlin => "kotlin",
            Language::Shell => "shell",
            Language::Dockerfile => "dockerfile",
            Language::Makefile => "makefile",
            Language::Unknown => "unknown",
        }
    }

    /// Whether a tree-sitter grammar is compiled in for this language
    pub fn supports_ast(self) -> bool {
        matches!(
            self,
            Language::Rust
                | Language::Python
                | Language::JavaScript
                | Language::TypeScript
                | Language::Go
        )
    }

    /// Get the tree-sitter grammar. TypeScript paths ending in `.tsx` use the TSX dialect.
    pub fn tree_sitter_language(self, path: &str) -> Option<tree_sitter::Language> {
        match self {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript if path.to_ascii_lowercase().ends_with(".tsx") => {
                Some(tree_sitter_typescript::LANGUAGE_TSX.into())
            }
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a path to its language. Thin alias of [`Language::from_path`].
pub fn detect(path: impl AsRef<Path>) -> Language {
    Language::from_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extensions_are_case_insensitive() {
        for (ext, language) in [
            ("RS", Language::Rust),
            ("pyi", Language::Python),
            ("Mjs", Language::JavaScript),
            ("cts", Language::TypeScript),
            ("HPP", Language::Cpp),
            ("gemspec", Language::Ruby),
            ("kts", Language::Kotlin),
            ("txt", Language::Unknown),
        ] {
            assert_eq!(Language::from_extension(ext), language, "{ext}");
        }
    }

    #[test]
    fn file_name_beats_extension() {
        // `Dockerfile.prod` would otherwise read as an unknown `.prod` file.
        assert_eq!(detect("deploy/Dockerfile.prod"), Language::Dockerfile);
        assert_eq!(detect("Containerfile"), Language::Dockerfile);
        assert_eq!(detect("tools/GNUmakefile"), Language::Makefile);
        assert_eq!(detect("Rakefile"), Language::Ruby);
        assert_eq!(detect("home/.bash_profile"), Language::Shell);
        // Only the exact names count; a suffix is not enough.
        assert_eq!(detect("MyDockerfile"), Language::Unknown);
        assert_eq!(detect("scripts/build.mk"), Language::Makefile);
    }

    #[test]
    fn paths_without_a_usable_extension_are_unknown() {
        assert_eq!(detect("LICENSE"), Language::Unknown);
        assert_eq!(detect("src/.hidden"), Language::Unknown);
        assert_eq!(detect(""), Language::Unknown);
        assert_eq!(detect("dir.rs/README"), Language::Unknown);
    }

    #[test]
    fn index_addresses_all() {
        for language in Language::ALL {
            assert_eq!(Language::ALL[language.index()], language);
        }
    }

    #[test]
    fn grammars_exist_exactly_for_ast_languages() {
        for language in Language::ALL {
            assert_eq!(
                language.tree_sitter_language("file").is_some(),
                language.supports_ast(),
                "{language}"
            );
        }
    }

    #[test]
    fn tsx_selects_its_own_dialect() {
        let tsx = Language::TypeScript.tree_sitter_language("ui/App.TSX").unwrap();
        let ts = Language::TypeScript.tree_sitter_language("ui/app.ts").unwrap();
        assert_ne!(tsx.id_for_node_kind("jsx_element", true), 0);
        assert_eq!(ts.id_for_node_kind("jsx_element", true), 0);
    }

    #[test]
    fn serialized_names_match_display() {
        for language in [Language::CSharp, Language::Cpp, Language::Dockerfile] {
            let json = serde_json::to_string(&language).unwrap();
            assert_eq!(json, format!("\"{language}\""));
            let back: Language = serde_json::from_str(&json).unwrap();
            assert_eq!(back, language);
        }
    }
}
