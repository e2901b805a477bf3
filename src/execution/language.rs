//! Language to interpreter (or compiler) resolution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TunnelError;
use crate::Result;

/// How one language is run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageSpec {
    /// Extension given to temporary source files.
    pub extension: String,
    /// Absolute program locations, tried in order.
    pub candidates: Vec<PathBuf>,
}

impl LanguageSpec {
    fn new(extension: &str, candidates: &[&str]) -> Self {
        Self {
            extension: extension.to_string(),
            candidates: candidates.iter().map(PathBuf::from).collect(),
        }
    }
}

/// A program picked for a language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Program path as the guest sees it.
    pub program: PathBuf,
    /// Extension for temporary source files.
    pub extension: String,
}

/// Maps language names to ordered program candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageTable {
    languages: BTreeMap<String, LanguageSpec>,
}

impl LanguageTable {
    /// Build a table from explicit entries.
    pub fn new(languages: BTreeMap<String, LanguageSpec>) -> Self {
        Self { languages }
    }

    /// Interpreters available out of the box.
    pub fn interpreters() -> Self {
        let mut languages = BTreeMap::new();
        languages.insert(
            "python".to_string(),
            LanguageSpec::new(
                "py",
                &["/usr/bin/python3", "/usr/local/bin/python3", "/bin/python3"],
            ),
        );
        languages.insert(
            "javascript".to_string(),
            LanguageSpec::new("js", &["/usr/bin/node", "/usr/local/bin/node", "/bin/node"]),
        );
        languages.insert(
            "bash".to_string(),
            LanguageSpec::new("sh", &["/bin/bash", "/usr/bin/bash"]),
        );
        languages.insert(
            "sh".to_string(),
            LanguageSpec::new("sh", &["/bin/sh", "/usr/bin/sh"]),
        );
        Self { languages }
    }

    /// Compilers available out of the box.
    pub fn compilers() -> Self {
        let mut languages = BTreeMap::new();
        languages.insert(
            "c".to_string(),
            LanguageSpec::new("c", &["/usr/bin/gcc", "/usr/bin/cc", "/usr/local/bin/gcc"]),
        );
        languages.insert(
            "cpp".to_string(),
            LanguageSpec::new("cpp", &["/usr/bin/g++", "/usr/bin/c++", "/usr/local/bin/g++"]),
        );
        Self { languages }
    }

    /// Language names in this table.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }

    /// Check if the table has an entry for `language`.
    pub fn contains(&self, language: &str) -> bool {
        self.languages.contains_key(language)
    }

    /// Pick the first candidate that exists.
    ///
    /// With `image_root` set, existence is checked inside that root image;
    /// the returned path is still the in-image path.
    pub fn resolve(&self, language: &str, image_root: Option<&Path>) -> Result<Resolved> {
        let spec = self
            .languages
            .get(language)
            .ok_or_else(|| TunnelError::UnsupportedLanguage(language.to_string()))?;

        spec.candidates
            .iter()
            .find(|candidate| exists_in(candidate, image_root))
            .map(|program| Resolved {
                program: program.clone(),
                extension: spec.extension.clone(),
            })
            .ok_or_else(|| TunnelError::UnsupportedLanguage(language.to_string()))
    }
}

impl Default for LanguageTable {
    fn default() -> Self {
        Self::interpreters()
    }
}

fn exists_in(candidate: &Path, image_root: Option<&Path>) -> bool {
    if !candidate.is_absolute() {
        return false;
    }
    match image_root {
        Some(root) => candidate
            .strip_prefix("/")
            .map(|rel| root.join(rel).is_file())
            .unwrap_or(false),
        None => candidate.is_file(),
    }
}
