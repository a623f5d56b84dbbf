//! Person-name recognition over report text.
//!
//! `RuleRecognizer` finds honorific-led names out of the box. When the
//! provisioned model asset (a given-name lexicon, one name per line) is
//! available it also picks up capitalised name sequences starting with a
//! known given name.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::ExtractError;

/// Finds candidate person names in free text, in document order.
pub trait PersonRecognizer: Send + Sync {
    fn persons(&self, text: &str) -> Vec<String>;
}

static HONORIFIC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:Mr|Mrs|Ms|Miss|Dr|Shri|Smt|Sh)\.?\s+[A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+){0,3}")
        .expect("valid honorific regex")
});

static CAPITALISED_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+){1,3}").expect("valid capitalised regex")
});

/// Rule-based recogniser with an optional given-name lexicon.
#[derive(Debug, Default, Clone)]
pub struct RuleRecognizer {
    given_names: HashSet<String>,
}

impl RuleRecognizer {
    /// Honorific rules only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_given_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let given_names = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_lowercase())
            .filter(|n| !n.is_empty() && !n.starts_with('#'))
            .collect();
        Self { given_names }
    }

    /// Load the lexicon asset. `#` starts a comment line.
    pub fn from_lexicon_file(path: &Path) -> Result<Self, ExtractError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ExtractError::Lexicon {
            path: path.to_path_buf(),
            source,
        })?;
        let recognizer = Self::with_given_names(raw.lines());
        debug!(
            names = recognizer.given_names.len(),
            path = %path.display(),
            "Loaded given-name lexicon"
        );
        Ok(recognizer)
    }

    /// Use the lexicon at `path` when it exists, otherwise honorific rules only.
    pub fn from_optional_lexicon(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }
        match Self::from_lexicon_file(path) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "Name lexicon unavailable, using rules only");
                Self::new()
            }
        }
    }

    pub fn lexicon_size(&self) -> usize {
        self.given_names.len()
    }
}

impl PersonRecognizer for RuleRecognizer {
    fn persons(&self, text: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = HONORIFIC_NAME
            .find_iter(text)
            .map(|m| (m.start(), m.as_str().to_string()))
            .collect();

        if !self.given_names.is_empty() {
            for m in CAPITALISED_RUN.find_iter(text) {
                let first = m.as_str().split_whitespace().next().unwrap_or("");
                if self.given_names.contains(&first.to_lowercase()) {
                    found.push((m.start(), m.as_str().to_string()));
                }
            }
        }

        found.sort_by_key(|(pos, _)| *pos);
        found.dedup_by(|a, b| a.1 == b.1);
        found.into_iter().map(|(_, name)| name).collect()
    }
}
