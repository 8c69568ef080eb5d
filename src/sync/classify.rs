use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::remote::{RemoteError, RemoteErrorKind};

/// `action-failed` message for an action dropped because the upstream already applied it.
pub const DUPLICATE_RESOLVED: &str = "duplicate resolved";

static DEFAULT_SIGNATURES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)already exists|duplicate").unwrap());

/// Decides whether a failed call means "this mutation already landed".
///
/// A typed conflict (HTTP 409) always counts. Otherwise the error message is
/// matched case-insensitively against the configured signatures, each of
/// which is a literal phrase.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    pattern: Option<Regex>,
}

impl DuplicateDetector {
    pub fn from_signatures(signatures: &[String]) -> Result<Self, regex::Error> {
        let fragments: Vec<&str> = signatures
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        if fragments.is_empty() {
            return Ok(Self { pattern: None });
        }

        let alternation = fragments
            .iter()
            .map(|f| regex::escape(f))
            .collect::<Vec<_>>()
            .join("|");

        let pattern = RegexBuilder::new(&alternation)
            .case_insensitive(true)
            .build()?;

        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn is_duplicate(&self, err: &RemoteError) -> bool {
        if err.kind == RemoteErrorKind::Conflict {
            return true;
        }
        self.pattern
            .as_ref()
            .is_some_and(|re| re.is_match(&err.message))
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self {
            pattern: Some(DEFAULT_SIGNATURES.clone()),
        }
    }
}
