//! Identity normalization: the one entity-resolution rule.
//!
//! Two raw identifiers denote the same entity if and only if they normalize to
//! the same key. There is no fuzzy matching: a near-miss stays a miss.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static RESOLVER_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:https?://)?(?:dx\.)?doi\.org/|doi:\s*|info:doi/)").unwrap()
});
static TRAILING_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s.,;:]+$").unwrap());
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Canonical, comparable form of an external identifier.
///
/// Missing identifiers map to `Absent` rather than an empty string so that
/// records without an identifier are never unified into one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NormalizedKey {
    Key(String),
    Absent,
}

impl NormalizedKey {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            NormalizedKey::Key(k) => Some(k.as_str()),
            NormalizedKey::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, NormalizedKey::Absent)
    }

    /// Deterministic `globalId` for the entity this key names.
    pub fn global_id(&self) -> Option<String> {
        self.as_str().map(global_id)
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedKey::Key(k) => f.write_str(k),
            NormalizedKey::Absent => f.write_str("<absent>"),
        }
    }
}

/// Normalize a raw identifier (DOI, short name, keyword term).
///
/// Steps, in order: trim, case-fold, strip resolver prefixes, strip trailing
/// punctuation, collapse internal whitespace.
pub fn normalize(raw: &str) -> NormalizedKey {
    let mut key = raw.trim().to_lowercase();

    while let Some(m) = RESOLVER_PREFIX.find(&key) {
        key = key[m.end()..].trim_start().to_string();
    }

    let key = TRAILING_PUNCT.replace(&key, "");
    let key = WHITESPACE_RUN.replace_all(&key, " ");

    if key.is_empty() {
        NormalizedKey::Absent
    } else {
        NormalizedKey::Key(key.into_owned())
    }
}

/// Normalize an optional raw identifier; `None` is absent.
pub fn normalize_opt(raw: Option<&str>) -> NormalizedKey {
    raw.map(normalize).unwrap_or(NormalizedKey::Absent)
}

/// Name-based UUID for an already-normalized key.
pub fn global_id(normalized: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, normalized.as_bytes()).to_string()
}
