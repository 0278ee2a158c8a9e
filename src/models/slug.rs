use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const ID_MIN_LEN: usize = 3;
pub const ID_MAX_LEN: usize = 100;

/// A URL-safe document identifier matching `[a-z0-9-]{3,100}`.
///
/// Assigned once, on a document's first save, and never regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Parse an identifier, rejecting anything outside the id alphabet.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        if is_valid_id(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(AppError::BadRequest(format!(
                "Invalid document id '{raw}'. Expected {ID_MIN_LEN}-{ID_MAX_LEN} characters of [a-z0-9-]"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

pub fn is_valid_id(raw: &str) -> bool {
    (ID_MIN_LEN..=ID_MAX_LEN).contains(&raw.len())
        && raw
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Turn a title into a slug base.
///
/// Lower-cases, drops everything outside `[a-z0-9]`, whitespace and `-`,
/// then joins the remaining words with single hyphens. The result never
/// starts or ends with a hyphen and may be empty.
pub fn normalize_title(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' {
            pending_hyphen = true;
        }
    }

    slug
}

/// Join `base` and `suffix` with a hyphen, shortening `base` so the result
/// stays within [`ID_MAX_LEN`] bytes.
pub(crate) fn compose_id(base: &str, suffix: &str) -> String {
    let budget = ID_MAX_LEN.saturating_sub(suffix.len() + 1);
    let cut = base
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|end| *end <= budget)
        .last()
        .unwrap_or(0);
    let base = base[..cut].trim_end_matches('-');
    if base.is_empty() {
        suffix.to_string()
    } else {
        format!("{base}-{suffix}")
    }
}
