use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::document::DocumentFields;

/// Maximum title length, in characters.
pub const TITLE_MAX_CHARS: usize = 100;
/// Maximum description length, in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 200;
/// Minimum number of tags a published document carries.
pub const TAGS_MIN: usize = 1;
/// Maximum number of tags a published document carries.
pub const TAGS_MAX: usize = 5;

pub const REASON_REQUIRED: &str = "required";
pub const REASON_INVALID_URL: &str = "invalid url";

/// The editable fields a violation can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentField {
    Title,
    Description,
    Banner,
    Tags,
    ContentBlocks,
}

impl fmt::Display for DocumentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentField::Title => write!(f, "title"),
            DocumentField::Description => write!(f, "description"),
            DocumentField::Banner => write!(f, "banner"),
            DocumentField::Tags => write!(f, "tags"),
            DocumentField::ContentBlocks => write!(f, "contentBlocks"),
        }
    }
}

/// A single publish-time rule a document fails, tagged with its field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub field: DocumentField,
    pub reason: String,
}

impl Violation {
    pub fn new(field: DocumentField, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }

    pub fn required(field: DocumentField) -> Self {
        Self::new(field, REASON_REQUIRED)
    }

    fn too_long(field: DocumentField, max: usize) -> Self {
        Self::new(field, format!("must be at most {max} characters"))
    }
}

/// Evaluate every publish invariant against `fields`.
///
/// Returns all violations found, in field order; an empty list means the
/// document may be published. Never mutates its input.
pub fn validate_for_publish(fields: &DocumentFields) -> Vec<Violation> {
    let mut violations = Vec::new();

    if fields.title.trim().is_empty() {
        violations.push(Violation::required(DocumentField::Title));
    } else if fields.title.chars().count() > TITLE_MAX_CHARS {
        violations.push(Violation::too_long(DocumentField::Title, TITLE_MAX_CHARS));
    }

    if fields.description.trim().is_empty() {
        violations.push(Violation::required(DocumentField::Description));
    } else if fields.description.chars().count() > DESCRIPTION_MAX_CHARS {
        violations.push(Violation::too_long(
            DocumentField::Description,
            DESCRIPTION_MAX_CHARS,
        ));
    }

    let banner = fields.banner.trim();
    if banner.is_empty() {
        violations.push(Violation::required(DocumentField::Banner));
    } else if url::Url::parse(banner).is_err() {
        violations.push(Violation::new(DocumentField::Banner, REASON_INVALID_URL));
    }

    let tag_count = fields.tags.len();
    if tag_count < TAGS_MIN {
        violations.push(Violation::required(DocumentField::Tags));
    } else if tag_count > TAGS_MAX {
        violations.push(Violation::new(
            DocumentField::Tags,
            format!("must have at most {TAGS_MAX} tags"),
        ));
    } else if fields.tags.iter().any(|t| t.trim().is_empty()) {
        violations.push(Violation::new(DocumentField::Tags, "must not contain empty tags"));
    }

    if fields.content_blocks.is_empty() {
        violations.push(Violation::required(DocumentField::ContentBlocks));
    } else if fields.content_blocks.iter().all(|b| b.is_trivial()) {
        violations.push(Violation::new(
            DocumentField::ContentBlocks,
            "must contain at least one non-empty block",
        ));
    }

    violations
}

/// Whether the fields hold anything worth persisting as a draft.
pub fn has_any_content(fields: &DocumentFields) -> bool {
    !fields.title.trim().is_empty()
        || !fields.description.trim().is_empty()
        || !fields.content_blocks.is_empty()
}
