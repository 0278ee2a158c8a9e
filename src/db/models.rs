use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::document::{ContentBlock, DocumentFields};
use crate::models::slug::DocumentId;

/// A document as stored in the `documents` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// The URL-safe slug. Unique across all documents; never changes.
    pub id: DocumentId,
    /// Owning author's user id. Never changes after creation.
    pub author: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// External image URL; empty while no banner is set.
    #[serde(default)]
    pub banner: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub content_blocks: Vec<ContentBlock>,
    pub is_draft: bool,
    /// Fingerprint of the editable fields, see [`DocumentFields::fingerprint`].
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set exactly once, when the document leaves draft state.
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl Document {
    /// The editable part of the document.
    pub fn fields(&self) -> DocumentFields {
        DocumentFields {
            title: self.title.clone(),
            description: self.description.clone(),
            banner: self.banner.clone(),
            tags: self.tags.clone(),
            content_blocks: self.content_blocks.clone(),
        }
    }

    /// Overwrite the editable part, refreshing the fingerprint.
    pub fn apply_fields(&mut self, fields: DocumentFields) {
        self.content_hash = fields.fingerprint();
        self.title = fields.title;
        self.description = fields.description;
        self.banner = fields.banner;
        self.tags = fields.tags;
        self.content_blocks = fields.content_blocks;
    }
}

/// Whether a save keeps the document a draft or publishes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    Draft,
    Publish,
}

impl SaveMode {
    pub fn from_draft_flag(draft: bool) -> Self {
        if draft {
            SaveMode::Draft
        } else {
            SaveMode::Publish
        }
    }

    pub fn is_draft(self) -> bool {
        self == SaveMode::Draft
    }
}

/// What a save targets: a document that has no id yet, or one that has.
///
/// Keeps "create" and "update" apart at the boundary instead of inferring
/// them from whether an `id` field happens to be present.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveCommand {
    NewDocument {
        fields: DocumentFields,
        mode: SaveMode,
    },
    ExistingDocument {
        id: DocumentId,
        fields: DocumentFields,
        mode: SaveMode,
    },
}

impl SaveCommand {
    pub fn mode(&self) -> SaveMode {
        match self {
            SaveCommand::NewDocument { mode, .. } | SaveCommand::ExistingDocument { mode, .. } => {
                *mode
            }
        }
    }
}

/// Request body for both save endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDocumentRequest {
    /// Absent on a document's first save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub fields: DocumentFields,
    /// `false` asks for the document to be published.
    #[serde(default = "default_draft")]
    pub draft: bool,
}

fn default_draft() -> bool {
    true
}

impl SaveDocumentRequest {
    pub fn draft(id: Option<DocumentId>, fields: DocumentFields) -> Self {
        Self {
            id: id.map(String::from),
            fields,
            draft: true,
        }
    }

    pub fn publish(id: Option<DocumentId>, fields: DocumentFields) -> Self {
        Self {
            draft: false,
            ..Self::draft(id, fields)
        }
    }
}

impl TryFrom<SaveDocumentRequest> for SaveCommand {
    type Error = AppError;

    fn try_from(request: SaveDocumentRequest) -> Result<Self, Self::Error> {
        let mode = SaveMode::from_draft_flag(request.draft);
        match request.id.as_deref().map(str::trim) {
            None | Some("") => Ok(SaveCommand::NewDocument {
                fields: request.fields,
                mode,
            }),
            Some(raw) => Ok(SaveCommand::ExistingDocument {
                id: DocumentId::parse(raw)?,
                fields: request.fields,
                mode,
            }),
        }
    }
}

/// Response from a successful save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveDocumentResponse {
    /// The resolved document id.
    pub id: DocumentId,
    /// Present only when this save created the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub is_draft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}
