use std::sync::Arc;

use crate::db::models::Document;
use crate::editor::backup::{BackupRecord, LocalBackupStore};
use crate::models::document::{normalize_tags, ContentBlock, DocumentFields};
use crate::models::slug::DocumentId;
use crate::models::validation::{has_any_content, validate_for_publish, Violation};

/// The in-memory document an author is editing.
///
/// Every change that alters the fields is mirrored into the local backup
/// before the setter returns.
pub struct ContentBuffer {
    document_id: Option<DocumentId>,
    fields: DocumentFields,
    backup: Arc<LocalBackupStore>,
}

impl ContentBuffer {
    /// An empty buffer for a document that does not exist yet.
    pub fn new(backup: Arc<LocalBackupStore>) -> Self {
        Self {
            document_id: None,
            fields: DocumentFields::default(),
            backup,
        }
    }

    /// A buffer seeded from a recovered backup.
    pub fn restore(record: BackupRecord, backup: Arc<LocalBackupStore>) -> Self {
        Self {
            document_id: record.document_id,
            fields: record.fields.normalized(),
            backup,
        }
    }

    /// A buffer seeded from a stored document.
    pub fn from_document(doc: &Document, backup: Arc<LocalBackupStore>) -> Self {
        Self {
            document_id: Some(doc.id.clone()),
            fields: doc.fields(),
            backup,
        }
    }

    pub fn fields(&self) -> &DocumentFields {
        &self.fields
    }

    pub fn document_id(&self) -> Option<&DocumentId> {
        self.document_id.as_ref()
    }

    /// Record the id the persistence service assigned.
    ///
    /// An id is only taken once; later calls with a different id are ignored.
    pub fn assign_id(&mut self, id: DocumentId) {
        match &self.document_id {
            None => {
                self.document_id = Some(id);
                self.mirror();
            }
            Some(current) if *current != id => {
                tracing::warn!(current = %current, ignored = %id, "Buffer already has an id");
            }
            Some(_) => {}
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> bool {
        let title = title.into();
        self.edit(|fields| fields.title = title)
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> bool {
        let description = description.into();
        self.edit(|fields| fields.description = description)
    }

    pub fn set_banner(&mut self, banner: impl Into<String>) -> bool {
        let banner = banner.into();
        self.edit(|fields| fields.banner = banner)
    }

    /// Replace the tag set; tags are normalized on the way in.
    pub fn set_tags(&mut self, tags: &[String]) -> bool {
        let tags = normalize_tags(tags);
        self.edit(|fields| fields.tags = tags)
    }

    pub fn set_content_blocks(&mut self, blocks: Vec<ContentBlock>) -> bool {
        self.edit(|fields| fields.content_blocks = blocks)
    }

    /// Replace every field at once.
    pub fn replace(&mut self, fields: DocumentFields) -> bool {
        let fields = fields.normalized();
        self.edit(|current| *current = fields)
    }

    pub fn validate_for_publish(&self) -> Vec<Violation> {
        validate_for_publish(&self.fields)
    }

    pub fn has_any_content(&self) -> bool {
        has_any_content(&self.fields)
    }

    /// Apply `change`; returns whether the fields actually changed.
    fn edit(&mut self, change: impl FnOnce(&mut DocumentFields)) -> bool {
        let before = self.fields.clone();
        change(&mut self.fields);
        if self.fields == before {
            return false;
        }
        self.mirror();
        true
    }

    fn mirror(&self) {
        if self.has_any_content() {
            self.backup.save_fields(&self.fields, self.document_id.as_ref());
        }
    }
}
