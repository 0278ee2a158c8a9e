use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::db::models::Document;
use crate::error::AppError;
use crate::models::slug::DocumentId;

/// Repository trait for document operations.
///
/// Implementations must enforce uniqueness of `id` on insert: the
/// allocator's existence check is advisory, this is the real guarantee.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Find a document by its id.
    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>, AppError>;

    /// Whether any document already uses `id`.
    async fn exists(&self, id: &DocumentId) -> Result<bool, AppError> {
        Ok(self.find_by_id(id).await?.is_some())
    }

    /// Insert a new document.
    ///
    /// Fails with [`AppError::DuplicateId`] if the id is already taken.
    async fn insert(&self, doc: Document) -> Result<(), AppError>;

    /// Replace an existing document, matched by id.
    ///
    /// Fails with [`AppError::NotFound`] if no document has that id.
    async fn update(&self, doc: Document) -> Result<(), AppError>;
}

/// In-process implementation backed by a map.
///
/// The lock is held across the check and the insert, which makes
/// check-then-insert atomic.
#[derive(Default)]
pub struct InMemoryDocumentRepository {
    documents: Mutex<HashMap<DocumentId, Document>>,
}

impl InMemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<DocumentId, Document>>, AppError> {
        self.documents
            .lock()
            .map_err(|e| AppError::Database(format!("Document map poisoned: {e}")))
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>, AppError> {
        Ok(self.lock()?.get(id).cloned())
    }

    async fn insert(&self, doc: Document) -> Result<(), AppError> {
        let mut docs = self.lock()?;
        if docs.contains_key(&doc.id) {
            return Err(AppError::DuplicateId(doc.id.to_string()));
        }
        docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn update(&self, doc: Document) -> Result<(), AppError> {
        let mut docs = self.lock()?;
        match docs.get_mut(&doc.id) {
            Some(existing) => {
                *existing = doc;
                Ok(())
            }
            None => Err(AppError::NotFound(format!("Document '{}' not found", doc.id))),
        }
    }
}

/// MongoDB implementation of the DocumentRepository.
///
/// This is only available when the `server` feature is enabled.
#[cfg(feature = "server")]
pub struct MongoDocumentRepository {
    collection: mongodb::Collection<Document>,
}

#[cfg(feature = "server")]
const DUPLICATE_KEY_CODE: i32 = 11000;

#[cfg(feature = "server")]
impl MongoDocumentRepository {
    pub fn new(db: &mongodb::Database) -> Self {
        Self {
            collection: db.collection("documents"),
        }
    }

    /// Create the unique index on `id` that backs the allocator.
    pub async fn ensure_indexes(&self) -> Result<(), AppError> {
        use mongodb::bson::doc;
        use mongodb::options::IndexOptions;
        use mongodb::IndexModel;

        let index = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .name("documents_id_unique".to_string())
                    .build(),
            )
            .build();

        self.collection
            .create_index(index)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}

#[cfg(feature = "server")]
fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};

    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

#[cfg(feature = "server")]
#[async_trait]
impl DocumentRepository for MongoDocumentRepository {
    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>, AppError> {
        use mongodb::bson::doc;

        self.collection
            .find_one(doc! { "id": id.as_str() })
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn insert(&self, doc: Document) -> Result<(), AppError> {
        match self.collection.insert_one(&doc).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(AppError::DuplicateId(doc.id.to_string())),
            Err(e) => Err(AppError::Database(e.to_string())),
        }
    }

    async fn update(&self, doc: Document) -> Result<(), AppError> {
        use mongodb::bson::doc;

        let result = self
            .collection
            .replace_one(doc! { "id": doc.id.as_str() }, &doc)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.matched_count == 0 {
            return Err(AppError::NotFound(format!("Document '{}' not found", doc.id)));
        }

        Ok(())
    }
}
