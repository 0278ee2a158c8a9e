use chrono::{DateTime, Utc};

use crate::auth::models::AuthenticatedUser;
use crate::db::allocator::SlugAllocator;
use crate::db::models::{Document, SaveCommand, SaveDocumentRequest, SaveDocumentResponse, SaveMode};
use crate::db::repository::DocumentRepository;
use crate::error::AppError;
use crate::models::document::DocumentFields;
use crate::models::slug::DocumentId;
use crate::models::validation::validate_for_publish;

/// Core save logic, separated from the HTTP layer for testability.
///
/// Creates the document when the command carries no id (allocating one),
/// otherwise updates it in place. Publishing runs the validation gate before
/// anything is written; updates check existence and ownership before that.
pub async fn process_save(
    repo: &dyn DocumentRepository,
    allocator: &SlugAllocator,
    author: &AuthenticatedUser,
    command: SaveCommand,
) -> Result<SaveDocumentResponse, AppError> {
    tracing::debug!(mode = ?command.mode(), author = %author.user_id, "Processing save");

    match command {
        SaveCommand::NewDocument { fields, mode } => {
            create_document(repo, allocator, author, fields.normalized(), mode).await
        }
        SaveCommand::ExistingDocument { id, fields, mode } => {
            update_document(repo, author, &id, fields.normalized(), mode).await
        }
    }
}

/// Save logic for requests that explicitly target an existing document.
///
/// The id comes from the path; a body id, if present, must agree with it.
pub async fn process_update_existing(
    repo: &dyn DocumentRepository,
    allocator: &SlugAllocator,
    author: &AuthenticatedUser,
    id: &str,
    request: SaveDocumentRequest,
) -> Result<SaveDocumentResponse, AppError> {
    let id = DocumentId::parse(id)?;

    if let Some(body_id) = request.id.as_deref().map(str::trim) {
        if !body_id.is_empty() && body_id != id.as_str() {
            return Err(AppError::BadRequest(format!(
                "Body id '{}' does not match path id '{}'",
                body_id, id
            )));
        }
    }

    let command = SaveCommand::ExistingDocument {
        id,
        fields: request.fields,
        mode: SaveMode::from_draft_flag(request.draft),
    };

    process_save(repo, allocator, author, command).await
}

/// Load a document for `reader`.
///
/// Drafts are visible to their author only; published documents to anyone
/// with a session.
pub async fn process_get(
    repo: &dyn DocumentRepository,
    reader: &AuthenticatedUser,
    id: &str,
) -> Result<Document, AppError> {
    let id = DocumentId::parse(id)?;

    let doc = repo
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document '{}' not found", id)))?;

    if doc.is_draft && !reader.owns(&doc.author) {
        return Err(AppError::Forbidden(format!(
            "Document '{}' is a draft owned by another author",
            id
        )));
    }

    Ok(doc)
}

async fn create_document(
    repo: &dyn DocumentRepository,
    allocator: &SlugAllocator,
    author: &AuthenticatedUser,
    fields: DocumentFields,
    mode: SaveMode,
) -> Result<SaveDocumentResponse, AppError> {
    if mode == SaveMode::Publish {
        ensure_publishable(&fields)?;
    }

    let allocation = allocator.allocate(&fields.title, repo).await?;
    let mut doc = new_document(allocation.id, author, fields, mode, Utc::now());

    // The existence check inside the allocator can race with another
    // session's insert; the storage constraint is what decides.
    match repo.insert(doc.clone()).await {
        Ok(()) => {}
        Err(AppError::DuplicateId(lost)) => {
            tracing::warn!(id = %lost, "Lost identifier race on insert, allocating a fresh id");
            doc.id = allocator.allocate(&doc.title, repo).await?.id;
            repo.insert(doc.clone()).await?;
        }
        Err(err) => return Err(err),
    }

    tracing::info!(
        id = %doc.id,
        author = %doc.author,
        is_draft = doc.is_draft,
        attempts = allocation.attempts,
        "Document created"
    );

    Ok(SaveDocumentResponse {
        id: doc.id,
        created_at: Some(doc.created_at),
        is_draft: doc.is_draft,
        published_at: doc.published_at,
    })
}

async fn update_document(
    repo: &dyn DocumentRepository,
    author: &AuthenticatedUser,
    id: &DocumentId,
    fields: DocumentFields,
    mode: SaveMode,
) -> Result<SaveDocumentResponse, AppError> {
    let existing = repo
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document '{}' not found", id)))?;

    if !author.owns(&existing.author) {
        return Err(AppError::Forbidden(format!(
            "Document '{}' belongs to another author",
            id
        )));
    }

    // A published document must keep satisfying the publish rules, even
    // when the caller only asked for a draft save.
    if mode == SaveMode::Publish || !existing.is_draft {
        ensure_publishable(&fields)?;
    }

    let publishing = existing.is_draft && mode == SaveMode::Publish;
    if !publishing && fields.fingerprint() == existing.content_hash {
        tracing::debug!(id = %id, "Document unchanged, skipping write");
        return Ok(response_for(&existing));
    }

    let now = Utc::now();
    let mut doc = existing;
    doc.apply_fields(fields);
    doc.updated_at = now;
    if publishing {
        doc.is_draft = false;
        doc.published_at = doc.published_at.or(Some(now));
    }

    repo.update(doc.clone()).await?;

    if publishing {
        tracing::info!(id = %doc.id, author = %doc.author, "Document published");
    } else {
        tracing::debug!(id = %doc.id, "Document updated");
    }

    Ok(response_for(&doc))
}

fn ensure_publishable(fields: &DocumentFields) -> Result<(), AppError> {
    let violations = validate_for_publish(fields);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(violations))
    }
}

fn new_document(
    id: DocumentId,
    author: &AuthenticatedUser,
    fields: DocumentFields,
    mode: SaveMode,
    now: DateTime<Utc>,
) -> Document {
    let published_at = (mode == SaveMode::Publish).then_some(now);
    Document {
        id,
        author: author.user_id.clone(),
        content_hash: fields.fingerprint(),
        title: fields.title,
        description: fields.description,
        banner: fields.banner,
        tags: fields.tags,
        content_blocks: fields.content_blocks,
        is_draft: mode.is_draft(),
        created_at: now,
        updated_at: now,
        published_at,
    }
}

fn response_for(doc: &Document) -> SaveDocumentResponse {
    SaveDocumentResponse {
        id: doc.id.clone(),
        created_at: None,
        is_draft: doc.is_draft,
        published_at: doc.published_at,
    }
}

/// Axum handler for `POST /api/v1/documents`.
///
/// Creates the document when the body has no `id`, updates it otherwise.
#[cfg(feature = "server")]
pub async fn save_document_handler(
    axum::extract::State(state): axum::extract::State<crate::app::AppState>,
    user: AuthenticatedUser,
    axum::Json(request): axum::Json<SaveDocumentRequest>,
) -> Result<axum::Json<SaveDocumentResponse>, AppError> {
    let command = SaveCommand::try_from(request)?;
    let response = process_save(
        state.document_repo.as_ref(),
        &state.allocator,
        &user,
        command,
    )
    .await?;

    Ok(axum::Json(response))
}

/// Axum handler for `PUT /api/v1/documents/{id}`.
#[cfg(feature = "server")]
pub async fn update_document_handler(
    axum::extract::State(state): axum::extract::State<crate::app::AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
    user: AuthenticatedUser,
    axum::Json(request): axum::Json<SaveDocumentRequest>,
) -> Result<axum::Json<SaveDocumentResponse>, AppError> {
    let response = process_update_existing(
        state.document_repo.as_ref(),
        &state.allocator,
        &user,
        &id,
        request,
    )
    .await?;

    Ok(axum::Json(response))
}

/// Axum handler for `GET /api/v1/documents/{id}`.
#[cfg(feature = "server")]
pub async fn get_document_handler(
    axum::extract::State(state): axum::extract::State<crate::app::AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
    user: AuthenticatedUser,
) -> Result<axum::Json<Document>, AppError> {
    let doc = process_get(state.document_repo.as_ref(), &user, &id).await?;
    Ok(axum::Json(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::InMemoryDocumentRepository;
    use crate::models::document::ContentBlock;
    use crate::models::validation::{DocumentField, Violation};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    // -- Mock implementations --

    /// Wraps the in-memory store and rejects the first `collisions` inserts
    /// as duplicates, as if another session had won the race.
    struct RacingRepo {
        inner: InMemoryDocumentRepository,
        collisions: AtomicU32,
        inserted_ids: Mutex<Vec<String>>,
    }

    impl RacingRepo {
        fn new(collisions: u32) -> Self {
            Self {
                inner: InMemoryDocumentRepository::new(),
                collisions: AtomicU32::new(collisions),
                inserted_ids: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl DocumentRepository for RacingRepo {
        async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>, AppError> {
            self.inner.find_by_id(id).await
        }

        async fn insert(&self, doc: Document) -> Result<(), AppError> {
            self.inserted_ids.lock().unwrap().push(doc.id.to_string());
            let remaining = self.collisions.load(Ordering::SeqCst);
            if remaining > 0 {
                self.collisions.store(remaining - 1, Ordering::SeqCst);
                return Err(AppError::DuplicateId(doc.id.to_string()));
            }
            self.inner.insert(doc).await
        }

        async fn update(&self, doc: Document) -> Result<(), AppError> {
            self.inner.update(doc).await
        }
    }

    fn author() -> AuthenticatedUser {
        AuthenticatedUser::new("user-1", "author@example.com")
    }

    fn publishable() -> DocumentFields {
        DocumentFields {
            title: "My First Post!".to_string(),
            description: "An introduction".to_string(),
            banner: "https://img.example.com/banner.png".to_string(),
            tags: vec!["Rust".to_string()],
            content_blocks: vec![ContentBlock::Paragraph {
                text: "Hello world".to_string(),
            }],
        }
    }

    fn new_draft(fields: DocumentFields) -> SaveCommand {
        SaveCommand::NewDocument {
            fields,
            mode: SaveMode::Draft,
        }
    }

    fn existing(id: &DocumentId, fields: DocumentFields, mode: SaveMode) -> SaveCommand {
        SaveCommand::ExistingDocument {
            id: id.clone(),
            fields,
            mode,
        }
    }

    #[tokio::test]
    async fn test_create_draft_allocates_id() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();

        let response = process_save(&repo, &allocator, &author(), new_draft(publishable()))
            .await
            .unwrap();

        assert!(response.id.as_str().starts_with("my-first-post-"));
        assert!(response.created_at.is_some());
        assert!(response.is_draft);
        assert!(response.published_at.is_none());

        let stored = repo.find_by_id(&response.id).await.unwrap().unwrap();
        assert_eq!(stored.author, "user-1");
        assert_eq!(stored.tags, vec!["rust"]);
        assert!(stored.is_draft);
    }

    #[tokio::test]
    async fn test_draft_accepts_missing_fields() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();
        let fields = DocumentFields {
            title: "Just a title".to_string(),
            ..Default::default()
        };

        let response = process_save(&repo, &allocator, &author(), new_draft(fields))
            .await
            .unwrap();

        let stored = repo.find_by_id(&response.id).await.unwrap().unwrap();
        assert!(stored.description.is_empty());
        assert!(stored.banner.is_empty());
        assert!(stored.tags.is_empty());
        assert!(stored.content_blocks.is_empty());
    }

    #[tokio::test]
    async fn test_update_never_changes_id() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();
        let created = process_save(&repo, &allocator, &author(), new_draft(publishable()))
            .await
            .unwrap();

        for i in 0..5 {
            let mut fields = publishable();
            fields.title = format!("A completely different title {i}");
            let response = process_save(
                &repo,
                &allocator,
                &author(),
                existing(&created.id, fields, SaveMode::Draft),
            )
            .await
            .unwrap();
            assert_eq!(response.id, created.id);
            assert!(response.created_at.is_none());
        }

        assert_eq!(repo.len(), 1);
        let stored = repo.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "A completely different title 4");
    }

    #[tokio::test]
    async fn test_publish_missing_banner_is_rejected_without_persisting() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();
        let mut fields = publishable();
        fields.banner = String::new();

        let command = SaveCommand::NewDocument {
            fields,
            mode: SaveMode::Publish,
        };
        match process_save(&repo, &allocator, &author(), command).await.unwrap_err() {
            AppError::Validation(violations) => assert_eq!(
                violations,
                vec![Violation {
                    field: DocumentField::Banner,
                    reason: "required".to_string()
                }]
            ),
            other => panic!("Expected Validation error, got: {:?}", other),
        }
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn test_publish_reports_every_violation() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();
        let created = process_save(
            &repo,
            &allocator,
            &author(),
            new_draft(DocumentFields {
                title: "Draft".to_string(),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

        let fields = DocumentFields {
            title: "Draft".to_string(),
            ..Default::default()
        };
        let err = process_save(
            &repo,
            &allocator,
            &author(),
            existing(&created.id, fields, SaveMode::Publish),
        )
        .await
        .unwrap_err();

        match err {
            AppError::Validation(violations) => {
                let fields: Vec<DocumentField> = violations.iter().map(|v| v.field).collect();
                assert_eq!(
                    fields,
                    vec![
                        DocumentField::Description,
                        DocumentField::Banner,
                        DocumentField::Tags,
                        DocumentField::ContentBlocks
                    ]
                );
            }
            other => panic!("Expected Validation error, got: {:?}", other),
        }

        let stored = repo.find_by_id(&created.id).await.unwrap().unwrap();
        assert!(stored.is_draft);
    }

    #[tokio::test]
    async fn test_publish_sets_published_at_once() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();
        let created = process_save(&repo, &allocator, &author(), new_draft(publishable()))
            .await
            .unwrap();

        let published = process_save(
            &repo,
            &allocator,
            &author(),
            existing(&created.id, publishable(), SaveMode::Publish),
        )
        .await
        .unwrap();
        assert!(!published.is_draft);
        let first_published_at = published.published_at.unwrap();

        let mut edited = publishable();
        edited.description = "Edited after publishing".to_string();
        let again = process_save(
            &repo,
            &allocator,
            &author(),
            existing(&created.id, edited, SaveMode::Publish),
        )
        .await
        .unwrap();
        assert_eq!(again.published_at, Some(first_published_at));

        // A draft save does not unpublish.
        let draft_save = process_save(
            &repo,
            &allocator,
            &author(),
            existing(&created.id, publishable(), SaveMode::Draft),
        )
        .await
        .unwrap();
        assert!(!draft_save.is_draft);
        assert_eq!(draft_save.published_at, Some(first_published_at));
    }

    #[tokio::test]
    async fn test_published_document_cannot_lose_required_fields() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();
        let created = process_save(
            &repo,
            &allocator,
            &author(),
            SaveCommand::NewDocument {
                fields: publishable(),
                mode: SaveMode::Publish,
            },
        )
        .await
        .unwrap();
        assert!(!created.is_draft);
        assert!(created.published_at.is_some());

        let mut stripped = publishable();
        stripped.tags.clear();
        let err = process_save(
            &repo,
            &allocator,
            &author(),
            existing(&created.id, stripped, SaveMode::Draft),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(ref v) if v.len() == 1));
    }

    #[tokio::test]
    async fn test_identical_update_is_a_noop() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();
        let created = process_save(&repo, &allocator, &author(), new_draft(publishable()))
            .await
            .unwrap();
        let before = repo.find_by_id(&created.id).await.unwrap().unwrap();

        let first = process_save(
            &repo,
            &allocator,
            &author(),
            existing(&created.id, publishable(), SaveMode::Draft),
        )
        .await
        .unwrap();
        let second = process_save(
            &repo,
            &allocator,
            &author(),
            existing(&created.id, publishable(), SaveMode::Draft),
        )
        .await
        .unwrap();

        assert_eq!(first, second);
        let after = repo.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_update_rejects_other_author() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();
        let created = process_save(&repo, &allocator, &author(), new_draft(publishable()))
            .await
            .unwrap();

        let intruder = AuthenticatedUser::new("user-2", "other@example.com");
        let err = process_save(
            &repo,
            &allocator,
            &intruder,
            existing(&created.id, publishable(), SaveMode::Draft),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_invalid_publish_by_other_author_is_forbidden() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();
        let created = process_save(&repo, &allocator, &author(), new_draft(publishable()))
            .await
            .unwrap();

        let intruder = AuthenticatedUser::new("user-2", "other@example.com");
        let err = process_save(
            &repo,
            &allocator,
            &intruder,
            existing(&created.id, DocumentFields::default(), SaveMode::Publish),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_invalid_publish_of_unknown_id_is_not_found() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();

        let err = process_update_existing(
            &repo,
            &allocator,
            &author(),
            "does-not-exist",
            SaveDocumentRequest::publish(None, DocumentFields::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_unknown_id() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();

        let err = process_update_existing(
            &repo,
            &allocator,
            &author(),
            "does-not-exist",
            SaveDocumentRequest::draft(None, publishable()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_existing_rejects_mismatched_body_id() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();
        let body_id = DocumentId::parse("other-doc").unwrap();

        let err = process_update_existing(
            &repo,
            &allocator,
            &author(),
            "path-doc",
            SaveDocumentRequest::draft(Some(body_id), publishable()),
        )
        .await
        .unwrap_err();
        match err {
            AppError::BadRequest(msg) => assert!(msg.contains("does not match")),
            other => panic!("Expected BadRequest error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lost_race_retries_once_with_fresh_id() {
        let repo = RacingRepo::new(1);
        let allocator = SlugAllocator::default();

        let response = process_save(&repo, &allocator, &author(), new_draft(publishable()))
            .await
            .unwrap();

        let attempts = repo.inserted_ids.lock().unwrap().clone();
        assert_eq!(attempts.len(), 2);
        assert_ne!(attempts[0], attempts[1]);
        assert_eq!(attempts[1], response.id.as_str());
        assert!(repo.find_by_id(&response.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lost_race_twice_is_a_hard_failure() {
        let repo = RacingRepo::new(2);
        let allocator = SlugAllocator::default();

        let err = process_save(&repo, &allocator, &author(), new_draft(publishable()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateId(_)));
        assert_eq!(repo.inserted_ids.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_creates_with_same_title_get_distinct_ids() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();
        let user = author();

        let saves = (0..8).map(|_| {
            process_save(
                &repo,
                &allocator,
                &user,
                new_draft(DocumentFields {
                    title: "Same Title".to_string(),
                    ..Default::default()
                }),
            )
        });
        let results = futures::future::join_all(saves).await;

        let mut ids: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().id.to_string())
            .collect();
        assert!(ids.iter().all(|id| id.starts_with("same-title-")));
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(repo.len(), 8);
    }

    #[tokio::test]
    async fn test_get_hides_drafts_from_other_authors() {
        let repo = InMemoryDocumentRepository::new();
        let allocator = SlugAllocator::default();
        let created = process_save(&repo, &allocator, &author(), new_draft(publishable()))
            .await
            .unwrap();

        let doc = process_get(&repo, &author(), created.id.as_str()).await.unwrap();
        assert_eq!(doc.id, created.id);

        let reader = AuthenticatedUser::new("user-2", "reader@example.com");
        let err = process_get(&repo, &reader, created.id.as_str()).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        process_save(
            &repo,
            &allocator,
            &author(),
            existing(&created.id, publishable(), SaveMode::Publish),
        )
        .await
        .unwrap();
        assert!(process_get(&repo, &reader, created.id.as_str()).await.is_ok());
    }
}
