use std::sync::Arc;

use tokio::sync::watch;

use crate::config::AutosaveConfig;
use crate::db::models::SaveDocumentResponse;
use crate::editor::autosave::{AutosaveScheduler, AutosaveSnapshot};
use crate::editor::backup::{BackupRecord, BackupSummary, LocalBackupStore};
use crate::editor::buffer::ContentBuffer;
use crate::editor::gateway::DocumentGateway;
use crate::error::AppError;
use crate::models::slug::DocumentId;

/// Collaborators shared by every editor session.
#[derive(Clone)]
pub struct EditorContext {
    pub gateway: Arc<dyn DocumentGateway>,
    pub backup: Arc<LocalBackupStore>,
    pub autosave: AutosaveConfig,
}

/// Result of opening the editor.
pub enum Mounted {
    Ready(EditorSession),
    /// A backup from an interrupted session is waiting; the author must
    /// choose what happens to it before editing starts.
    Recovery(RecoveryPrompt),
}

/// The restore-or-discard choice offered on mount.
pub struct RecoveryPrompt {
    ctx: EditorContext,
    record: BackupRecord,
    summary: BackupSummary,
}

impl RecoveryPrompt {
    pub fn summary(&self) -> &BackupSummary {
        &self.summary
    }

    /// Continue from the backup. The restored content is scheduled for
    /// autosave straight away.
    pub fn restore(self) -> EditorSession {
        tracing::info!(last_saved_at = %self.summary.last_saved_at, "Restoring draft from backup");
        let buffer = ContentBuffer::restore(self.record, self.ctx.backup.clone());
        let scheduler = AutosaveScheduler::spawn_with_backup(
            self.ctx.gateway.clone(),
            &self.ctx.autosave,
            buffer.document_id().cloned(),
            None,
            self.ctx.backup.clone(),
        );
        scheduler.touch(buffer.fields().clone());
        EditorSession::new(self.ctx, buffer, scheduler)
    }

    /// Drop the backup and start from an empty document.
    pub fn discard(self) -> EditorSession {
        tracing::info!("Discarding draft backup");
        self.ctx.backup.clear();
        EditorSession::empty(self.ctx)
    }
}

/// One author editing one document.
pub struct EditorSession {
    ctx: EditorContext,
    buffer: ContentBuffer,
    scheduler: AutosaveScheduler,
}

impl EditorSession {
    /// Open the editor, for `document_id` if given.
    ///
    /// When the id does not resolve to a stored document and a backup
    /// exists, the caller gets a [`RecoveryPrompt`] instead of a session.
    pub async fn mount(
        ctx: EditorContext,
        document_id: Option<&DocumentId>,
    ) -> Result<Mounted, AppError> {
        if let Some(id) = document_id {
            let timeout = ctx.autosave.manual_timeout();
            let fetched = tokio::time::timeout(timeout, ctx.gateway.fetch(id))
                .await
                .map_err(|_| AppError::Timeout(format!("Loading '{}' timed out", id)))?;

            match fetched {
                Ok(doc) => {
                    let buffer = ContentBuffer::from_document(&doc, ctx.backup.clone());
                    let scheduler = AutosaveScheduler::spawn_with_backup(
                        ctx.gateway.clone(),
                        &ctx.autosave,
                        Some(doc.id.clone()),
                        Some(buffer.fields()),
                        ctx.backup.clone(),
                    );
                    return Ok(Mounted::Ready(Self::new(ctx, buffer, scheduler)));
                }
                Err(AppError::NotFound(_)) => {
                    tracing::debug!(id = %id, "Document not found, checking for a backup");
                }
                Err(e) => return Err(e),
            }
        }

        match ctx.backup.load() {
            Some(record) => {
                let summary = BackupSummary::from(&record);
                Ok(Mounted::Recovery(RecoveryPrompt {
                    ctx,
                    record,
                    summary,
                }))
            }
            None => Ok(Mounted::Ready(Self::empty(ctx))),
        }
    }

    fn new(ctx: EditorContext, buffer: ContentBuffer, scheduler: AutosaveScheduler) -> Self {
        Self {
            ctx,
            buffer,
            scheduler,
        }
    }

    fn empty(ctx: EditorContext) -> Self {
        let buffer = ContentBuffer::new(ctx.backup.clone());
        let scheduler = AutosaveScheduler::spawn_with_backup(
            ctx.gateway.clone(),
            &ctx.autosave,
            None,
            None,
            ctx.backup.clone(),
        );
        Self::new(ctx, buffer, scheduler)
    }

    pub fn buffer(&self) -> &ContentBuffer {
        &self.buffer
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        self.buffer
            .document_id()
            .cloned()
            .or_else(|| self.scheduler.snapshot().document_id)
    }

    /// Apply an edit to the buffer. Returns whether anything changed;
    /// meaningful changes re-arm the autosave timer.
    pub fn edit(&mut self, change: impl FnOnce(&mut ContentBuffer) -> bool) -> bool {
        self.sync_id();
        let changed = change(&mut self.buffer);
        if changed {
            self.scheduler.touch(self.buffer.fields().clone());
        }
        changed
    }

    /// Save the buffer as a draft now.
    pub async fn save_now(&mut self) -> Result<SaveDocumentResponse, AppError> {
        let response = self.scheduler.save_now(self.buffer.fields().clone()).await?;
        self.buffer.assign_id(response.id.clone());
        Ok(response)
    }

    /// Publish the buffer.
    ///
    /// Violations found locally are returned without contacting the store.
    /// On success the local backup is dropped.
    pub async fn publish(&mut self) -> Result<SaveDocumentResponse, AppError> {
        let violations = self.buffer.validate_for_publish();
        if !violations.is_empty() {
            return Err(AppError::Validation(violations));
        }

        let response = self.scheduler.publish(self.buffer.fields().clone()).await?;
        self.buffer.assign_id(response.id.clone());
        self.ctx.backup.clear();
        tracing::info!(id = %response.id, "Document published from editor");
        Ok(response)
    }

    pub fn status(&self) -> AutosaveSnapshot {
        self.scheduler.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<AutosaveSnapshot> {
        self.scheduler.subscribe()
    }

    /// Abandon the local work: the backup is cleared and autosave stops.
    pub async fn discard(self) -> Result<(), AppError> {
        self.ctx.backup.clear();
        self.scheduler.shutdown().await
    }

    /// Close the editor, keeping the backup for a later visit.
    pub async fn close(self) -> Result<(), AppError> {
        self.scheduler.shutdown().await
    }

    fn sync_id(&mut self) {
        if self.buffer.document_id().is_none() {
            if let Some(id) = self.scheduler.snapshot().document_id {
                self.buffer.assign_id(id);
            }
        }
    }
}
