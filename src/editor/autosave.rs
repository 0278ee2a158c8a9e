//! Debounced background saving for the editor.
//!
//! The scheduler runs as a single tokio task that owns every timer and the
//! one in-flight save, so two saves for the same buffer can never overlap.

use std::collections::VecDeque;
use std::fmt;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::config::AutosaveConfig;
use crate::db::models::{SaveDocumentRequest, SaveDocumentResponse, SaveMode};
use crate::editor::backup::LocalBackupStore;
use crate::editor::gateway::DocumentGateway;
use crate::error::AppError;
use crate::models::document::DocumentFields;
use crate::models::slug::DocumentId;
use crate::models::validation::{has_any_content, Violation};

/// Why the last save did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveFailure {
    AuthExpired,
    Timeout,
    Validation(Vec<Violation>),
    Unknown(String),
}

impl SaveFailure {
    pub fn classify(err: &AppError) -> Self {
        match err {
            AppError::Auth(_) => SaveFailure::AuthExpired,
            AppError::Timeout(_) => SaveFailure::Timeout,
            AppError::Validation(violations) => SaveFailure::Validation(violations.clone()),
            other => SaveFailure::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for SaveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveFailure::AuthExpired => write!(f, "session expired, sign in again"),
            SaveFailure::Timeout => write!(f, "save timed out"),
            SaveFailure::Validation(violations) => {
                let fields: Vec<String> = violations.iter().map(|v| v.field.to_string()).collect();
                write!(f, "invalid fields: {}", fields.join(", "))
            }
            SaveFailure::Unknown(reason) => write!(f, "{reason}"),
        }
    }
}

/// User-visible save indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved { at: DateTime<Utc> },
    Error { reason: SaveFailure },
}

/// Where the scheduler's timers stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveState {
    Idle,
    /// A save fires at `deadline` unless another edit pushes it back.
    Armed { deadline: Instant },
    /// A save is in flight; `rearmed` means another one is already due.
    Saving { rearmed: bool },
    /// The last outcome stays on display until `until`.
    Cooldown { until: Instant },
}

/// Everything an editor UI needs to render the save indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct AutosaveSnapshot {
    pub state: AutosaveState,
    pub status: SaveStatus,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub document_id: Option<DocumentId>,
    /// Kept until the next save starts, after the status itself has reset.
    pub last_error: Option<SaveFailure>,
}

type SaveReply = oneshot::Sender<Result<SaveDocumentResponse, AppError>>;

enum Command {
    Touched(DocumentFields),
    SaveNow {
        fields: DocumentFields,
        mode: SaveMode,
        reply: SaveReply,
    },
    Shutdown,
}

struct ManualSave {
    fields: DocumentFields,
    mode: SaveMode,
    reply: SaveReply,
}

struct InFlight {
    fingerprint: String,
    reply: Option<SaveReply>,
}

/// Handle to the background autosave task.
pub struct AutosaveScheduler {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<AutosaveSnapshot>,
    task: JoinHandle<()>,
}

impl AutosaveScheduler {
    /// Start the scheduler for one buffer.
    ///
    /// `saved` is the field set known to be stored remotely under
    /// `document_id`; identical fields are then not re-sent.
    pub fn spawn(
        gateway: Arc<dyn DocumentGateway>,
        config: &AutosaveConfig,
        document_id: Option<DocumentId>,
        saved: Option<&DocumentFields>,
    ) -> Self {
        Self::start(gateway, config, document_id, saved, None)
    }

    /// Like [`spawn`](Self::spawn), and once the first save assigns an id
    /// it is written into `backup` so a reload updates the same document.
    pub fn spawn_with_backup(
        gateway: Arc<dyn DocumentGateway>,
        config: &AutosaveConfig,
        document_id: Option<DocumentId>,
        saved: Option<&DocumentFields>,
        backup: Arc<LocalBackupStore>,
    ) -> Self {
        Self::start(gateway, config, document_id, saved, Some(backup))
    }

    fn start(
        gateway: Arc<dyn DocumentGateway>,
        config: &AutosaveConfig,
        document_id: Option<DocumentId>,
        saved: Option<&DocumentFields>,
        backup: Option<Arc<LocalBackupStore>>,
    ) -> Self {
        let last_fingerprint = saved.map(DocumentFields::fingerprint);

        let worker = Worker {
            gateway,
            backup,
            debounce: config.debounce(),
            status_display: config.status_display(),
            autosave_timeout: config.autosave_timeout(),
            manual_timeout: config.manual_timeout(),
            latest: None,
            debounce_deadline: None,
            status_reset: None,
            in_flight: None,
            in_flight_meta: None,
            manual_queue: VecDeque::new(),
            document_id,
            last_fingerprint,
            status: SaveStatus::Idle,
            last_saved_at: None,
            last_error: None,
            snapshot_tx: None,
        };

        let (snapshot_tx, snapshot) = watch::channel(worker.snapshot());
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            Worker {
                snapshot_tx: Some(snapshot_tx),
                ..worker
            }
            .run(rx),
        );

        Self {
            commands,
            snapshot,
            task,
        }
    }

    /// Report an edit. Re-arms the debounce timer.
    pub fn touch(&self, fields: DocumentFields) {
        if self.commands.send(Command::Touched(fields)).is_err() {
            tracing::warn!("Autosave scheduler is gone, edit not scheduled");
        }
    }

    /// Save `fields` as a draft right away, waiting behind any running save.
    pub async fn save_now(
        &self,
        fields: DocumentFields,
    ) -> Result<SaveDocumentResponse, AppError> {
        self.request(fields, SaveMode::Draft).await
    }

    /// Publish `fields`, waiting behind any running save.
    pub async fn publish(&self, fields: DocumentFields) -> Result<SaveDocumentResponse, AppError> {
        self.request(fields, SaveMode::Publish).await
    }

    async fn request(
        &self,
        fields: DocumentFields,
        mode: SaveMode,
    ) -> Result<SaveDocumentResponse, AppError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::SaveNow {
                fields,
                mode,
                reply,
            })
            .map_err(|_| AppError::Internal("Autosave scheduler stopped".into()))?;

        response
            .await
            .map_err(|_| AppError::Internal("Autosave scheduler stopped".into()))?
    }

    pub fn snapshot(&self) -> AutosaveSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AutosaveSnapshot> {
        self.snapshot.clone()
    }

    /// Stop the task. A save already in flight is allowed to finish.
    pub async fn shutdown(self) -> Result<(), AppError> {
        let _ = self.commands.send(Command::Shutdown);
        self.task
            .await
            .map_err(|e| AppError::Internal(format!("Autosave task failed: {e}")))
    }
}

struct Worker {
    gateway: Arc<dyn DocumentGateway>,
    backup: Option<Arc<LocalBackupStore>>,
    debounce: Duration,
    status_display: Duration,
    autosave_timeout: Duration,
    manual_timeout: Duration,

    latest: Option<DocumentFields>,
    debounce_deadline: Option<Instant>,
    status_reset: Option<Instant>,
    in_flight: Option<BoxFuture<'static, Result<SaveDocumentResponse, AppError>>>,
    in_flight_meta: Option<InFlight>,
    manual_queue: VecDeque<ManualSave>,

    document_id: Option<DocumentId>,
    last_fingerprint: Option<String>,
    status: SaveStatus,
    last_saved_at: Option<DateTime<Utc>>,
    last_error: Option<SaveFailure>,
    snapshot_tx: Option<watch::Sender<AutosaveSnapshot>>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn poll_in_flight(
    in_flight: &mut Option<BoxFuture<'static, Result<SaveDocumentResponse, AppError>>>,
) -> Result<SaveDocumentResponse, AppError> {
    match in_flight {
        Some(save) => save.await,
        None => pending().await,
    }
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let idle = self.in_flight.is_none();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Touched(fields)) => self.on_touched(fields),
                    Some(Command::SaveNow { fields, mode, reply }) => {
                        self.manual_queue.push_back(ManualSave { fields, mode, reply });
                        self.start_next_manual();
                    }
                    Some(Command::Shutdown) | None => break,
                },
                result = poll_in_flight(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.on_save_finished(result);
                    self.start_next_manual();
                }
                _ = sleep_until_opt(self.debounce_deadline), if idle && self.debounce_deadline.is_some() => {
                    self.debounce_deadline = None;
                    self.on_debounce_fired();
                }
                _ = sleep_until_opt(self.status_reset), if idle && self.status_reset.is_some() => {
                    self.status_reset = None;
                    self.status = SaveStatus::Idle;
                }
            }
            self.publish_snapshot();
        }

        if let Some(save) = self.in_flight.take() {
            let result = save.await;
            self.on_save_finished(result);
        }
        for manual in self.manual_queue.drain(..) {
            let _ = manual
                .reply
                .send(Err(AppError::Internal("Autosave scheduler stopped".into())));
        }
        self.publish_snapshot();
        tracing::debug!("Autosave scheduler stopped");
    }

    fn on_touched(&mut self, fields: DocumentFields) {
        self.latest = Some(fields);
        self.debounce_deadline = Some(Instant::now() + self.debounce);
    }

    fn on_debounce_fired(&mut self) {
        let Some(fields) = self.latest.clone() else {
            return;
        };

        if !has_any_content(&fields) {
            tracing::debug!("Nothing to autosave yet, skipping");
            return;
        }

        if self.last_fingerprint.as_deref() == Some(fields.fingerprint().as_str()) {
            tracing::debug!("Buffer unchanged since last save, skipping");
            return;
        }

        self.start_save(fields, SaveMode::Draft, self.autosave_timeout, None);
    }

    fn start_next_manual(&mut self) {
        if self.in_flight.is_some() {
            return;
        }
        if let Some(manual) = self.manual_queue.pop_front() {
            // The manual save carries the newest fields; a pending debounce
            // for the same fields has nothing left to do.
            if self.latest.as_ref() == Some(&manual.fields) {
                self.debounce_deadline = None;
            }
            self.start_save(manual.fields, manual.mode, self.manual_timeout, Some(manual.reply));
        }
    }

    fn start_save(
        &mut self,
        fields: DocumentFields,
        mode: SaveMode,
        timeout: Duration,
        reply: Option<SaveReply>,
    ) {
        let fingerprint = fields.fingerprint();
        let request = match mode {
            SaveMode::Draft => SaveDocumentRequest::draft(self.document_id.clone(), fields),
            SaveMode::Publish => SaveDocumentRequest::publish(self.document_id.clone(), fields),
        };

        tracing::debug!(
            document_id = ?self.document_id,
            mode = ?mode,
            manual = reply.is_some(),
            "Starting save"
        );

        let gateway = self.gateway.clone();
        self.in_flight = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, gateway.save(request)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(format!(
                    "Save did not complete within {}ms",
                    timeout.as_millis()
                ))),
            }
        }));
        self.in_flight_meta = Some(InFlight { fingerprint, reply });
        self.status = SaveStatus::Saving;
        self.status_reset = None;
        self.last_error = None;
    }

    fn on_save_finished(&mut self, result: Result<SaveDocumentResponse, AppError>) {
        let Some(meta) = self.in_flight_meta.take() else {
            return;
        };

        match &result {
            Ok(response) => {
                if self.document_id.is_none() {
                    tracing::info!(id = %response.id, "Document received its id");
                    self.document_id = Some(response.id.clone());
                    if let Some(backup) = &self.backup {
                        backup.remember_id(&response.id);
                    }
                }
                let now = Utc::now();
                self.last_fingerprint = Some(meta.fingerprint);
                self.last_saved_at = Some(now);
                self.status = SaveStatus::Saved { at: now };
            }
            Err(err) => {
                let reason = SaveFailure::classify(err);
                tracing::warn!(error = %err, "Save failed");
                self.last_error = Some(reason.clone());
                self.status = SaveStatus::Error { reason };
            }
        }
        self.status_reset = Some(Instant::now() + self.status_display);

        if let Some(reply) = meta.reply {
            let _ = reply.send(result);
        }
    }

    fn state(&self) -> AutosaveState {
        if self.in_flight.is_some() {
            AutosaveState::Saving {
                rearmed: self.debounce_deadline.is_some() || !self.manual_queue.is_empty(),
            }
        } else if let Some(deadline) = self.debounce_deadline {
            AutosaveState::Armed { deadline }
        } else if let Some(until) = self.status_reset {
            AutosaveState::Cooldown { until }
        } else {
            AutosaveState::Idle
        }
    }

    fn snapshot(&self) -> AutosaveSnapshot {
        AutosaveSnapshot {
            state: self.state(),
            status: self.status.clone(),
            last_saved_at: self.last_saved_at,
            document_id: self.document_id.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn publish_snapshot(&self) {
        if let Some(tx) = &self.snapshot_tx {
            tx.send_replace(self.snapshot());
        }
    }
}
