//! Application state shared across all route handlers.
//!
//! AppState holds references to all services and shared resources.
//! It is passed to handlers via axum's State extractor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use uuid::Uuid;

use scanshelf_core::config::ScanshelfConfig;
use scanshelf_core::error::ScanshelfError;
use scanshelf_core::events::EventBus;
use scanshelf_core::lifecycle::{OperationSlot, OperationState, SlotGuard};
use scanshelf_core::types::OperationKind;
use scanshelf_ocr::{ExportOptions, Extractor, OcrEngine};
use scanshelf_storage::{
    AuthService, BlobStore, CommentHub, CommentRepository, CommentService, Database,
    UploadOrchestrator, UploadRepository,
};

/// Per-user operation slots, one per [`OperationKind`].
///
/// A user runs at most one operation at a time, whatever its kind; each
/// kind keeps its own slot so `/progress` can report them separately.
/// Slots are created on first use and live for the life of the process.
#[derive(Clone, Default)]
pub struct SlotRegistry {
    slots: Arc<Mutex<HashMap<(Uuid, OperationKind), OperationSlot>>>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot for `user_id` and `kind`, created Idle if missing.
    pub fn slot(&self, user_id: Uuid, kind: OperationKind) -> OperationSlot {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry((user_id, kind)).or_default().clone()
    }

    /// Start a `kind` operation for `user_id`.
    ///
    /// Fails with `AlreadyRunning` while any of the user's slots is Running.
    pub fn begin(&self, user_id: Uuid, kind: OperationKind) -> Result<SlotGuard, ScanshelfError> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let busy = slots.iter().find(|((owner, other), slot)| {
            *owner == user_id && *other != kind && slot.state() == OperationState::Running
        });
        if let Some(((_, running), _)) = busy {
            return Err(ScanshelfError::AlreadyRunning(format!(
                "{} is in progress",
                running
            )));
        }
        slots.entry((user_id, kind)).or_default().begin()
    }
}

/// Shared application state.
///
/// All fields use `Arc` (or are cheap handles) for cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration. Read-only once the server starts.
    pub config: Arc<ScanshelfConfig>,
    /// SQLite database for persistent storage.
    pub database: Arc<Database>,
    /// Accounts and sessions.
    pub auth: Arc<AuthService>,
    /// Blob + metadata coordination for uploaded files.
    pub uploads: Arc<UploadOrchestrator>,
    /// Comment persistence and live fan-out.
    pub comments: Arc<CommentService>,
    /// OCR extraction pipeline.
    pub extractor: Extractor,
    /// Domain event fan-out for the `/events` stream.
    pub events: EventBus,
    /// In-flight extraction/upload state per user.
    pub slots: SlotRegistry,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Wire every service from its collaborators.
    pub fn new(
        config: ScanshelfConfig,
        database: Database,
        blobs: Arc<dyn BlobStore>,
        engine: Arc<dyn OcrEngine>,
    ) -> Self {
        let database = Arc::new(database);
        let events = EventBus::new(config.api.comment_channel_capacity);
        let catalog = Arc::new(UploadRepository::new(database.clone()));

        let uploads = UploadOrchestrator::new(
            blobs,
            catalog.clone(),
            config.upload.max_file_bytes,
            events.clone(),
        );
        let comments = CommentService::new(
            Arc::new(CommentRepository::new(database.clone())),
            catalog,
            CommentHub::new(config.api.comment_channel_capacity),
            events.clone(),
        );
        let auth = AuthService::new(database.clone(), events.clone());

        Self {
            config: Arc::new(config),
            database,
            auth: Arc::new(auth),
            uploads: Arc::new(uploads),
            comments: Arc::new(comments),
            extractor: Extractor::new(engine),
            events,
            slots: SlotRegistry::new(),
            start_time: Instant::now(),
        }
    }

    pub fn export_options(&self) -> ExportOptions {
        ExportOptions::from(&self.config.export)
    }
}
