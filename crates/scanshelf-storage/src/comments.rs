//! Comment stream: append-only comments with live fan-out per file.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use scanshelf_core::error::ScanshelfError;
use scanshelf_core::events::{DomainEvent, EventBus};
use scanshelf_core::types::{Comment, User};

use crate::repository::CommentRepository;
use crate::upload::UploadCatalog;

/// Message shown to users when a comment cannot be stored.
pub const COMMENT_FAILED_MESSAGE: &str = "Failed to add comment";

/// In-process fan-out of newly stored comments.
#[derive(Clone, Debug)]
pub struct CommentHub {
    tx: broadcast::Sender<Comment>,
}

impl CommentHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, comment: Comment) {
        let file_id = comment.file_id;
        if self.tx.send(comment).is_err() {
            debug!(file_id = %file_id, "No comment subscribers");
        }
    }

    /// Open a subscription to one file's comments. Dropping it unsubscribes.
    pub fn subscribe(&self, file_id: Uuid) -> CommentSubscription {
        debug!(file_id = %file_id, "Comment subscription opened");
        CommentSubscription {
            file_id,
            rx: self.tx.subscribe(),
            guard: SubscriptionGuard { file_id },
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for CommentHub {
    fn default() -> Self {
        Self::new(256)
    }
}

struct SubscriptionGuard {
    file_id: Uuid,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        debug!(file_id = %self.file_id, "Comment subscription closed");
    }
}

/// Live comments for a single file, in publish order.
pub struct CommentSubscription {
    file_id: Uuid,
    rx: broadcast::Receiver<Comment>,
    guard: SubscriptionGuard,
}

impl CommentSubscription {
    pub fn file_id(&self) -> Uuid {
        self.file_id
    }

    /// Next comment for this file, or `None` once the hub is gone.
    ///
    /// A lagging subscriber skips the comments it missed.
    pub async fn recv(&mut self) -> Option<Comment> {
        loop {
            match self.rx.recv().await {
                Ok(comment) if comment.file_id == self.file_id => return Some(comment),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(file_id = %self.file_id, skipped, "Comment subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a stream; the subscription stays open while the stream lives.
    pub fn into_stream(self) -> impl Stream<Item = Comment> + Send + 'static {
        let CommentSubscription { file_id, rx, guard } = self;
        BroadcastStream::new(rx).filter_map(move |item| {
            let _alive = &guard;
            match item {
                Ok(comment) if comment.file_id == file_id => Some(comment),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(file_id = %file_id, skipped, "Comment stream lagged");
                    None
                }
            }
        })
    }
}

/// Adds and lists comments, publishing each stored comment on the hub.
pub struct CommentService {
    repo: Arc<CommentRepository>,
    catalog: Arc<dyn UploadCatalog>,
    hub: CommentHub,
    events: EventBus,
    /// Held across timestamp, insert and publish so live order matches stored order.
    append: Mutex<()>,
}

impl CommentService {
    pub fn new(
        repo: Arc<CommentRepository>,
        catalog: Arc<dyn UploadCatalog>,
        hub: CommentHub,
        events: EventBus,
    ) -> Self {
        Self {
            repo,
            catalog,
            hub,
            events,
            append: Mutex::new(()),
        }
    }

    pub fn hub(&self) -> &CommentHub {
        &self.hub
    }

    /// Store a comment by `author` on `file_id`.
    ///
    /// Blank content is rejected before anything is written. The stored
    /// content is trimmed.
    pub fn add(&self, author: &User, file_id: Uuid, content: &str) -> Result<Comment, ScanshelfError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ScanshelfError::Validation("Comment must not be empty".into()));
        }
        self.require_file(file_id)?;

        let _append = self
            .append
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let comment = Comment {
            id: Uuid::new_v4(),
            file_id,
            user_id: author.id,
            user_email: author.email.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.repo.insert(&comment) {
            error!(file_id = %file_id, error = %e, "Comment insert failed");
            return Err(ScanshelfError::Storage(COMMENT_FAILED_MESSAGE.into()));
        }

        info!(file_id = %file_id, comment_id = %comment.id, "Comment added");
        self.hub.publish(comment.clone());
        self.events.publish(DomainEvent::CommentAdded {
            comment: comment.clone(),
        });
        Ok(comment)
    }

    /// Comments on `file_id`, oldest first.
    pub fn list(&self, file_id: Uuid) -> Result<Vec<Comment>, ScanshelfError> {
        self.require_file(file_id)?;
        self.repo.list_for_file(file_id)
    }

    /// Open a live subscription to an existing file's comments.
    pub fn subscribe(&self, file_id: Uuid) -> Result<CommentSubscription, ScanshelfError> {
        self.require_file(file_id)?;
        Ok(self.hub.subscribe(file_id))
    }

    fn require_file(&self, file_id: Uuid) -> Result<(), ScanshelfError> {
        match self.catalog.get(file_id)? {
            Some(_) => Ok(()),
            None => Err(ScanshelfError::NotFound(format!("File {}", file_id))),
        }
    }
}
