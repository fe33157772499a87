use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::types::{Comment, OcrLanguage};

/// Domain events emitted after state changes.
///
/// Consumed by the `/events` SSE stream and by anything that wants to react
/// to auth-state changes without polling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DomainEvent {
    SignedUp {
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    SignedIn {
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    SignedOut {
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    FileUploaded {
        file_id: Uuid,
        user_id: Uuid,
        name: String,
        size_bytes: u64,
        timestamp: DateTime<Utc>,
    },
    FileDeleted {
        file_id: Uuid,
        user_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    TextExtracted {
        user_id: Uuid,
        language: OcrLanguage,
        text_length: usize,
        confidence: f32,
        timestamp: DateTime<Utc>,
    },
    CommentAdded {
        comment: Comment,
    },
}

impl DomainEvent {
    /// The user the event concerns.
    pub fn user_id(&self) -> Uuid {
        match self {
            DomainEvent::SignedUp { user_id, .. }
            | DomainEvent::SignedIn { user_id, .. }
            | DomainEvent::SignedOut { user_id, .. }
            | DomainEvent::FileUploaded { user_id, .. }
            | DomainEvent::FileDeleted { user_id, .. }
            | DomainEvent::TextExtracted { user_id, .. } => *user_id,
            DomainEvent::CommentAdded { comment } => comment.user_id,
        }
    }

    /// Short name used as the SSE event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::SignedUp { .. } => "signed_up",
            DomainEvent::SignedIn { .. } => "signed_in",
            DomainEvent::SignedOut { .. } => "signed_out",
            DomainEvent::FileUploaded { .. } => "file_uploaded",
            DomainEvent::FileDeleted { .. } => "file_deleted",
            DomainEvent::TextExtracted { .. } => "text_extracted",
            DomainEvent::CommentAdded { .. } => "comment_added",
        }
    }
}

/// In-process fan-out of [`DomainEvent`]s.
///
/// Publishing never fails: with no subscribers the event is simply dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: DomainEvent) {
        let kind = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => debug!(event = kind, receivers, "Event published"),
            Err(_) => debug!(event = kind, "Event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Whether an event reflects a change in authentication state.
pub fn is_auth_event(event: &DomainEvent) -> bool {
    matches!(
        event,
        DomainEvent::SignedUp { .. } | DomainEvent::SignedIn { .. } | DomainEvent::SignedOut { .. }
    )
}
