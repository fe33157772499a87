pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod lifecycle;
pub mod progress;
pub mod types;

pub use config::ScanshelfConfig;
pub use events::{DomainEvent, EventBus};
pub use error::{Result, ScanshelfError};
pub use lifecycle::{OperationSlot, OperationState, SlotGuard, SlotSnapshot};
pub use progress::ProgressTracker;
pub use types::*;
