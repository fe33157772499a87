//! Lifecycle of long-running operations (extraction, upload).
//!
//! Enforces the allowed state transitions:
//! Idle -> Running -> Succeeded/Failed
//! Succeeded/Failed -> Running (manual retry)
//!
//! An [`OperationSlot`] holds one operation's state. Starting work on a slot
//! that is already Running is rejected; only completion or error events move
//! a slot out of Running.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ScanshelfError;
use crate::progress::ProgressTracker;

/// State of a long-running operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationState::Idle => "idle",
            OperationState::Running => "running",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Rejected state change.
#[derive(Debug, thiserror::Error)]
#[error("Invalid state transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: OperationState,
    pub to: OperationState,
}

impl From<TransitionError> for ScanshelfError {
    fn from(err: TransitionError) -> Self {
        if err.from == OperationState::Running && err.to == OperationState::Running {
            ScanshelfError::AlreadyRunning("operation is already in progress".into())
        } else {
            ScanshelfError::Conflict(err.to_string())
        }
    }
}

/// Validate that a state transition is allowed.
pub fn validate_transition(
    from: OperationState,
    to: OperationState,
) -> Result<(), TransitionError> {
    let valid = matches!(
        (from, to),
        (OperationState::Idle, OperationState::Running)
            | (OperationState::Running, OperationState::Succeeded)
            | (OperationState::Running, OperationState::Failed)
            | (OperationState::Succeeded, OperationState::Running)
            | (OperationState::Failed, OperationState::Running)
    );

    if valid {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// Point-in-time view of a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub state: OperationState,
    pub percent: u8,
}

#[derive(Debug)]
struct SlotInner {
    state: Mutex<OperationState>,
    progress: ProgressTracker,
}

/// Holder for one operation's lifecycle and its progress bar.
///
/// Cloning yields a handle to the same slot.
#[derive(Clone, Debug)]
pub struct OperationSlot {
    inner: Arc<SlotInner>,
}

impl OperationSlot {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SlotInner {
                state: Mutex::new(OperationState::Idle),
                progress: ProgressTracker::new(),
            }),
        }
    }

    pub fn state(&self) -> OperationState {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            state: self.state(),
            percent: self.inner.progress.percent(),
        }
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.inner.progress
    }

    /// Move the slot to Running and hand out the guard that must finish it.
    ///
    /// Fails with `AlreadyRunning` while another operation holds the slot.
    pub fn begin(&self) -> Result<SlotGuard, ScanshelfError> {
        self.transition(OperationState::Running)?;
        self.inner.progress.reset();
        Ok(SlotGuard {
            slot: self.clone(),
            finished: false,
        })
    }

    fn transition(&self, to: OperationState) -> Result<(), TransitionError> {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        validate_transition(*state, to)?;
        debug!(from = %*state, to = %to, "Operation slot transition");
        *state = to;
        Ok(())
    }
}

impl Default for OperationSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive ownership of a Running slot.
///
/// Consumed by [`SlotGuard::succeed`] or [`SlotGuard::fail`]. Dropping an
/// unfinished guard marks the slot Failed so it never stays Running.
#[derive(Debug)]
pub struct SlotGuard {
    slot: OperationSlot,
    finished: bool,
}

impl SlotGuard {
    pub fn progress(&self) -> &ProgressTracker {
        self.slot.progress()
    }

    pub fn succeed(mut self) {
        self.finish(OperationState::Succeeded);
    }

    pub fn fail(mut self) {
        self.finish(OperationState::Failed);
    }

    /// Finish according to an operation's outcome, passing the outcome through.
    pub fn complete<T, E>(self, outcome: Result<T, E>) -> Result<T, E> {
        match &outcome {
            Ok(_) => self.succeed(),
            Err(_) => self.fail(),
        }
        outcome
    }

    fn finish(&mut self, to: OperationState) {
        self.finished = true;
        self.slot.inner.progress.reset();
        if let Err(e) = self.slot.transition(to) {
            warn!(error = %e, "Operation slot finished from unexpected state");
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(OperationState::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OperationState; 4] = [
        OperationState::Idle,
        OperationState::Running,
        OperationState::Succeeded,
        OperationState::Failed,
    ];

    #[test]
    fn test_idle_to_running() {
        assert!(validate_transition(OperationState::Idle, OperationState::Running).is_ok());
    }

    #[test]
    fn test_running_to_terminal_states() {
        assert!(validate_transition(OperationState::Running, OperationState::Succeeded).is_ok());
        assert!(validate_transition(OperationState::Running, OperationState::Failed).is_ok());
    }

    #[test]
    fn test_retry_from_terminal_states() {
        assert!(validate_transition(OperationState::Succeeded, OperationState::Running).is_ok());
        assert!(validate_transition(OperationState::Failed, OperationState::Running).is_ok());
    }

    #[test]
    fn test_running_reentry_invalid() {
        assert!(validate_transition(OperationState::Running, OperationState::Running).is_err());
    }

    #[test]
    fn test_idle_cannot_complete() {
        assert!(validate_transition(OperationState::Idle, OperationState::Succeeded).is_err());
        assert!(validate_transition(OperationState::Idle, OperationState::Failed).is_err());
    }

    #[test]
    fn test_nothing_returns_to_idle() {
        for from in ALL {
            assert!(validate_transition(from, OperationState::Idle).is_err());
        }
    }

    #[test]
    fn test_all_valid_transitions_count() {
        let mut valid_count = 0;
        for from in ALL {
            for to in ALL {
                if validate_transition(from, to).is_ok() {
                    valid_count += 1;
                }
            }
        }
        assert_eq!(valid_count, 5);
    }

    #[test]
    fn test_transition_error_message() {
        let err = validate_transition(OperationState::Idle, OperationState::Failed).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("idle"));
        assert!(msg.contains("failed"));
    }

    #[test]
    fn test_reentry_maps_to_already_running() {
        let err = validate_transition(OperationState::Running, OperationState::Running).unwrap_err();
        assert!(matches!(
            ScanshelfError::from(err),
            ScanshelfError::AlreadyRunning(_)
        ));
    }

    #[test]
    fn test_slot_rejects_second_begin_while_running() {
        let slot = OperationSlot::new();
        let guard = slot.begin().unwrap();
        assert_eq!(slot.state(), OperationState::Running);

        let err = slot.begin().unwrap_err();
        assert!(matches!(err, ScanshelfError::AlreadyRunning(_)));

        guard.succeed();
        assert_eq!(slot.state(), OperationState::Succeeded);
        assert!(slot.begin().is_ok());
    }

    #[test]
    fn test_slot_fail_then_retry() {
        let slot = OperationSlot::new();
        slot.begin().unwrap().fail();
        assert_eq!(slot.state(), OperationState::Failed);

        let guard = slot.begin().unwrap();
        assert_eq!(slot.state(), OperationState::Running);
        guard.succeed();
    }

    #[test]
    fn test_dropped_guard_marks_failed() {
        let slot = OperationSlot::new();
        {
            let _guard = slot.begin().unwrap();
        }
        assert_eq!(slot.state(), OperationState::Failed);
    }

    #[test]
    fn test_complete_follows_outcome() {
        let slot = OperationSlot::new();
        let ok: Result<u8, &str> = slot.begin().unwrap().complete(Ok(1));
        assert_eq!(ok, Ok(1));
        assert_eq!(slot.state(), OperationState::Succeeded);

        let err: Result<u8, &str> = slot.begin().unwrap().complete(Err("boom"));
        assert!(err.is_err());
        assert_eq!(slot.state(), OperationState::Failed);
    }

    #[test]
    fn test_progress_resets_on_finish() {
        let slot = OperationSlot::new();
        let guard = slot.begin().unwrap();
        guard.progress().report_fraction(0.6);
        assert_eq!(slot.snapshot().percent, 60);
        guard.succeed();
        assert_eq!(
            slot.snapshot(),
            SlotSnapshot {
                state: OperationState::Succeeded,
                percent: 0
            }
        );
    }
}
