//! Integer-percent progress reporting with update coalescing.
//!
//! Producers report fractional progress as often as they like; subscribers
//! are only woken when the rounded percentage actually changes.

use std::sync::Arc;

use tokio::sync::watch;

/// Shared progress bar state, 0-100.
#[derive(Clone, Debug)]
pub struct ProgressTracker {
    tx: Arc<watch::Sender<u8>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0u8);
        Self { tx: Arc::new(tx) }
    }

    /// Report progress as a fraction in `[0.0, 1.0]`. Out-of-range and NaN values are clamped.
    pub fn report_fraction(&self, fraction: f64) {
        let percent = if fraction.is_nan() {
            0
        } else {
            (fraction * 100.0).round().clamp(0.0, 100.0) as u8
        };
        self.set(percent);
    }

    /// Report transferred bytes. A zero total counts as complete.
    pub fn report_bytes(&self, loaded: u64, total: u64) {
        if total == 0 {
            self.set(100);
            return;
        }
        self.report_fraction(loaded as f64 / total as f64);
    }

    pub fn reset(&self) {
        self.set(0);
    }

    pub fn percent(&self) -> u8 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u8> {
        self.tx.subscribe()
    }

    fn set(&self, percent: u8) {
        self.tx.send_if_modified(|current| {
            if *current == percent {
                false
            } else {
                *current = percent;
                true
            }
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
