//! Tracks which full data-state sync, if any, is in progress.

use std::sync::Mutex;

/// Holds the id of the sync currently in progress.
///
/// A stop only clears the marker when it names the sync that set it, so a
/// late stop from an abandoned sync cannot clear a newer one.
#[derive(Debug, Default)]
pub struct SyncTracker {
    current: Mutex<Option<String>>,
}

impl SyncTracker {
    /// Create a tracker with no sync in progress.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `sync_id` as the sync in progress, replacing any other.
    pub fn mark_in_progress(&self, sync_id: &str) {
        *self.lock() = Some(sync_id.to_string());
    }

    /// Clear the marker if it is `sync_id`. Returns whether it was cleared.
    pub fn mark_stopped(&self, sync_id: &str) -> bool {
        let mut current = self.lock();
        if current.as_deref() == Some(sync_id) {
            *current = None;
            true
        } else {
            false
        }
    }

    /// Whether a sync is in progress.
    pub fn is_in_progress(&self) -> bool {
        self.lock().is_some()
    }

    /// Id of the sync in progress.
    pub fn current(&self) -> Option<String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
