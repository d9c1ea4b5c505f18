//! Per-key removal listeners.
//!
//! Listeners are registered against a key (a session token) and fire at most
//! once: [`ListenerBus::emit`] takes every listener for the key out of the
//! map before invoking any of them, so a listener that unregisters itself,
//! or registers a new listener, never touches a lock held by the emit path.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A removal callback. Receives the key it was registered for.
pub type Listener = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    listeners: DashMap<String, Vec<(u64, Listener)>>,
}

impl BusInner {
    fn unregister(&self, key: &str, id: u64) -> bool {
        let (removed, now_empty) = match self.listeners.get_mut(key) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|(listener_id, _)| *listener_id != id);
                (entry.len() != before, entry.is_empty())
            }
            None => (false, false),
        };

        if now_empty {
            self.listeners.remove_if(key, |_, listeners| listeners.is_empty());
        }
        removed
    }
}

/// Map from key to the listeners waiting on it.
#[derive(Clone, Default)]
pub struct ListenerBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for ListenerBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerBus")
            .field("keys", &self.inner.listeners.len())
            .finish()
    }
}

impl ListenerBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `key`.
    ///
    /// The returned handle unregisters it. Dropping the handle does not.
    pub fn register(&self, key: &str, listener: Listener) -> ListenerHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .entry(key.to_string())
            .or_default()
            .push((id, listener));

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        ListenerHandle::new(move || {
            inner.unregister(&key, id);
        })
    }

    /// Take every listener for `key` and invoke each once.
    ///
    /// Returns how many listeners ran. A second emit for the same key finds
    /// nothing unless new listeners registered in between.
    pub fn emit(&self, key: &str) -> usize {
        let Some((_, listeners)) = self.inner.listeners.remove(key) else {
            return 0;
        };

        for (_, listener) in &listeners {
            listener(key);
        }
        listeners.len()
    }

    /// Drop every listener for `key` without invoking them.
    pub fn clear(&self, key: &str) {
        self.inner.listeners.remove(key);
    }

    /// Number of listeners registered for `key`.
    pub fn listener_count(&self, key: &str) -> usize {
        self.inner
            .listeners
            .get(key)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Number of keys with at least one listener.
    pub fn key_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

type RemoveAction = Box<dyn FnOnce() + Send>;

/// Undoes a listener registration.
///
/// [`remove`](ListenerHandle::remove) runs its action at most once, however
/// many times it is called and from whichever thread, including from inside
/// the listener itself.
pub struct ListenerHandle {
    action: Mutex<Option<RemoveAction>>,
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("removed", &self.is_removed())
            .finish()
    }
}

impl ListenerHandle {
    pub(crate) fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// A handle with nothing to undo.
    pub fn noop() -> Self {
        Self {
            action: Mutex::new(None),
        }
    }

    /// Unregister. Later calls do nothing.
    pub fn remove(&self) {
        let action = self.take();
        if let Some(action) = action {
            action();
        }
    }

    /// Whether there is nothing left to undo.
    pub fn is_removed(&self) -> bool {
        self.lock().is_none()
    }

    fn take(&self) -> Option<RemoveAction> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<RemoveAction>> {
        self.action
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
