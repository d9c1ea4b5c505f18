//! Reference-counted network sessions and their tombstones.
//!
//! The router never stores network-session content, only whether a token is
//! in use and by how many consumers, and whether it was removed recently.
//! Every transition goes through [`NetworkSessionState`] inside a single
//! map entry lock.

use crate::listeners::{Listener, ListenerBus, ListenerHandle};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync_core::NetworkSessionState;
use sync_types::is_bearer_token;

/// Network-session registry.
#[derive(Debug, Default)]
pub struct NetworkSessions {
    states: DashMap<String, NetworkSessionState>,
    listeners: ListenerBus,
}

impl NetworkSessions {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `token` and a callback for its removal.
    ///
    /// Registration opens the session (counting one more consumer). The
    /// returned handle closes it again and unregisters the callback; it
    /// does so once, however often it is called.
    ///
    /// Bearer tokens are never tracked and get a no-op handle. If the token
    /// was recently removed the callback is dispatched immediately and a
    /// no-op handle is returned.
    pub fn add_removed_listener<F>(self: &Arc<Self>, token: &str, callback: F) -> ListenerHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        if is_bearer_token(token) {
            return ListenerHandle::noop();
        }

        let callback: Listener = Arc::new(callback);

        if self.was_recently_removed(token) {
            tracing::debug!("Session already removed, notifying listener immediately");
            dispatch(Arc::clone(&callback), token);
            return ListenerHandle::noop();
        }

        self.transition(token, NetworkSessionState::open);

        let registration = self.listeners.register(
            token,
            Arc::new(move |token: &str| dispatch(Arc::clone(&callback), token)),
        );

        let sessions = Arc::clone(self);
        let token = token.to_string();
        ListenerHandle::new(move || {
            sessions.session_connection_closed(&token);
            registration.remove();
        })
    }

    /// A consumer of `token` went away. The last one tombstones the session.
    pub fn session_connection_closed(&self, token: &str) {
        let now = Instant::now();
        let next = self.transition(token, |state| NetworkSessionState::close(state, now));
        if next.is_some_and(|state| !state.is_active()) {
            tracing::debug!("Network session closed by last consumer");
        }
    }

    /// The controller removed `token`.
    ///
    /// Removal listeners are taken and dispatched onto their own tasks,
    /// then a tracked session is tombstoned.
    pub fn remove_session(&self, token: &str) {
        let notified = self.listeners.emit(token);
        tracing::debug!("Removing network session, notified {} listeners", notified);

        let now = Instant::now();
        self.transition(token, |state| NetworkSessionState::remove(state, now));
    }

    /// Whether `token` was removed within the retention window.
    ///
    /// A `false` answer does not prove the token never existed.
    pub fn was_recently_removed(&self, token: &str) -> bool {
        self.states
            .get(token)
            .map(|state| state.is_tombstoned())
            .unwrap_or(false)
    }

    /// Record `token` as just removed. The latest call sets the timestamp.
    ///
    /// Consumers still using the token keep it in the active set until they
    /// close.
    pub fn mark_recently_removed(&self, token: &str) {
        let now = Instant::now();
        self.transition(token, |state| NetworkSessionState::mark_removed(state, now));
    }

    /// Drop tombstones older than `retention`. Returns how many were dropped.
    pub fn purge_tombstones(&self, now: Instant, retention: Duration) -> usize {
        let before = self.states.len();
        self.states
            .retain(|_, state| !state.is_expired(now, retention));
        before.saturating_sub(self.states.len())
    }

    /// Tokens with at least one consumer.
    pub fn active_tokens(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|entry| entry.value().is_active())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Current state of `token`.
    pub fn state(&self, token: &str) -> Option<NetworkSessionState> {
        self.states.get(token).map(|state| *state)
    }

    /// Number of sessions in use.
    pub fn active_count(&self) -> usize {
        self.states.iter().filter(|entry| entry.is_active()).count()
    }

    /// Number of remembered removals.
    pub fn tombstone_count(&self) -> usize {
        self.states
            .iter()
            .filter(|entry| entry.is_tombstoned())
            .count()
    }

    fn transition<F>(&self, token: &str, f: F) -> Option<NetworkSessionState>
    where
        F: FnOnce(Option<NetworkSessionState>) -> Option<NetworkSessionState>,
    {
        match self.states.entry(token.to_string()) {
            Entry::Occupied(mut entry) => match f(Some(*entry.get())) {
                Some(next) => {
                    *entry.get_mut() = next;
                    Some(next)
                }
                None => {
                    entry.remove();
                    None
                }
            },
            Entry::Vacant(entry) => {
                let next = f(None)?;
                entry.insert(next);
                Some(next)
            }
        }
    }
}

/// Run a removal callback off the caller's thread. Callbacks may do network
/// I/O, so they get a blocking-capable task when a runtime is available.
fn dispatch(callback: Listener, token: &str) {
    let token = token.to_string();
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn_blocking(move || callback(&token));
        }
        Err(_) => callback(&token),
    }
}
