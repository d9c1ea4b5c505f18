//! API-session registry.
//!
//! Tracks API sessions pushed by the controller, the channels connected on
//! behalf of each session, and which session each live channel is bound
//! to. Callbacks (removal listeners, forced-close callbacks) always run
//! after the registry has released its locks.

use crate::channel::Channel;
use crate::error::{SessionError, SessionResult};
use crate::listeners::{ListenerBus, ListenerHandle};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use sync_types::{certificate_fingerprint, AccessClaims, ApiSessionRecord, ChannelId, TOKEN_TYPE_ACCESS};
use tokio::sync::broadcast;

/// Capacity of the API-session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// An API session as seen by the data plane.
///
/// Sessions pushed by the controller carry only the record. Sessions built
/// from a verified bearer token also carry its claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSession {
    /// The session record.
    pub record: ApiSessionRecord,
    /// Claims of the bearer token the session was built from.
    pub claims: Option<AccessClaims>,
}

impl ApiSession {
    /// A session pushed by the controller.
    pub fn from_record(record: ApiSessionRecord) -> Self {
        Self {
            record,
            claims: None,
        }
    }

    /// A session backed by a verified bearer token.
    pub fn from_claims(token: &str, claims: AccessClaims) -> Self {
        let record = ApiSessionRecord {
            id: claims.jti.clone(),
            token: token.to_string(),
            cert_fingerprints: claims.cert_fingerprints.clone(),
        };
        Self {
            record,
            claims: Some(claims),
        }
    }

    /// The session token.
    pub fn token(&self) -> &str {
        &self.record.token
    }

    /// Whether `der` is one of the certificates the session was
    /// authenticated with.
    pub fn matches_certificate(&self, der: &[u8]) -> bool {
        let fingerprint = certificate_fingerprint(der);
        self.record
            .cert_fingerprints
            .iter()
            .any(|known| known.eq_ignore_ascii_case(&fingerprint))
    }
}

/// Change to the API-session set, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiSessionEvent {
    /// A session was added.
    Added(Arc<ApiSessionRecord>),
    /// A session was replaced.
    Updated(Arc<ApiSessionRecord>),
    /// A session was removed.
    Removed(Arc<ApiSessionRecord>),
}

type CloseCallback = Box<dyn FnOnce() + Send + Sync>;

struct ConnectedChannel {
    channel: Arc<dyn Channel>,
    on_close: CloseCallback,
}

/// Concurrent registry of API sessions and their connected channels.
pub struct SessionRegistry {
    api_sessions: DashMap<String, Arc<ApiSessionRecord>>,
    removal_listeners: ListenerBus,
    events: broadcast::Sender<ApiSessionEvent>,
    connected: DashMap<String, HashMap<ChannelId, ConnectedChannel>>,
    bindings: DashMap<ChannelId, Arc<ApiSession>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("api_sessions", &self.api_sessions.len())
            .field("connected_tokens", &self.connected.len())
            .field("bound_channels", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api_sessions: DashMap::new(),
            removal_listeners: ListenerBus::new(),
            events,
            connected: DashMap::new(),
            bindings: DashMap::new(),
        }
    }

    /// Subscribe to added/updated/removed events.
    pub fn subscribe(&self) -> broadcast::Receiver<ApiSessionEvent> {
        self.events.subscribe()
    }

    /// Track a new API session.
    pub fn add_api_session(&self, record: ApiSessionRecord) {
        tracing::debug!("Adding api session {:?}", record);
        let record = Arc::new(record);
        self.api_sessions
            .insert(record.token.clone(), Arc::clone(&record));
        self.publish(ApiSessionEvent::Added(record));
    }

    /// Replace an API session.
    pub fn update_api_session(&self, record: ApiSessionRecord) {
        tracing::debug!("Updating api session {:?}", record);
        let record = Arc::new(record);
        self.api_sessions
            .insert(record.token.clone(), Arc::clone(&record));
        self.publish(ApiSessionEvent::Updated(record));
    }

    /// Remove the API session for `token`.
    ///
    /// Token-scoped removal listeners fire once and are dropped, connected
    /// channels are force-closed, then a global `Removed` event is
    /// published. Returns whether a session was removed.
    pub fn remove_api_session(&self, token: &str) -> bool {
        let Some((_, record)) = self.api_sessions.remove(token) else {
            tracing::debug!("Could not remove api session: not found");
            return false;
        };

        tracing::debug!("Removing api session {}", record.id);
        self.removal_listeners.emit(token);

        if let Some((_, channels)) = self.connected.remove(token) {
            tracing::debug!(
                "Closing {} channels of removed api session {}",
                channels.len(),
                record.id
            );
            for (_, connected) in channels {
                (connected.on_close)();
            }
        }

        self.publish(ApiSessionEvent::Removed(record));
        true
    }

    /// Remove every tracked session whose token is not in `known`.
    ///
    /// When `before_id` is non-empty, sessions whose id sorts after it were
    /// created after the controller took its list and are kept. Returns how
    /// many sessions were removed.
    pub fn remove_missing_api_sessions(&self, known: &[ApiSessionRecord], before_id: &str) -> usize {
        let valid: HashSet<&str> = known.iter().map(|record| record.token.as_str()).collect();

        let stale: Vec<String> = self
            .api_sessions
            .iter()
            .filter(|entry| !valid.contains(entry.key().as_str()))
            .filter(|entry| before_id.is_empty() || entry.value().id.as_str() <= before_id)
            .map(|entry| entry.key().clone())
            .collect();

        stale
            .iter()
            .filter(|token| self.remove_api_session(token))
            .count()
    }

    /// The API session for `token`, if tracked.
    pub fn api_session(&self, token: &str) -> Option<Arc<ApiSessionRecord>> {
        self.api_sessions
            .get(token)
            .map(|record| Arc::clone(record.value()))
    }

    /// Every tracked API session.
    pub fn api_sessions(&self) -> Vec<Arc<ApiSessionRecord>> {
        self.api_sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of tracked API sessions.
    pub fn api_session_count(&self) -> usize {
        self.api_sessions.len()
    }

    /// Register a callback for the removal of the API session for `token`.
    ///
    /// The callback runs at most once, inline on the removing thread after
    /// the registry's locks are released.
    pub fn add_api_session_removed_listener<F>(&self, token: &str, callback: F) -> ListenerHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.removal_listeners.register(token, Arc::new(callback))
    }

    /// Record that `token` has a connection, without a channel.
    pub fn add_connected_api_session(&self, token: &str) {
        self.connected.entry(token.to_string()).or_default();
    }

    /// Forget every connection of `token` without invoking callbacks.
    pub fn remove_connected_api_session(&self, token: &str) {
        self.connected.remove(token);
    }

    /// Record `channel` as connected on behalf of `token`.
    ///
    /// `on_close` runs if the channel is removed for this token, or if the
    /// session itself is removed.
    pub fn add_connected_api_session_with_channel<F>(
        &self,
        token: &str,
        channel: Arc<dyn Channel>,
        on_close: F,
    ) where
        F: FnOnce() + Send + Sync + 'static,
    {
        let id = channel.id();
        self.connected.entry(token.to_string()).or_default().insert(
            id,
            ConnectedChannel {
                channel,
                on_close: Box::new(on_close),
            },
        );
    }

    /// Remove `channel_id` from the channels of `token`, invoking its
    /// callback. The token entry goes away with its last channel.
    ///
    /// Returns whether a channel was removed.
    pub fn remove_connected_api_session_with_channel(&self, token: &str, channel_id: ChannelId) -> bool {
        let removed = match self.connected.get_mut(token) {
            Some(mut channels) => channels.remove(&channel_id),
            None => None,
        };

        self.connected
            .remove_if(token, |_, channels| channels.is_empty());

        match removed {
            Some(connected) => {
                (connected.on_close)();
                true
            }
            None => false,
        }
    }

    /// Tokens with at least one open connected channel.
    pub fn active_api_session_tokens(&self) -> Vec<String> {
        self.connected
            .iter()
            .filter(|entry| entry.value().values().any(|c| !c.channel.is_closed()))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of channels connected for `token`.
    pub fn connected_channel_count(&self, token: &str) -> usize {
        self.connected
            .get(token)
            .map(|channels| channels.len())
            .unwrap_or(0)
    }

    /// Whether `token` has a connected-session entry.
    pub fn has_connected_api_session(&self, token: &str) -> bool {
        self.connected.contains_key(token)
    }

    /// Bind a live channel to an API session.
    pub fn bind_channel(&self, channel_id: ChannelId, session: Arc<ApiSession>) {
        self.bindings.insert(channel_id, session);
    }

    /// Drop a channel's binding.
    pub fn unbind_channel(&self, channel_id: ChannelId) {
        self.bindings.remove(&channel_id);
    }

    /// The API session a channel is bound to.
    pub fn bound_api_session(&self, channel_id: ChannelId) -> Option<Arc<ApiSession>> {
        self.bindings
            .get(&channel_id)
            .map(|session| Arc::clone(session.value()))
    }

    /// Rebind a channel to a refreshed API session.
    ///
    /// The new session must carry access-token claims with the same subject
    /// and API session id as the bound one. On any mismatch the binding is
    /// left untouched.
    pub fn update_channel_api_session(
        &self,
        channel_id: ChannelId,
        session: Arc<ApiSession>,
    ) -> SessionResult<()> {
        let new_claims = session.claims.as_ref().ok_or(SessionError::MissingClaims)?;
        if new_claims.token_type != TOKEN_TYPE_ACCESS {
            return Err(SessionError::InvalidTokenType {
                expected: TOKEN_TYPE_ACCESS.to_string(),
                got: new_claims.token_type.clone(),
            });
        }

        let mut bound = self
            .bindings
            .get_mut(&channel_id)
            .ok_or(SessionError::ChannelNotBound(channel_id))?;
        let current = bound.claims.as_ref().ok_or(SessionError::MissingClaims)?;

        if new_claims.sub != current.sub {
            return Err(SessionError::SubjectMismatch {
                current: current.sub.clone(),
                new: new_claims.sub.clone(),
            });
        }

        if new_claims.api_session_id != current.api_session_id {
            return Err(SessionError::ApiSessionIdMismatch {
                current: current.api_session_id.clone(),
                new: new_claims.api_session_id.clone(),
            });
        }

        *bound = session;
        Ok(())
    }

    fn publish(&self, event: ApiSessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use sync_types::Audience;

    fn claims(sub: &str, api_session_id: &str) -> AccessClaims {
        AccessClaims {
            sub: sub.to_string(),
            aud: Audience::One("openziti".to_string()),
            exp: u64::MAX,
            iat: None,
            jti: format!("jti-{api_session_id}"),
            token_type: TOKEN_TYPE_ACCESS.to_string(),
            api_session_id: api_session_id.to_string(),
            cert_fingerprints: Vec::new(),
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&str) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        (count, move |_: &str| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn add_update_remove_publish_events() {
        let registry = SessionRegistry::new();
        let mut events = registry.subscribe();

        registry.add_api_session(ApiSessionRecord::new("1", "token-1"));
        registry.update_api_session(ApiSessionRecord::new("1", "token-1").with_fingerprint("ab"));
        assert!(registry.remove_api_session("token-1"));

        assert!(matches!(events.try_recv().unwrap(), ApiSessionEvent::Added(r) if r.id == "1"));
        assert!(
            matches!(events.try_recv().unwrap(), ApiSessionEvent::Updated(r) if r.cert_fingerprints == vec!["ab".to_string()])
        );
        assert!(matches!(events.try_recv().unwrap(), ApiSessionEvent::Removed(r) if r.token == "token-1"));
        assert_eq!(registry.api_session_count(), 0);
    }

    #[test]
    fn removing_unknown_session_is_a_noop() {
        let registry = SessionRegistry::new();
        let mut events = registry.subscribe();

        assert!(!registry.remove_api_session("missing"));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn removal_listeners_fire_once() {
        let registry = SessionRegistry::new();
        let (first, a) = counter();
        let (second, b) = counter();
        let _h1 = registry.add_api_session_removed_listener("token-1", a);
        let _h2 = registry.add_api_session_removed_listener("token-1", b);

        registry.add_api_session(ApiSessionRecord::new("1", "token-1"));
        registry.remove_api_session("token-1");
        registry.add_api_session(ApiSessionRecord::new("1", "token-1"));
        registry.remove_api_session("token-1");

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregistered_listener_does_not_fire() {
        let registry = SessionRegistry::new();
        let (count, listener) = counter();
        let handle = registry.add_api_session_removed_listener("token-1", listener);

        handle.remove();
        registry.add_api_session(ApiSessionRecord::new("1", "token-1"));
        registry.remove_api_session("token-1");

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn remove_missing_respects_known_and_cutoff() {
        let registry = SessionRegistry::new();
        registry.add_api_session(ApiSessionRecord::new("001", "keep"));
        registry.add_api_session(ApiSessionRecord::new("002", "stale"));
        registry.add_api_session(ApiSessionRecord::new("009", "newer"));

        let removed =
            registry.remove_missing_api_sessions(&[ApiSessionRecord::new("001", "keep")], "005");

        assert_eq!(removed, 1);
        assert!(registry.api_session("keep").is_some());
        assert!(registry.api_session("stale").is_none());
        assert!(registry.api_session("newer").is_some());
    }

    #[test]
    fn remove_missing_without_cutoff_removes_all_unknown() {
        let registry = SessionRegistry::new();
        registry.add_api_session(ApiSessionRecord::new("001", "a"));
        registry.add_api_session(ApiSessionRecord::new("999", "b"));

        assert_eq!(registry.remove_missing_api_sessions(&[], ""), 2);
        assert_eq!(registry.api_session_count(), 0);
    }

    #[test]
    fn channel_removal_runs_one_callback_and_drops_empty_entry() {
        let registry = SessionRegistry::new();
        let first = MockChannel::new();
        let second = MockChannel::new();
        let (closed, _) = counter();
        let c1 = Arc::clone(&closed);
        let c2 = Arc::clone(&closed);

        registry.add_connected_api_session_with_channel("token", Arc::new(first.clone()), move || {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        registry.add_connected_api_session_with_channel("token", Arc::new(second.clone()), move || {
            c2.fetch_add(10, Ordering::SeqCst);
        });

        assert!(registry.remove_connected_api_session_with_channel("token", first.id()));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.connected_channel_count("token"), 1);

        assert!(!registry.remove_connected_api_session_with_channel("token", first.id()));

        assert!(registry.remove_connected_api_session_with_channel("token", second.id()));
        assert_eq!(closed.load(Ordering::SeqCst), 11);
        assert!(!registry.has_connected_api_session("token"));
    }

    #[test]
    fn connected_session_without_channel() {
        let registry = SessionRegistry::new();
        registry.add_connected_api_session("token");
        assert!(registry.has_connected_api_session("token"));
        assert!(registry.active_api_session_tokens().is_empty());

        registry.remove_connected_api_session("token");
        assert!(!registry.has_connected_api_session("token"));
    }

    #[test]
    fn active_tokens_skip_closed_channels() {
        let registry = SessionRegistry::new();
        let open = MockChannel::new();
        let closed = MockChannel::new();
        closed.close();

        registry.add_connected_api_session_with_channel("live", Arc::new(open), || {});
        registry.add_connected_api_session_with_channel("dead", Arc::new(closed), || {});

        assert_eq!(registry.active_api_session_tokens(), vec!["live".to_string()]);
    }

    #[test]
    fn removing_session_force_closes_channels() {
        let registry = SessionRegistry::new();
        let (closed, _) = counter();
        let c = Arc::clone(&closed);
        registry.add_api_session(ApiSessionRecord::new("1", "token"));
        registry.add_connected_api_session_with_channel("token", Arc::new(MockChannel::new()), move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.remove_api_session("token");

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!registry.has_connected_api_session("token"));
    }

    #[test]
    fn rebind_with_matching_claims_succeeds() {
        let registry = SessionRegistry::new();
        let channel = ChannelId::new();
        registry.bind_channel(channel, Arc::new(ApiSession::from_claims("t1", claims("id-1", "as-1"))));

        let refreshed = Arc::new(ApiSession::from_claims("t2", claims("id-1", "as-1")));
        registry
            .update_channel_api_session(channel, Arc::clone(&refreshed))
            .unwrap();

        assert_eq!(registry.bound_api_session(channel), Some(refreshed));
    }

    #[test]
    fn rebind_with_other_subject_is_rejected() {
        let registry = SessionRegistry::new();
        let channel = ChannelId::new();
        let original = Arc::new(ApiSession::from_claims("t1", claims("id-1", "as-1")));
        registry.bind_channel(channel, Arc::clone(&original));

        let result = registry.update_channel_api_session(
            channel,
            Arc::new(ApiSession::from_claims("t2", claims("id-2", "as-1"))),
        );

        assert!(matches!(result, Err(SessionError::SubjectMismatch { .. })));
        assert_eq!(registry.bound_api_session(channel), Some(original));
    }

    #[test]
    fn rebind_with_other_api_session_is_rejected() {
        let registry = SessionRegistry::new();
        let channel = ChannelId::new();
        let original = Arc::new(ApiSession::from_claims("t1", claims("id-1", "as-1")));
        registry.bind_channel(channel, Arc::clone(&original));

        let result = registry.update_channel_api_session(
            channel,
            Arc::new(ApiSession::from_claims("t2", claims("id-1", "as-2"))),
        );

        assert!(matches!(result, Err(SessionError::ApiSessionIdMismatch { .. })));
        assert_eq!(registry.bound_api_session(channel), Some(original));
    }

    #[test]
    fn rebind_requires_access_claims() {
        let registry = SessionRegistry::new();
        let channel = ChannelId::new();
        registry.bind_channel(channel, Arc::new(ApiSession::from_claims("t1", claims("id-1", "as-1"))));

        let missing = registry.update_channel_api_session(
            channel,
            Arc::new(ApiSession::from_record(ApiSessionRecord::new("x", "t2"))),
        );
        assert!(matches!(missing, Err(SessionError::MissingClaims)));

        let mut refresh = claims("id-1", "as-1");
        refresh.token_type = "refresh".to_string();
        let wrong_type =
            registry.update_channel_api_session(channel, Arc::new(ApiSession::from_claims("t2", refresh)));
        assert!(matches!(wrong_type, Err(SessionError::InvalidTokenType { .. })));
    }

    #[test]
    fn rebind_unbound_channel_is_rejected() {
        let registry = SessionRegistry::new();
        let result = registry.update_channel_api_session(
            ChannelId::new(),
            Arc::new(ApiSession::from_claims("t", claims("id-1", "as-1"))),
        );
        assert!(matches!(result, Err(SessionError::ChannelNotBound(_))));
    }

    #[test]
    fn certificate_fingerprint_matching() {
        let der = b"certificate bytes";
        let session = ApiSession::from_record(
            ApiSessionRecord::new("1", "token").with_fingerprint(certificate_fingerprint(der)),
        );

        assert!(session.matches_certificate(der));
        assert!(!session.matches_certificate(b"other certificate"));
    }
}
