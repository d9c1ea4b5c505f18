//! The router-side synchronizer.
//!
//! `Synchronizer` owns the data model, trust store and session registries.
//! It applies ordered data-state events, answers session and identity
//! queries for the transport layer, runs reconciliation against the
//! controller, and publishes/reloads the data model.

use crate::channel::{send_control, Channel};
use crate::config::Config;
use crate::error::{
    ChannelError, HeartbeatError, RouterError, RouterResult, SessionError, TrustResult,
};
use crate::heartbeat::{HeartbeatOperation, HeartbeatRunner};
use crate::model::{ModelCell, RouterDataModel};
use crate::network::NetworkSessions;
use crate::persist;
use crate::registry::{ApiSession, SessionRegistry};
use crate::trust::TrustStore;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sync_core::{jittered_interval, LookupBackoff, SyncTracker};
use sync_types::{
    is_bearer_token, AccessClaims, ControlMessage, DataEvent, ValidateSessionsRequest,
    TOKEN_TYPE_ACCESS,
};
use tokio::sync::watch;

/// Operational metrics for monitoring synchronizer activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Data-state events applied.
    pub events_applied: AtomicU64,
    /// Data-state events rejected as out of order.
    pub events_rejected: AtomicU64,
    /// Full data-model replacements.
    pub model_replacements: AtomicU64,
    /// Session validation chunks sent to the controller.
    pub validation_chunks_sent: AtomicU64,
    /// Reconciliation passes aborted by a send failure.
    pub validation_failures: AtomicU64,
    /// Heartbeats sent.
    pub heartbeats_sent: AtomicU64,
    /// Heartbeat ticks that failed.
    pub heartbeat_failures: AtomicU64,
    /// Client certificates that failed verification.
    pub certificate_failures: AtomicU64,
    /// Bearer tokens that failed verification or policy checks.
    pub token_failures: AtomicU64,
}

/// How a consumer at a given index catches up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchUp {
    /// Nothing to send.
    UpToDate,
    /// Send these events, in order.
    Replay(Vec<Arc<DataEvent>>),
    /// The index is not retained; send the full model.
    FullResync,
}

/// Main synchronizer.
pub struct Synchronizer {
    config: Config,
    model: ModelCell,
    trust: TrustStore,
    api_sessions: SessionRegistry,
    network_sessions: Arc<NetworkSessions>,
    tracker: SyncTracker,
    metrics: RouterMetrics,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("config", &self.config)
            .field("model", &self.model.load())
            .field("api_sessions", &self.api_sessions)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Synchronizer {
    /// Create a synchronizer with an empty model and no trusted keys.
    pub fn new(config: Config) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            model: ModelCell::new(config.event_log.capacity),
            config,
            trust: TrustStore::new(),
            api_sessions: SessionRegistry::new(),
            network_sessions: Arc::new(NetworkSessions::new()),
            tracker: SyncTracker::new(),
            metrics: RouterMetrics::default(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Get the router configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the trust store.
    pub fn trust(&self) -> &TrustStore {
        &self.trust
    }

    /// Get access to the API-session registry.
    pub fn api_sessions(&self) -> &SessionRegistry {
        &self.api_sessions
    }

    /// Get access to the network-session registry.
    pub fn network_sessions(&self) -> &Arc<NetworkSessions> {
        &self.network_sessions
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    /// A receiver that flips to `true` on shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Signal every background task to stop.
    pub fn shutdown(&self) {
        tracing::info!("Synchronizer shutting down");
        self.shutdown_tx.send_replace(true);
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    // ----- Data model -----

    /// The current data model. Never empty-handed: an empty model is
    /// installed on first use.
    pub fn data_model(&self) -> Arc<RouterDataModel> {
        self.model.load()
    }

    /// Replace the data model, its event log and the trusted key set.
    ///
    /// The swap happens under the outgoing model's log lock, so an event
    /// being applied to the old model either finishes before the swap or
    /// sees that its model was replaced and leaves the trust store alone.
    pub fn set_data_model(&self, model: RouterDataModel) {
        let model = Arc::new(model);
        loop {
            let current = self.model.load();
            let mut swapped = false;
            current.while_locked(&mut |_: Option<u64>| {
                if Arc::ptr_eq(&self.model.load(), &current) {
                    self.trust.install(model.public_keys());
                    self.model.store(Arc::clone(&model));
                    swapped = true;
                }
            });
            if swapped {
                break;
            }
        }
        self.metrics.model_replacements.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Data model replaced at index {:?}", model.current_index());
    }

    /// Index of the last applied event.
    pub fn current_index(&self) -> Option<u64> {
        self.data_model().current_index()
    }

    /// Apply one data-state event.
    ///
    /// An out-of-order event changes nothing; the caller should request a
    /// full resync. So should a caller told the model was replaced
    /// underneath the event.
    pub fn apply_event(&self, event: DataEvent) -> RouterResult<()> {
        self.apply_to(self.data_model(), event)
    }

    fn apply_to(&self, model: Arc<RouterDataModel>, event: DataEvent) -> RouterResult<()> {
        let mut replaced = false;
        let result = model.apply_event(event, &mut |applied: &DataEvent| {
            if !Arc::ptr_eq(&self.model.load(), &model) {
                replaced = true;
                return;
            }
            if applied.touches_trust() {
                self.trust.install(model.public_keys());
            }
        });

        match result {
            Ok(()) if replaced => {
                tracing::warn!("Data-state event applied to a replaced model");
                Err(RouterError::ModelReplaced)
            }
            Ok(()) => {
                self.metrics.events_applied.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.metrics.events_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Rejected data-state event: {}", e);
                Err(e.into())
            }
        }
    }

    /// Decide how a consumer that last saw `from` catches up.
    pub fn catch_up(&self, from: u64) -> CatchUp {
        let model = self.data_model();
        let mut plan = CatchUp::FullResync;
        model.while_locked(&mut |current: Option<u64>| {
            if current == Some(from) {
                plan = CatchUp::UpToDate;
            }
        });
        if plan == CatchUp::UpToDate {
            return plan;
        }

        match model.replay_from(from) {
            Some(events) if events.is_empty() => CatchUp::UpToDate,
            Some(events) => CatchUp::Replay(events),
            None => CatchUp::FullResync,
        }
    }

    /// Load the model saved at `path`, or start empty.
    pub async fn load_model(&self, path: &Path) {
        let model = persist::load_model_or_empty(path, self.model.capacity()).await;
        self.set_data_model(model);
    }

    /// Save the model to `path` every `interval` until shutdown.
    pub fn start_model_save(
        self: &Arc<Self>,
        path: PathBuf,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let sync = Arc::clone(self);
        persist::spawn_model_save(
            move || sync.data_model(),
            path,
            interval,
            self.shutdown_signal(),
        )
    }

    // ----- Sync tracking -----

    /// Record `sync_id` as the full sync in progress.
    pub fn mark_sync_in_progress(&self, sync_id: &str) {
        tracing::debug!("Sync {} in progress", sync_id);
        self.tracker.mark_in_progress(sync_id);
    }

    /// Clear the in-progress marker if it is `sync_id`.
    pub fn mark_sync_stopped(&self, sync_id: &str) {
        if !self.tracker.mark_stopped(sync_id) {
            tracing::debug!("Ignoring stop for stale sync {}", sync_id);
        }
    }

    /// Whether a full sync is in progress.
    pub fn is_sync_in_progress(&self) -> bool {
        self.tracker.is_in_progress()
    }

    // ----- Trust -----

    /// Verify a client certificate against the trusted issuers.
    pub fn verify_client_certificate(&self, der: &[u8]) -> TrustResult<()> {
        let result = self.trust.verify_client_certificate(der);
        if let Err(e) = &result {
            self.metrics.certificate_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Client certificate verification failed: {}", e);
        }
        result
    }

    /// Verify a bearer token and require it to be an access token.
    pub fn parse_jwt(&self, token: &str) -> RouterResult<AccessClaims> {
        let claims = self.trust.verify_signed_token(token)?;
        if claims.token_type != TOKEN_TYPE_ACCESS {
            return Err(SessionError::InvalidTokenType {
                expected: TOKEN_TYPE_ACCESS.to_string(),
                got: claims.token_type,
            }
            .into());
        }
        Ok(claims)
    }

    // ----- Session lookup -----

    /// Look up the API session for `token`.
    ///
    /// With HA enabled, bearer tokens are verified instead of looked up and
    /// must name the expected audience.
    pub fn get_api_session(&self, token: &str) -> Option<Arc<ApiSession>> {
        if self.config.sessions.ha_enabled && is_bearer_token(token) {
            return self.api_session_from_jwt(token);
        }

        self.api_sessions
            .api_session(token)
            .map(|record| Arc::new(ApiSession::from_record((*record).clone())))
    }

    fn api_session_from_jwt(&self, token: &str) -> Option<Arc<ApiSession>> {
        let claims = match self.parse_jwt(token) {
            Ok(claims) => claims,
            Err(e) => {
                self.metrics.token_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("JWT validation failed: {}", e);
                return None;
            }
        };

        let audience = &self.config.sessions.expected_audience;
        if !claims.has_audience(audience) {
            self.metrics.token_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                "Provided a token with invalid audience {:?}, expected: {}",
                claims.aud,
                audience
            );
            return None;
        }

        Some(Arc::new(ApiSession::from_claims(token, claims)))
    }

    /// Look up the API session for `token`, waiting up to `timeout` for it
    /// to propagate.
    ///
    /// Polls with exponential backoff (1ms doubling to 1s). Gives up with
    /// `None` at the deadline or on shutdown.
    pub async fn get_api_session_with_timeout(
        &self,
        token: &str,
        timeout: Duration,
    ) -> Option<Arc<ApiSession>> {
        if let Some(session) = self.get_api_session(token) {
            return Some(session);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut shutdown = self.shutdown_signal();

        for wait in LookupBackoff::default() {
            let now = tokio::time::Instant::now();
            if now >= deadline || *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(wait.min(deadline - now)) => {}
                _ = shutdown.changed() => break,
            }

            if let Some(session) = self.get_api_session(token) {
                return Some(session);
            }
        }
        None
    }

    // ----- Reconciliation -----

    /// Ask the controller to validate every tracked network session.
    ///
    /// Tokens are sent in chunks of `chunk_size` with a jittered pause
    /// between chunks. The first send failure aborts the pass. Returns the
    /// number of chunks sent.
    pub async fn validate_sessions(
        &self,
        channel: &dyn Channel,
        chunk_size: usize,
        min_interval: Duration,
        max_interval: Duration,
    ) -> Result<usize, ChannelError> {
        let tokens = self.network_sessions.active_tokens();
        let mut chunks = tokens.chunks(chunk_size.max(1)).peekable();
        let mut sent = 0;

        while let Some(chunk) = chunks.next() {
            tracing::debug!("Validating {} network sessions", chunk.len());

            let request = ControlMessage::ValidateSessions(ValidateSessionsRequest {
                session_tokens: chunk.to_vec(),
            });
            if let Err(e) = send_control(channel, &request).await {
                self.metrics.validation_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Failed to send validate sessions request: {}", e);
                return Err(e);
            }
            sent += 1;
            self.metrics
                .validation_chunks_sent
                .fetch_add(1, Ordering::Relaxed);

            if chunks.peek().is_some() {
                if self.is_shutting_down() {
                    break;
                }
                let mut shutdown = self.shutdown_signal();
                tokio::select! {
                    _ = tokio::time::sleep(jittered_interval(min_interval, max_interval)) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }

        Ok(sent)
    }

    // ----- Heartbeat -----

    /// Start the heartbeat over `channel`.
    ///
    /// Each tick sends a heartbeat and then reconciles network sessions.
    /// An error here means the router would have no liveness signal and
    /// should be treated as fatal.
    pub fn start_heartbeat(
        self: &Arc<Self>,
        channel: Arc<dyn Channel>,
    ) -> Result<HeartbeatRunner, HeartbeatError> {
        let interval = Duration::from_secs(self.config.heartbeat.interval_secs);
        let mut runner =
            HeartbeatRunner::new(HeartbeatRunner::MIN_INTERVAL, HeartbeatRunner::MAX_INTERVAL)?;
        runner.add_operation(Arc::new(HeartbeatOperation::new(
            Arc::clone(self),
            channel,
            interval,
        )))?;
        runner.start(self.shutdown_signal())?;
        tracing::info!("Heartbeat starting (interval: {:?})", interval);
        Ok(runner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MockChannel;
    use crate::trust::test_pki::{access_claims, Authority};
    use sync_core::EventLogError;
    use sync_types::{ApiSessionRecord, Audience, ChangeAction, KeyUsage, ModelChange, PublicKey};

    fn sync() -> Synchronizer {
        Synchronizer::new(Config::default())
    }

    fn ha_sync() -> Synchronizer {
        let mut config = Config::default();
        config.sessions.ha_enabled = true;
        Synchronizer::new(config)
    }

    fn key_event(index: u64, action: ChangeAction, ca: &Authority, kid: &str) -> DataEvent {
        DataEvent::new(
            index,
            action,
            ModelChange::PublicKey(ca.trusted_key(
                kid,
                vec![KeyUsage::ClientX509CertValidation, KeyUsage::JwtValidation],
            )),
        )
    }

    #[test]
    fn applying_key_events_reinstalls_trust() {
        let sync = sync();
        let ca = Authority::new("edge-ca");
        let client = ca.issue_client("client");

        sync.apply_event(key_event(1, ChangeAction::Create, &ca, "ca")).unwrap();
        sync.verify_client_certificate(&client).unwrap();

        sync.apply_event(key_event(2, ChangeAction::Delete, &ca, "ca")).unwrap();
        assert!(sync.verify_client_certificate(&client).is_err());
        assert_eq!(sync.metrics().certificate_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn out_of_order_event_is_rejected_and_counted() {
        let sync = sync();
        let ca = Authority::new("edge-ca");
        sync.apply_event(key_event(1, ChangeAction::Create, &ca, "ca")).unwrap();

        let result = sync.apply_event(key_event(5, ChangeAction::Create, &ca, "other"));

        assert!(matches!(
            result,
            Err(RouterError::EventLog(EventLogError::OutOfOrder { received: 5, .. }))
        ));
        assert_eq!(sync.current_index(), Some(1));
        assert_eq!(sync.metrics().events_rejected.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn set_data_model_replaces_index_and_trust() {
        let sync = sync();
        let ca = Authority::new("edge-ca");
        sync.apply_event(key_event(10, ChangeAction::Create, &ca, "ca")).unwrap();

        sync.set_data_model(RouterDataModel::new(0));

        assert_eq!(sync.current_index(), None);
        assert!(sync.trust().snapshot().is_empty());
        sync.apply_event(key_event(1, ChangeAction::Create, &ca, "ca")).unwrap();
    }

    #[test]
    fn catch_up_plans() {
        let mut config = Config::default();
        config.event_log.capacity = 3;
        let sync = Synchronizer::new(config);
        let ca = Authority::new("edge-ca");
        for i in 1..=5 {
            sync.apply_event(key_event(i, ChangeAction::Update, &ca, "ca")).unwrap();
        }

        assert_eq!(sync.catch_up(5), CatchUp::UpToDate);
        match sync.catch_up(3) {
            CatchUp::Replay(events) => {
                let indices: Vec<u64> = events.iter().map(|e| e.index.value()).collect();
                assert_eq!(indices, vec![4, 5]);
            }
            other => panic!("expected replay, got {other:?}"),
        }
        assert_eq!(sync.catch_up(1), CatchUp::FullResync);
    }

    #[test]
    fn tracking_only_log_is_up_to_date_at_current_index() {
        let sync = sync();
        let ca = Authority::new("edge-ca");
        sync.apply_event(key_event(1, ChangeAction::Create, &ca, "ca")).unwrap();
        sync.apply_event(key_event(2, ChangeAction::Update, &ca, "ca")).unwrap();

        assert_eq!(sync.catch_up(2), CatchUp::UpToDate);
    }

    #[test]
    fn tracking_only_log_resyncs_when_behind() {
        let sync = sync();
        let ca = Authority::new("edge-ca");
        sync.apply_event(key_event(1, ChangeAction::Create, &ca, "ca")).unwrap();
        sync.apply_event(key_event(2, ChangeAction::Update, &ca, "ca")).unwrap();

        assert_eq!(sync.catch_up(1), CatchUp::FullResync);
        assert_eq!(sync.catch_up(0), CatchUp::FullResync);
    }

    fn sorted_kids(keys: &[PublicKey]) -> Vec<String> {
        let mut kids: Vec<String> = keys.iter().map(|k| k.kid.clone()).collect();
        kids.sort();
        kids
    }

    #[test]
    fn event_on_replaced_model_leaves_trust_alone() {
        let sync = sync();
        let ca = Authority::new("edge-ca");
        sync.apply_event(key_event(1, ChangeAction::Create, &ca, "old")).unwrap();
        let stale = sync.data_model();

        let replacement = RouterDataModel::new(0);
        replacement
            .apply_event(key_event(1, ChangeAction::Create, &ca, "new"), &mut |_: &DataEvent| {})
            .unwrap();
        sync.set_data_model(replacement);

        let result = sync.apply_to(stale, key_event(2, ChangeAction::Create, &ca, "late"));

        assert!(matches!(result, Err(RouterError::ModelReplaced)));
        assert_eq!(sorted_kids(sync.trust().snapshot().keys()), vec!["new".to_string()]);
        assert_eq!(sync.metrics().events_applied.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn trust_follows_the_published_model_under_concurrent_replace() {
        let sync = Arc::new(sync());
        let template = Authority::new("edge-ca").trusted_key(
            "template",
            vec![KeyUsage::ClientX509CertValidation, KeyUsage::JwtValidation],
        );
        let event = move |index: u64, kid: String| {
            let mut key = template.clone();
            key.kid = kid;
            DataEvent::new(index, ChangeAction::Create, ModelChange::PublicKey(key))
        };

        let applier = {
            let sync = Arc::clone(&sync);
            let event = event.clone();
            std::thread::spawn(move || {
                for n in 0..300 {
                    let index = sync.current_index().map_or(1, |i| i + 1);
                    let _ = sync.apply_event(event(index, format!("applied-{n}")));
                }
            })
        };
        let replacer = {
            let sync = Arc::clone(&sync);
            std::thread::spawn(move || {
                for n in 0..100 {
                    let model = RouterDataModel::new(0);
                    model
                        .apply_event(event(1, format!("replaced-{n}")), &mut |_: &DataEvent| {})
                        .unwrap();
                    sync.set_data_model(model);
                }
            })
        };
        applier.join().unwrap();
        replacer.join().unwrap();

        assert_eq!(
            sorted_kids(sync.trust().snapshot().keys()),
            sorted_kids(&sync.data_model().public_keys())
        );
    }


    #[test]
    fn sync_tracking_ignores_stale_stop() {
        let sync = sync();
        assert!(!sync.is_sync_in_progress());

        sync.mark_sync_in_progress("a");
        sync.mark_sync_in_progress("b");
        sync.mark_sync_stopped("a");
        assert!(sync.is_sync_in_progress());

        sync.mark_sync_stopped("b");
        assert!(!sync.is_sync_in_progress());
    }

    #[test]
    fn get_api_session_uses_registry() {
        let sync = sync();
        sync.api_sessions()
            .add_api_session(ApiSessionRecord::new("1", "token-1"));

        let session = sync.get_api_session("token-1").unwrap();
        assert_eq!(session.record.id, "1");
        assert!(session.claims.is_none());
        assert!(sync.get_api_session("token-2").is_none());
    }

    #[test]
    fn ha_mode_accepts_valid_bearer_token() {
        let sync = ha_sync();
        let signer = Authority::new("signer");
        sync.trust()
            .install(vec![signer.trusted_key("sig", vec![KeyUsage::JwtValidation])]);

        let token = signer.sign("sig", &access_claims("identity-1", "as-1"));
        let session = sync.get_api_session(&token).unwrap();

        assert_eq!(session.token(), token);
        assert_eq!(session.claims.as_ref().unwrap().sub, "identity-1");
    }

    #[test]
    fn ha_mode_rejects_wrong_audience_and_type() {
        let sync = ha_sync();
        let signer = Authority::new("signer");
        sync.trust()
            .install(vec![signer.trusted_key("sig", vec![KeyUsage::JwtValidation])]);

        let mut wrong_audience = access_claims("identity-1", "as-1");
        wrong_audience.aud = Audience::One("elsewhere".to_string());
        assert!(sync.get_api_session(&signer.sign("sig", &wrong_audience)).is_none());

        let mut refresh = access_claims("identity-1", "as-1");
        refresh.token_type = "refresh".to_string();
        assert!(sync.get_api_session(&signer.sign("sig", &refresh)).is_none());

        assert_eq!(sync.metrics().token_failures.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn bearer_tokens_are_looked_up_when_ha_disabled() {
        let sync = sync();
        let signer = Authority::new("signer");
        sync.trust()
            .install(vec![signer.trusted_key("sig", vec![KeyUsage::JwtValidation])]);

        let token = signer.sign("sig", &access_claims("identity-1", "as-1"));
        assert!(sync.get_api_session(&token).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_waits_for_propagation() {
        let sync = Arc::new(sync());
        let writer = Arc::clone(&sync);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            writer
                .api_sessions()
                .add_api_session(ApiSessionRecord::new("1", "late"));
        });

        let session = sync
            .get_api_session_with_timeout("late", Duration::from_secs(5))
            .await;
        assert!(session.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_gives_up_at_deadline() {
        let sync = sync();
        let started = tokio::time::Instant::now();

        let session = sync
            .get_api_session_with_timeout("never", Duration::from_millis(500))
            .await;

        assert!(session.is_none());
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_stops_on_shutdown() {
        let sync = Arc::new(sync());
        let stopper = Arc::clone(&sync);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.shutdown();
        });
        let started = tokio::time::Instant::now();

        let session = sync
            .get_api_session_with_timeout("never", Duration::from_secs(60))
            .await;

        assert!(session.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    fn track(sync: &Synchronizer, count: usize) -> Vec<crate::listeners::ListenerHandle> {
        (0..count)
            .map(|i| {
                sync.network_sessions()
                    .add_removed_listener(&format!("session-{i}"), |_| {})
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn validation_sends_every_token_in_chunks() {
        let sync = sync();
        let _handles = track(&sync, 5);
        let channel = MockChannel::new();

        let sent = sync
            .validate_sessions(&channel, 2, Duration::from_millis(10), Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(sent, 3);
        let mut tokens = Vec::new();
        for message in channel.sent_control_messages() {
            match message {
                ControlMessage::ValidateSessions(request) => {
                    assert!(request.session_tokens.len() <= 2);
                    tokens.extend(request.session_tokens);
                }
                other => panic!("unexpected message {other:?}"),
            }
        }
        tokens.sort();
        assert_eq!(tokens, (0..5).map(|i| format!("session-{i}")).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn validation_aborts_pass_on_send_failure() {
        let sync = sync();
        let _handles = track(&sync, 5);
        let channel = MockChannel::new();
        channel.fail_next_send("controller unreachable");

        let result = sync
            .validate_sessions(&channel, 2, Duration::from_millis(10), Duration::from_millis(20))
            .await;

        assert!(matches!(result, Err(ChannelError::SendFailed(_))));
        assert!(channel.sent_messages().is_empty());
        assert_eq!(sync.metrics().validation_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn validation_with_no_sessions_sends_nothing() {
        let sync = sync();
        let channel = MockChannel::new();

        let sent = sync
            .validate_sessions(&channel, 10, Duration::ZERO, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(sent, 0);
        assert!(channel.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn load_model_falls_back_to_empty() {
        let sync = sync();
        let dir = tempfile::tempdir().unwrap();

        sync.load_model(&dir.path().join("missing.mpk")).await;

        assert_eq!(sync.current_index(), None);
        assert_eq!(sync.metrics().model_replacements.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn loaded_model_reinstalls_trust() {
        let sync = sync();
        let ca = Authority::new("edge-ca");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.mpk");

        let model = RouterDataModel::new(0);
        model
            .apply_event(key_event(3, ChangeAction::Create, &ca, "ca"), &mut |_: &DataEvent| {})
            .unwrap();
        persist::save_model(&model, &path).await.unwrap();

        sync.load_model(&path).await;

        assert_eq!(sync.current_index(), Some(3));
        sync.verify_client_certificate(&ca.issue_client("client")).unwrap();
    }
}
