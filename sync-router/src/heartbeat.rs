//! Recurring timed operations.
//!
//! A [`HeartbeatRunner`] owns a set of [`Operation`]s, each run on its own
//! interval until shutdown. Intervals must fall within the runner's bounds.
//! A failed tick is logged and the operation runs again on the next
//! interval.

use crate::channel::{send_control, Channel};
use crate::error::{HeartbeatError, RouterResult};
use crate::synchronizer::Synchronizer;
use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sync_types::{ControlMessage, EventIndex, Heartbeat};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A unit of recurring work.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// How often the operation runs.
    fn interval(&self) -> Duration;

    /// Run one tick.
    async fn run(&self) -> RouterResult<()>;
}

/// Runs operations on their intervals until shutdown.
pub struct HeartbeatRunner {
    min_interval: Duration,
    max_interval: Duration,
    operations: Vec<Arc<dyn Operation>>,
    handles: Vec<JoinHandle<()>>,
    started: bool,
}

impl std::fmt::Debug for HeartbeatRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatRunner")
            .field("min_interval", &self.min_interval)
            .field("max_interval", &self.max_interval)
            .field("operations", &self.operations.len())
            .field("started", &self.started)
            .finish()
    }
}

impl HeartbeatRunner {
    /// Shortest interval any runner accepts.
    pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

    /// Longest interval any runner accepts.
    pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

    /// Create a runner accepting operation intervals in `[min, max]`.
    pub fn new(min_interval: Duration, max_interval: Duration) -> Result<Self, HeartbeatError> {
        if min_interval < Self::MIN_INTERVAL || min_interval > max_interval {
            return Err(HeartbeatError::IntervalOutOfBounds(min_interval));
        }
        if max_interval > Self::MAX_INTERVAL {
            return Err(HeartbeatError::IntervalOutOfBounds(max_interval));
        }

        Ok(Self {
            min_interval,
            max_interval,
            operations: Vec::new(),
            handles: Vec::new(),
            started: false,
        })
    }

    /// Check that an operation named `name` could run every `interval`.
    pub fn check_interval(&self, name: &str, interval: Duration) -> Result<(), HeartbeatError> {
        if interval < self.min_interval || interval > self.max_interval {
            return Err(HeartbeatError::OperationOutOfBounds {
                name: name.to_string(),
                interval,
            });
        }
        Ok(())
    }

    /// Register an operation. Operations added after `start` never run.
    pub fn add_operation(&mut self, operation: Arc<dyn Operation>) -> Result<(), HeartbeatError> {
        self.check_interval(operation.name(), operation.interval())?;
        self.operations.push(operation);
        Ok(())
    }

    /// Number of registered operations.
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Whether `start` has been called.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Spawn one task per operation. Each stops when `shutdown` flips.
    pub fn start(&mut self, shutdown: watch::Receiver<bool>) -> Result<(), HeartbeatError> {
        if self.started {
            return Err(HeartbeatError::AlreadyStarted);
        }
        self.started = true;

        for operation in &self.operations {
            self.handles
                .push(spawn_operation(Arc::clone(operation), shutdown.clone()));
        }
        Ok(())
    }

    /// Wait for every operation task to finish.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Heartbeat operation task failed: {}", e);
            }
        }
    }
}

fn spawn_operation(
    operation: Arc<dyn Operation>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = operation.interval();
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!("Operation {} started (interval: {:?})", operation.name(), interval);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = timer.tick() => {
                    if let Err(e) = operation.run().await {
                        tracing::error!("Operation {} failed: {}", operation.name(), e);
                    }
                }
            }
        }

        tracing::debug!("Operation {} stopped", operation.name());
    })
}

/// Sends a heartbeat to the controller, then reconciles network sessions.
pub struct HeartbeatOperation {
    sync: Arc<Synchronizer>,
    channel: Arc<dyn Channel>,
    interval: Duration,
}

impl HeartbeatOperation {
    /// Create a heartbeat over `channel` every `interval`.
    pub fn new(sync: Arc<Synchronizer>, channel: Arc<dyn Channel>, interval: Duration) -> Self {
        Self {
            sync,
            channel,
            interval,
        }
    }
}

#[async_trait]
impl Operation for HeartbeatOperation {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> RouterResult<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let heartbeat = ControlMessage::Heartbeat(Heartbeat {
            timestamp,
            current_index: self.sync.current_index().map(EventIndex::new),
        });

        let metrics = self.sync.metrics();
        if let Err(e) = send_control(self.channel.as_ref(), &heartbeat).await {
            metrics.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
            return Err(e.into());
        }
        metrics.heartbeats_sent.fetch_add(1, Ordering::Relaxed);

        let validation = &self.sync.config().validation;
        self.sync
            .validate_sessions(
                self.channel.as_ref(),
                validation.chunk_size,
                validation.min_interval(),
                validation.max_interval(),
            )
            .await?;
        Ok(())
    }
}
