//! Network-session lifecycle state machine.
//!
//! A network session is tracked per token as:
//!
//! ```text
//! Unknown ──open──► Active(1) ──open──► Active(n+1)
//!                      │  ▲                 │
//!                      │  └─────close───────┘
//!                      ├─close at 1 / remove──► Tombstoned(t) ──expire──► Unknown
//!                      └─mark──► Draining(n, t) ──close at 1 / remove──► Tombstoned
//! ```
//!
//! `Unknown` is represented by `None`. The consumer count and the removal
//! mark are independent: marking a session that is still in use records the
//! removal without dropping the count (`Draining`), so reconciliation keeps
//! validating it until its last consumer closes.
//!
//! Every transition is a pure function of the previous state and the clock
//! reading passed in, so a concurrent map can apply it inside a single entry
//! lock: there is never a moment where a key has dropped out of the active
//! set but is not yet tombstoned.

use std::time::{Duration, Instant};

/// Tracked state of one network-session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSessionState {
    /// In use by `count` consumers (always at least one).
    Active {
        /// Number of open consumers.
        count: u32,
    },
    /// Marked removed at `removed_at` while `count` consumers still use it.
    Draining {
        /// Number of open consumers.
        count: u32,
        /// When the removal was recorded.
        removed_at: Instant,
    },
    /// Removed at `removed_at`; kept to answer "was this just removed".
    Tombstoned {
        /// When the session was removed.
        removed_at: Instant,
    },
}

impl NetworkSessionState {
    /// A consumer started using the session.
    ///
    /// A removed session is not revived.
    pub fn open(state: Option<Self>) -> Option<Self> {
        match state {
            None => Some(Self::Active { count: 1 }),
            Some(Self::Active { count }) => Some(Self::Active {
                count: count.saturating_add(1),
            }),
            removed => removed,
        }
    }

    /// A consumer's connection closed.
    ///
    /// The last close tombstones the session.
    pub fn close(state: Option<Self>, now: Instant) -> Option<Self> {
        match state {
            Some(Self::Active { count }) | Some(Self::Draining { count, .. }) if count <= 1 => {
                Some(Self::Tombstoned { removed_at: now })
            }
            Some(Self::Active { count }) => Some(Self::Active { count: count - 1 }),
            Some(Self::Draining { count, removed_at }) => Some(Self::Draining {
                count: count - 1,
                removed_at,
            }),
            other => other,
        }
    }

    /// The controller removed the session.
    ///
    /// Only sessions the router knew about are tombstoned; an existing
    /// tombstone keeps its original timestamp.
    pub fn remove(state: Option<Self>, now: Instant) -> Option<Self> {
        match state {
            Some(Self::Active { .. }) => Some(Self::Tombstoned { removed_at: now }),
            Some(Self::Draining { removed_at, .. }) => Some(Self::Tombstoned { removed_at }),
            other => other,
        }
    }

    /// Record the session as just removed. The latest mark sets the
    /// timestamp; consumers still using the session keep their count.
    pub fn mark_removed(state: Option<Self>, now: Instant) -> Option<Self> {
        match state {
            Some(Self::Active { count }) | Some(Self::Draining { count, .. }) => {
                Some(Self::Draining {
                    count,
                    removed_at: now,
                })
            }
            _ => Some(Self::Tombstoned { removed_at: now }),
        }
    }

    /// Whether this is a tombstone older than `retention`. Sessions still in
    /// use never expire.
    pub fn is_expired(&self, now: Instant, retention: Duration) -> bool {
        match self {
            Self::Tombstoned { removed_at } => now.saturating_duration_since(*removed_at) >= retention,
            Self::Active { .. } | Self::Draining { .. } => false,
        }
    }

    /// Whether the session is in use.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. } | Self::Draining { .. })
    }

    /// Whether the session was recently removed.
    pub fn is_tombstoned(&self) -> bool {
        matches!(self, Self::Tombstoned { .. } | Self::Draining { .. })
    }

    /// Number of consumers using the session.
    pub fn consumers(&self) -> u32 {
        match self {
            Self::Active { count } | Self::Draining { count, .. } => *count,
            Self::Tombstoned { .. } => 0,
        }
    }
}
