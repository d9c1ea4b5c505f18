//! Strictly ordered data-state event log.
//!
//! Every event carries an index assigned by the controller. The log accepts
//! an event only if its index is exactly one past the last accepted index
//! (the first event sets the baseline). Two variants share the [`EventLog`]
//! contract:
//!
//! - [`TrackingEventLog`] remembers only the current index. Routers use it,
//!   since nothing ever asks them for history.
//! - [`RetainingEventLog`] additionally keeps the last N events in a circular
//!   window so a lagging consumer can be caught up by replay instead of a
//!   full resync.
//!
//! Both variants invoke the caller's apply callback while still holding the
//! log's lock. Anyone who reads the index under the same lock (see
//! [`EventLog::while_locked`]) therefore sees exactly the state produced by
//! applying every event up to that index.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use overlay_sync_types::DataEvent;

/// Something with a position in an ordered stream.
pub trait Sequenced {
    /// The event's index.
    fn sequence(&self) -> u64;
}

impl Sequenced for DataEvent {
    fn sequence(&self) -> u64 {
        self.index.value()
    }
}

/// Error type for event log operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventLogError {
    /// The event does not directly follow the current index.
    #[error("out of order event detected, current index: {current}, expected index: {expected}, received index: {received}")]
    OutOfOrder {
        /// Last accepted index.
        current: u64,
        /// The only index that would have been accepted.
        expected: u64,
        /// The index that was offered.
        received: u64,
    },
}

/// Callback run under the log lock once an event is accepted.
pub type OnApplied<'a, E> = &'a mut dyn FnMut(u64, &E);

/// Contract shared by the tracking-only and retaining logs.
pub trait EventLog<E>: Send + Sync {
    /// Accept `event` if it directly follows the current index.
    ///
    /// On success `on_applied` runs with the log still locked. It must not
    /// block or call back into this log.
    fn store(&self, event: E, on_applied: Option<OnApplied<'_, E>>) -> Result<(), EventLogError>;

    /// Last accepted index, or `None` before the first event.
    fn current_index(&self) -> Option<u64>;

    /// Events strictly after `start_index`, up to and including the current
    /// index.
    ///
    /// Returns `None` when `start_index` is not retained (evicted or never
    /// stored) and always when the log keeps no history; the consumer must
    /// then resync from a full snapshot. A log that keeps history returns an
    /// empty list when `start_index` is the current index.
    fn replay_from(&self, start_index: u64) -> Option<Vec<Arc<E>>>;

    /// Run `f` with the log locked, passing the current index.
    ///
    /// `f` must not call back into this log.
    fn while_locked(&self, f: &mut dyn FnMut(Option<u64>));
}

fn check_order(current: Option<u64>, received: u64) -> Result<(), EventLogError> {
    match current {
        None => Ok(()),
        Some(current) if current.checked_add(1) == Some(received) => Ok(()),
        Some(current) => Err(EventLogError::OutOfOrder {
            current,
            expected: current.saturating_add(1),
            received,
        }),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic inside an apply callback must not wedge the log forever.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Event log that tracks the current index and keeps no history.
#[derive(Debug, Default)]
pub struct TrackingEventLog {
    index: Mutex<Option<u64>>,
}

impl TrackingEventLog {
    /// Create a log with no index yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log resuming from a known index (e.g. a persisted model).
    pub fn with_index(index: u64) -> Self {
        Self {
            index: Mutex::new(Some(index)),
        }
    }
}

impl<E: Sequenced + Send + Sync> EventLog<E> for TrackingEventLog {
    fn store(&self, event: E, on_applied: Option<OnApplied<'_, E>>) -> Result<(), EventLogError> {
        let mut index = lock(&self.index);
        let received = event.sequence();
        check_order(*index, received)?;
        *index = Some(received);

        if let Some(apply) = on_applied {
            apply(received, &event);
        }
        Ok(())
    }

    fn current_index(&self) -> Option<u64> {
        *lock(&self.index)
    }

    fn replay_from(&self, _start_index: u64) -> Option<Vec<Arc<E>>> {
        None
    }

    fn while_locked(&self, f: &mut dyn FnMut(Option<u64>)) {
        let index = lock(&self.index);
        f(*index);
    }
}

/// Circular window over the most recent events.
///
/// `slots[i]` holds the index of the event stored in slot `i`, `events` maps
/// that index to the payload. Eviction always removes from both.
#[derive(Debug)]
struct Window<E> {
    slots: Vec<Option<u64>>,
    events: HashMap<u64, Arc<E>>,
    head: usize,
    current: Option<u64>,
}

/// Event log that retains the last `capacity` events for replay.
#[derive(Debug)]
pub struct RetainingEventLog<E> {
    window: Mutex<Window<E>>,
}

impl<E> RetainingEventLog<E> {
    /// Create a log retaining up to `capacity` events (at least one).
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// Create a log resuming from a known index with an empty window.
    ///
    /// Only the resumed index itself can be replayed (as an empty list)
    /// until new events arrive.
    pub fn with_index(capacity: usize, index: u64) -> Self {
        Self::build(capacity, Some(index))
    }

    fn build(capacity: usize, current: Option<u64>) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: Mutex::new(Window {
                slots: vec![None; capacity],
                events: HashMap::with_capacity(capacity),
                head: 0,
                current,
            }),
        }
    }

    /// Maximum number of retained events.
    pub fn capacity(&self) -> usize {
        lock(&self.window).slots.len()
    }

    /// Number of events currently retained.
    pub fn len(&self) -> usize {
        lock(&self.window).events.len()
    }

    /// Whether no events are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Sequenced + Send + Sync> EventLog<E> for RetainingEventLog<E> {
    fn store(&self, event: E, on_applied: Option<OnApplied<'_, E>>) -> Result<(), EventLogError> {
        let mut window = lock(&self.window);
        let received = event.sequence();
        check_order(window.current, received)?;

        let target = (window.head + 1) % window.slots.len();
        if let Some(evicted) = window.slots[target].take() {
            window.events.remove(&evicted);
        }

        let event = Arc::new(event);
        window.slots[target] = Some(received);
        window.events.insert(received, Arc::clone(&event));
        window.head = target;
        window.current = Some(received);

        if let Some(apply) = on_applied {
            apply(received, event.as_ref());
        }
        Ok(())
    }

    fn current_index(&self) -> Option<u64> {
        lock(&self.window).current
    }

    fn replay_from(&self, start_index: u64) -> Option<Vec<Arc<E>>> {
        let window = lock(&self.window);
        if window.current == Some(start_index) {
            return Some(Vec::new());
        }
        if !window.events.contains_key(&start_index) {
            return None;
        }

        // Slot position says nothing about logical order once the window
        // has wrapped, so find the slot by value.
        let start = window
            .slots
            .iter()
            .position(|slot| *slot == Some(start_index))?;

        if start == window.head {
            return Some(Vec::new());
        }

        let head = window.head;
        let resolve = |slot: &Option<u64>| slot.and_then(|index| window.events.get(&index).cloned());

        let replay: Vec<Arc<E>> = if start < head {
            window.slots[start + 1..=head].iter().filter_map(resolve).collect()
        } else {
            window.slots[start + 1..]
                .iter()
                .chain(window.slots[..=head].iter())
                .filter_map(resolve)
                .collect()
        };
        Some(replay)
    }

    fn while_locked(&self, f: &mut dyn FnMut(Option<u64>)) {
        let window = lock(&self.window);
        f(window.current);
    }
}
