//! The router's data model and the cell publishing it.
//!
//! The model owns its event log. Every change to the model happens inside
//! the log's apply callback, so the log index and the model content never
//! disagree, and replacing the model replaces both together.

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sync_core::event_log::OnApplied;
use sync_core::{EventLog, EventLogError, RetainingEventLog, TrackingEventLog};
use sync_types::{ChangeAction, DataEvent, Entity, ModelChange, PublicKey};

/// Serializable content of a [`RouterDataModel`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    /// Index of the last applied event.
    pub index: Option<u64>,
    /// Trusted public keys.
    pub public_keys: Vec<PublicKey>,
    /// Every other entity.
    pub entities: Vec<Entity>,
}

/// Aggregated data state received from the controller.
pub struct RouterDataModel {
    log: Box<dyn EventLog<DataEvent>>,
    capacity: usize,
    public_keys: DashMap<String, PublicKey>,
    entities: DashMap<(String, String), Entity>,
}

impl std::fmt::Debug for RouterDataModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterDataModel")
            .field("index", &self.current_index())
            .field("capacity", &self.capacity)
            .field("public_keys", &self.public_keys.len())
            .field("entities", &self.entities.len())
            .finish()
    }
}

fn event_log(capacity: usize, index: Option<u64>) -> Box<dyn EventLog<DataEvent>> {
    match (capacity, index) {
        (0, None) => Box::new(TrackingEventLog::new()),
        (0, Some(index)) => Box::new(TrackingEventLog::with_index(index)),
        (capacity, None) => Box::new(RetainingEventLog::<DataEvent>::new(capacity)),
        (capacity, Some(index)) => Box::new(RetainingEventLog::<DataEvent>::with_index(capacity, index)),
    }
}

impl RouterDataModel {
    /// An empty model. A `capacity` of zero keeps no replay history.
    pub fn new(capacity: usize) -> Self {
        Self {
            log: event_log(capacity, None),
            capacity,
            public_keys: DashMap::new(),
            entities: DashMap::new(),
        }
    }

    /// A model holding `snapshot`, resuming at its index.
    pub fn from_snapshot(snapshot: ModelSnapshot, capacity: usize) -> Self {
        let model = Self {
            log: event_log(capacity, snapshot.index),
            capacity,
            public_keys: DashMap::new(),
            entities: DashMap::new(),
        };
        for key in snapshot.public_keys {
            model.public_keys.insert(key.kid.clone(), key);
        }
        for entity in snapshot.entities {
            model
                .entities
                .insert((entity.kind.clone(), entity.id.clone()), entity);
        }
        model
    }

    /// Apply `event` if it is next in order.
    ///
    /// `on_applied` runs after the change, with the log still locked. It
    /// must be quick and must not call back into this model's log.
    pub fn apply_event(
        &self,
        event: DataEvent,
        on_applied: &mut dyn FnMut(&DataEvent),
    ) -> Result<(), EventLogError> {
        let apply: OnApplied<'_, DataEvent> = &mut |_index: u64, event: &DataEvent| {
            self.apply_change(event);
            on_applied(event);
        };
        self.log.store(event, Some(apply))
    }

    fn apply_change(&self, event: &DataEvent) {
        match (&event.change, event.action) {
            (ModelChange::PublicKey(key), ChangeAction::Delete) => {
                self.public_keys.remove(&key.kid);
            }
            (ModelChange::PublicKey(key), _) => {
                self.public_keys.insert(key.kid.clone(), key.clone());
            }
            (ModelChange::Entity(entity), ChangeAction::Delete) => {
                self.entities
                    .remove(&(entity.kind.clone(), entity.id.clone()));
            }
            (ModelChange::Entity(entity), _) => {
                self.entities
                    .insert((entity.kind.clone(), entity.id.clone()), entity.clone());
            }
        }
    }

    /// Index of the last applied event.
    pub fn current_index(&self) -> Option<u64> {
        self.log.current_index()
    }

    /// Events after `start_index`, or `None` if they are not retained.
    pub fn replay_from(&self, start_index: u64) -> Option<Vec<Arc<DataEvent>>> {
        self.log.replay_from(start_index)
    }

    /// Run `f` with the event log locked.
    pub fn while_locked(&self, f: &mut dyn FnMut(Option<u64>)) {
        self.log.while_locked(f)
    }

    /// Replay capacity the model was built with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Every trusted public key.
    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.public_keys
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// The public key with id `kid`.
    pub fn public_key(&self, kid: &str) -> Option<PublicKey> {
        self.public_keys.get(kid).map(|key| key.value().clone())
    }

    /// The entity of `kind` with `id`.
    pub fn entity(&self, kind: &str, id: &str) -> Option<Entity> {
        self.entities
            .get(&(kind.to_string(), id.to_string()))
            .map(|entity| entity.value().clone())
    }

    /// Number of non-key entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// A consistent copy of the model content and index.
    pub fn snapshot(&self) -> ModelSnapshot {
        let mut snapshot = ModelSnapshot::default();
        self.log.while_locked(&mut |index: Option<u64>| {
            snapshot.index = index;
            snapshot.public_keys = self.public_keys();
            snapshot.entities = self
                .entities
                .iter()
                .map(|entry| entry.value().clone())
                .collect();
        });
        snapshot
    }
}

/// Atomically replaceable holder of the current data model.
///
/// Readers get an `Arc` and keep using it even if the model is replaced
/// underneath them.
#[derive(Debug)]
pub struct ModelCell {
    current: ArcSwapOption<RouterDataModel>,
    capacity: usize,
}

impl ModelCell {
    /// An empty cell. Models created on demand get `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            capacity,
        }
    }

    /// The current model, installing an empty one if there is none yet.
    pub fn load(&self) -> Arc<RouterDataModel> {
        if let Some(model) = self.current.load_full() {
            return model;
        }

        let empty = Arc::new(RouterDataModel::new(self.capacity));
        let previous = self
            .current
            .compare_and_swap(&None::<Arc<RouterDataModel>>, Some(Arc::clone(&empty)));
        match &*previous {
            Some(existing) => Arc::clone(existing),
            None => empty,
        }
    }

    /// Replace the model.
    pub fn store(&self, model: Arc<RouterDataModel>) {
        self.current.store(Some(model));
    }

    /// Replay capacity for models created by this cell.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::{KeyFormat, KeyUsage};

    fn key(kid: &str) -> PublicKey {
        PublicKey {
            kid: kid.to_string(),
            data: vec![1, 2, 3],
            format: KeyFormat::PkixPublicKey,
            usages: vec![KeyUsage::JwtValidation],
        }
    }

    fn service(id: &str, data: &[u8]) -> Entity {
        Entity {
            kind: "service".to_string(),
            id: id.to_string(),
            data: data.to_vec(),
        }
    }

    fn apply(model: &RouterDataModel, event: DataEvent) -> Result<(), EventLogError> {
        model.apply_event(event, &mut |_: &DataEvent| {})
    }

    #[test]
    fn events_mutate_model() {
        let model = RouterDataModel::new(0);
        apply(&model, DataEvent::new(1, ChangeAction::Create, ModelChange::PublicKey(key("k1")))).unwrap();
        apply(&model, DataEvent::new(2, ChangeAction::Create, ModelChange::Entity(service("s1", b"a")))).unwrap();
        apply(&model, DataEvent::new(3, ChangeAction::Update, ModelChange::Entity(service("s1", b"b")))).unwrap();

        assert_eq!(model.current_index(), Some(3));
        assert!(model.public_key("k1").is_some());
        assert_eq!(model.entity("service", "s1").unwrap().data, b"b".to_vec());

        apply(&model, DataEvent::new(4, ChangeAction::Delete, ModelChange::PublicKey(key("k1")))).unwrap();
        apply(&model, DataEvent::new(5, ChangeAction::Delete, ModelChange::Entity(service("s1", b"")))).unwrap();
        assert!(model.public_keys().is_empty());
        assert_eq!(model.entity_count(), 0);
    }

    #[test]
    fn out_of_order_event_changes_nothing() {
        let model = RouterDataModel::new(0);
        apply(&model, DataEvent::new(1, ChangeAction::Create, ModelChange::Entity(service("s1", b"a")))).unwrap();

        let result = apply(&model, DataEvent::new(3, ChangeAction::Create, ModelChange::PublicKey(key("k1"))));

        assert_eq!(
            result,
            Err(EventLogError::OutOfOrder {
                current: 1,
                expected: 2,
                received: 3
            })
        );
        assert!(model.public_key("k1").is_none());
        assert_eq!(model.current_index(), Some(1));
    }

    #[test]
    fn on_applied_sees_the_change() {
        let model = RouterDataModel::new(0);
        let mut seen = Vec::new();
        model
            .apply_event(
                DataEvent::new(1, ChangeAction::Create, ModelChange::PublicKey(key("k1"))),
                &mut |event: &DataEvent| seen.push(event.index.value()),
            )
            .unwrap();
        assert_eq!(seen, vec![1]);
    }

    #[test]
    fn retaining_model_replays() {
        let model = RouterDataModel::new(4);
        for i in 1..=3 {
            apply(&model, DataEvent::new(i, ChangeAction::Create, ModelChange::Entity(service(&i.to_string(), b"")))).unwrap();
        }

        let replay = model.replay_from(1).unwrap();
        let indices: Vec<u64> = replay.iter().map(|e| e.index.value()).collect();
        assert_eq!(indices, vec![2, 3]);
        assert!(RouterDataModel::new(0).replay_from(1).is_none());
    }

    #[test]
    fn snapshot_round_trips_through_model() {
        let model = RouterDataModel::new(0);
        apply(&model, DataEvent::new(7, ChangeAction::Create, ModelChange::PublicKey(key("k1")))).unwrap();
        apply(&model, DataEvent::new(8, ChangeAction::Create, ModelChange::Entity(service("s1", b"x")))).unwrap();

        let restored = RouterDataModel::from_snapshot(model.snapshot(), 0);

        assert_eq!(restored.current_index(), Some(8));
        assert!(restored.public_key("k1").is_some());
        assert_eq!(restored.entity("service", "s1"), model.entity("service", "s1"));
        apply(&restored, DataEvent::new(9, ChangeAction::Delete, ModelChange::PublicKey(key("k1")))).unwrap();
        assert!(restored.public_key("k1").is_none());
    }

    #[test]
    fn cell_lazily_installs_one_empty_model() {
        let cell = ModelCell::new(0);
        let first = cell.load();
        let second = cell.load();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.current_index(), None);
    }

    #[test]
    fn replaced_model_stays_valid_for_holders() {
        let cell = ModelCell::new(0);
        let old = cell.load();
        apply(&old, DataEvent::new(1, ChangeAction::Create, ModelChange::PublicKey(key("k1")))).unwrap();

        cell.store(Arc::new(RouterDataModel::new(0)));

        assert_eq!(old.current_index(), Some(1));
        assert_eq!(cell.load().current_index(), None);
    }
}
