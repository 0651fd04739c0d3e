//! The interlocking: registry of trains, stretches and signals plus the
//! operations that move trains and change the layout.
//!
//! [`Interlocking`] is shared as `Arc<Interlocking>` between the hardware
//! link server, the operator channel and the HTTP handlers.
//!
//! | Concern | Module |
//! |---------|--------|
//! | Registry, views, event log | this module |
//! | Record CRUD, points, forced red | `admin` |
//! | Sessions and zone-to-zone movement | `movement` |
//!
//! # Locking
//!
//! The topology map sits behind a coarse `RwLock`: readers for every train
//! movement, a writer only for topology edits. Per-zone locking happens
//! inside; see [`crate::zone`] for the full order.

mod admin;
mod movement;

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{info, warn};
use serde::Serialize;

use crate::config::ServerConfig;
use crate::error::{InterlockError, StoreError};
use crate::event_log::{EventKind, EventLogQuery, EventRecord};
use crate::messages::{Resource, Verb};
use crate::notify::Notifier;
use crate::topology::{Signal, SignalKey, SignalView, StretchRecord, Topology};
use crate::traits::Store;
use crate::train::{Train, TrainId, TrainView};
use crate::zone;

pub use movement::Entry;

/// Signal-block interlocking controller.
pub struct Interlocking {
    topology: RwLock<Topology>,
    trains: RwLock<BTreeMap<TrainId, Arc<Train>>>,
    store: Arc<dyn Store>,
    notifier: Notifier,
    max_switch_attempts: u8,
}

impl Interlocking {
    /// Build the registry from everything the store holds.
    ///
    /// All trains start offline and every aspect is derived from scratch.
    pub fn load(
        store: Arc<dyn Store>,
        notifier: Notifier,
        config: &ServerConfig,
    ) -> Result<Self, StoreError> {
        let snapshot = store.load()?;
        let topology = Topology::build(snapshot.stretches, snapshot.signals);
        zone::refresh_all(&topology);
        let trains: BTreeMap<_, _> = snapshot
            .trains
            .into_iter()
            .map(|record| (record.id, Arc::new(Train::new(record))))
            .collect();

        info!(
            "loaded {} stretches, {} signals, {} trains",
            topology.stretches().count(),
            topology.signals().count(),
            trains.len()
        );

        Ok(Self {
            topology: RwLock::new(topology),
            trains: RwLock::new(trains),
            store,
            notifier,
            max_switch_attempts: config.switching_max_attempts.max(1),
        })
    }

    /// Record the START event; call once the servers are up.
    pub fn record_startup(&self) {
        self.log_event(EventKind::Start, serde_json::json!({}));
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Notification hub operator clients subscribe to.
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Actuation attempts before points are declared failed.
    pub fn max_switch_attempts(&self) -> u8 {
        self.max_switch_attempts
    }

    /// Look up a signal.
    pub fn signal(&self, key: SignalKey) -> Option<Arc<Signal>> {
        self.topology().get(key)
    }

    /// Look up a train.
    pub fn train(&self, id: TrainId) -> Option<Arc<Train>> {
        self.trains_read().get(&id).cloned()
    }

    /// All trains with their live state.
    pub fn trains(&self) -> Vec<TrainView> {
        let trains: Vec<_> = self.trains_read().values().cloned().collect();
        trains.iter().map(|t| t.view()).collect()
    }

    /// All stretches.
    pub fn stretches(&self) -> Vec<StretchRecord> {
        self.topology().stretches().cloned().collect()
    }

    /// All signals with their live state.
    pub fn signals(&self) -> Vec<SignalView> {
        self.topology().signals().map(|s| s.view()).collect()
    }

    /// Events matching `query`.
    pub fn events(&self, query: &EventLogQuery) -> Result<Vec<EventRecord>, InterlockError> {
        Ok(self.store.events(query)?)
    }

    pub(crate) fn topology(&self) -> RwLockReadGuard<'_, Topology> {
        self.topology.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn topology_mut(&self) -> RwLockWriteGuard<'_, Topology> {
        self.topology.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn trains_read(&self) -> RwLockReadGuard<'_, BTreeMap<TrainId, Arc<Train>>> {
        self.trains.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn trains_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<TrainId, Arc<Train>>> {
        self.trains.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn require_train(&self, id: TrainId) -> Result<Arc<Train>, InterlockError> {
        self.train(id)
            .ok_or_else(|| InterlockError::NotFound(format!("train {id}")))
    }

    fn require_signal(&self, key: SignalKey) -> Result<Arc<Signal>, InterlockError> {
        self.signal(key)
            .ok_or_else(|| InterlockError::NotFound(format!("signal {key}")))
    }

    // ========================================================================
    // Notifications and event log
    // ========================================================================

    fn publish<T: Serialize>(&self, verb: Verb, resource: Resource, payload: &T) {
        self.notifier.publish(verb, resource, payload);
    }

    /// Push the current state of each listed signal, once per key.
    fn publish_signals(&self, topology: &Topology, keys: &[SignalKey]) {
        let mut seen = Vec::with_capacity(keys.len());
        for key in keys {
            if seen.contains(key) {
                continue;
            }
            seen.push(*key);
            if let Some(signal) = topology.get(*key) {
                self.publish_signal(&signal);
            }
        }
    }

    fn publish_signal(&self, signal: &Signal) {
        self.publish(Verb::ServerUpdate, Resource::Signal, &signal.view());
    }

    fn publish_train(&self, train: &Train) {
        self.publish(Verb::ServerUpdate, Resource::Train, &train.view());
    }

    /// Append to the event log. Failures are logged, never returned.
    fn log_event(&self, kind: EventKind, details: serde_json::Value) {
        match self.store.append_event(kind, details) {
            Ok(record) => self.publish(Verb::ServerInsert, Resource::EventLog, &record),
            Err(e) => warn!("could not append {kind:?} to the event log: {e}"),
        }
    }
}

fn signal_details(key: SignalKey) -> serde_json::Value {
    serde_json::json!({ "stretchId": key.stretch_id, "id": key.id })
}
