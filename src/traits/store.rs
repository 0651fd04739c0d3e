//! Persistence boundary.
//!
//! The interlocking treats the store as a bulk import at startup plus
//! per-record writes afterwards. Record writes report failure to the caller;
//! event appends are fire-and-forget.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::event_log::{EventKind, EventLogQuery, EventRecord};
use crate::topology::{SignalKey, SignalRecord, StretchId, StretchRecord};
use crate::train::{TrainId, TrainRecord};

/// Everything the store holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    /// Train records.
    pub trains: Vec<TrainRecord>,
    /// Stretch records.
    pub stretches: Vec<StretchRecord>,
    /// Signal records.
    pub signals: Vec<SignalRecord>,
    /// Event log, oldest first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventRecord>,
}

/// Record storage for trains, topology, and the event log.
pub trait Store: Send + Sync {
    /// Load everything for the one-time bulk import.
    fn load(&self) -> Result<Snapshot, StoreError>;

    /// Insert or replace a train.
    fn save_train(&self, record: &TrainRecord) -> Result<(), StoreError>;

    /// Remove a train.
    fn delete_train(&self, id: TrainId) -> Result<(), StoreError>;

    /// Insert or replace a stretch.
    fn save_stretch(&self, record: &StretchRecord) -> Result<(), StoreError>;

    /// Remove a stretch and its signals.
    fn delete_stretch(&self, id: StretchId) -> Result<(), StoreError>;

    /// Insert or replace a signal.
    fn save_signal(&self, record: &SignalRecord) -> Result<(), StoreError>;

    /// Remove a signal.
    fn delete_signal(&self, key: SignalKey) -> Result<(), StoreError>;

    /// Append an event; the store assigns id and timestamp.
    fn append_event(
        &self,
        kind: EventKind,
        details: serde_json::Value,
    ) -> Result<EventRecord, StoreError>;

    /// Read events passing `query`, oldest first.
    fn events(&self, query: &EventLogQuery) -> Result<Vec<EventRecord>, StoreError>;
}
