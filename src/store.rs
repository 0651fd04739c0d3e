//! [`Store`] implementations: in-memory and JSON files.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::error::StoreError;
use crate::event_log::{now_ms, EventKind, EventLogQuery, EventRecord};
use crate::topology::{SignalKey, SignalRecord, StretchId, StretchRecord};
use crate::traits::{Snapshot, Store};
use crate::train::{TrainId, TrainRecord};

fn upsert<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

/// One record write, applied the same way by every store.
enum Change<'a> {
    SaveTrain(&'a TrainRecord),
    DeleteTrain(TrainId),
    SaveStretch(&'a StretchRecord),
    DeleteStretch(StretchId),
    SaveSignal(&'a SignalRecord),
    DeleteSignal(SignalKey),
}

impl Change<'_> {
    fn apply(self, data: &mut Snapshot) {
        match self {
            Self::SaveTrain(record) => {
                upsert(&mut data.trains, record.clone(), |t| t.id == record.id);
            }
            Self::DeleteTrain(id) => data.trains.retain(|t| t.id != id),
            Self::SaveStretch(record) => {
                upsert(&mut data.stretches, record.clone(), |s| s.id == record.id);
            }
            Self::DeleteStretch(id) => {
                data.stretches.retain(|s| s.id != id);
                data.signals.retain(|s| s.stretch_id != id);
            }
            Self::SaveSignal(record) => {
                let key = record.key();
                upsert(&mut data.signals, record.clone(), |s| s.key() == key);
            }
            Self::DeleteSignal(key) => data.signals.retain(|s| s.key() != key),
        }
    }
}

fn next_event(events: &[EventRecord], kind: EventKind, details: serde_json::Value) -> EventRecord {
    EventRecord {
        id: events.last().map_or(1, |e| e.id + 1),
        time: now_ms(),
        kind,
        details,
    }
}

fn matching(events: &[EventRecord], query: &EventLogQuery) -> Vec<EventRecord> {
    events.iter().filter(|e| query.matches(e)).cloned().collect()
}

/// Store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Snapshot>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with a snapshot.
    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            data: Mutex::new(snapshot),
        }
    }

    fn data(&self) -> MutexGuard<'_, Snapshot> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn change(&self, change: Change<'_>) -> Result<(), StoreError> {
        change.apply(&mut self.data());
        Ok(())
    }
}

impl Store for MemoryStore {
    fn load(&self) -> Result<Snapshot, StoreError> {
        Ok(self.data().clone())
    }

    fn save_train(&self, record: &TrainRecord) -> Result<(), StoreError> {
        self.change(Change::SaveTrain(record))
    }

    fn delete_train(&self, id: TrainId) -> Result<(), StoreError> {
        self.change(Change::DeleteTrain(id))
    }

    fn save_stretch(&self, record: &StretchRecord) -> Result<(), StoreError> {
        self.change(Change::SaveStretch(record))
    }

    fn delete_stretch(&self, id: StretchId) -> Result<(), StoreError> {
        self.change(Change::DeleteStretch(id))
    }

    fn save_signal(&self, record: &SignalRecord) -> Result<(), StoreError> {
        self.change(Change::SaveSignal(record))
    }

    fn delete_signal(&self, key: SignalKey) -> Result<(), StoreError> {
        self.change(Change::DeleteSignal(key))
    }

    fn append_event(
        &self,
        kind: EventKind,
        details: serde_json::Value,
    ) -> Result<EventRecord, StoreError> {
        let mut data = self.data();
        let record = next_event(&data.events, kind, details);
        data.events.push(record.clone());
        Ok(record)
    }

    fn events(&self, query: &EventLogQuery) -> Result<Vec<EventRecord>, StoreError> {
        Ok(matching(&self.data().events, query))
    }
}

/// Event log backed by an append-only file, one JSON record per line.
#[derive(Debug)]
struct EventFile {
    file: File,
    events: Vec<EventRecord>,
}

/// Store persisted as a JSON document of records plus a line-delimited
/// event log next to it (`<name>.events.jsonl`).
///
/// Record writes rewrite the document through a temporary file and a rename,
/// and only touch memory once the file is in place. Events are appended, so
/// logging costs the same however long the history grows.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Snapshot>,
    events: Mutex<EventFile>,
}

impl JsonFileStore {
    /// Open `path`, starting empty when it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut records: Snapshot = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("store {} not found, starting empty", path.display());
                Snapshot::default()
            }
            Err(e) => return Err(e.into()),
        };

        let events_path = Self::events_path_for(&path);
        let mut events = std::mem::take(&mut records.events);
        match std::fs::read_to_string(&events_path) {
            Ok(text) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    events.push(serde_json::from_str(line)?);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&events_path)?;

        Ok(Self {
            path,
            records: Mutex::new(records),
            events: Mutex::new(EventFile { file, events }),
        })
    }

    /// Location of the records document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the event log.
    pub fn events_path(&self) -> PathBuf {
        Self::events_path_for(&self.path)
    }

    fn events_path_for(path: &Path) -> PathBuf {
        path.with_extension("events.jsonl")
    }

    fn persist(&self, records: &Snapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn change(&self, change: Change<'_>) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = records.clone();
        change.apply(&mut next);
        self.persist(&next)?;
        *records = next;
        Ok(())
    }
}

impl Store for JsonFileStore {
    fn load(&self) -> Result<Snapshot, StoreError> {
        let mut snapshot = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        snapshot.events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .clone();
        Ok(snapshot)
    }

    fn save_train(&self, record: &TrainRecord) -> Result<(), StoreError> {
        self.change(Change::SaveTrain(record))
    }

    fn delete_train(&self, id: TrainId) -> Result<(), StoreError> {
        self.change(Change::DeleteTrain(id))
    }

    fn save_stretch(&self, record: &StretchRecord) -> Result<(), StoreError> {
        self.change(Change::SaveStretch(record))
    }

    fn delete_stretch(&self, id: StretchId) -> Result<(), StoreError> {
        self.change(Change::DeleteStretch(id))
    }

    fn save_signal(&self, record: &SignalRecord) -> Result<(), StoreError> {
        self.change(Change::SaveSignal(record))
    }

    fn delete_signal(&self, key: SignalKey) -> Result<(), StoreError> {
        self.change(Change::DeleteSignal(key))
    }

    fn append_event(
        &self,
        kind: EventKind,
        details: serde_json::Value,
    ) -> Result<EventRecord, StoreError> {
        let mut log = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let record = next_event(&log.events, kind, details);
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        log.file.write_all(&line)?;
        log.events.push(record.clone());
        Ok(record)
    }

    fn events(&self, query: &EventLogQuery) -> Result<Vec<EventRecord>, StoreError> {
        let log = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(matching(&log.events, query))
    }
}
