//! Record CRUD and operator overrides on the layout.
//!
//! Every write is persisted before memory changes, so a failed write leaves
//! the running layout untouched and surfaces as INTERNAL_DATABASE_ERROR.

use std::sync::Arc;

use log::info;
use rand::Rng;
use serde_json::json;

use super::{signal_details, Interlocking};
use crate::error::InterlockError;
use crate::event_log::EventKind;
use crate::messages::{Resource, Verb};
use crate::topology::{Signal, SignalKey, SignalRecord, StretchId, StretchRecord};
use crate::train::{Train, TrainId, TrainRecord};
use crate::zone::{self, Occupant};

/// Largest access key; keys stay within 31 bits.
const MAX_ACCESS_KEY: u32 = 0x7FFF_FFFF;

fn ids_exhausted() -> InterlockError {
    InterlockError::Invalid(vec!["id".to_string()])
}

/// A zone that may be deleted: nobody in it and no route change pending.
fn ensure_idle(signal: &Signal) -> Result<(), InterlockError> {
    let _check = signal.zone.lock_check();
    if signal.zone.is_occupied() {
        return Err(InterlockError::ZoneOccupied(signal.key()));
    }
    if signal.switch_pending() {
        return Err(InterlockError::SwitchNotReady(
            signal.key(),
            "a route change is pending",
        ));
    }
    Ok(())
}

impl Interlocking {
    // ========================================================================
    // Trains
    // ========================================================================

    /// Create a train; assigns its id and a fresh access key.
    pub fn insert_train(&self, mut record: TrainRecord) -> Result<TrainRecord, InterlockError> {
        record.validate()?;
        let mut trains = self.trains_mut();
        record.id = match trains.keys().next_back() {
            None => 1,
            Some(last) => last.checked_add(1).ok_or_else(ids_exhausted)?,
        };
        let mut rng = rand::thread_rng();
        record.access_key = loop {
            let key = rng.gen_range(1..=MAX_ACCESS_KEY);
            if !trains.values().any(|t| t.record().access_key == key) {
                break key;
            }
        };

        self.store.save_train(&record)?;
        let train = Arc::new(Train::new(record.clone()));
        trains.insert(record.id, Arc::clone(&train));
        drop(trains);

        info!("train {} ({}) created", record.id, record.name);
        self.publish(Verb::ServerInsert, Resource::Train, &train.view());
        Ok(record)
    }

    /// Change a train's name and speeds. The access key is kept.
    pub fn update_train(&self, record: TrainRecord) -> Result<(), InterlockError> {
        record.validate()?;
        let train = self.require_train(record.id)?;
        let updated = TrainRecord {
            access_key: train.record().access_key,
            ..record
        };
        self.store.save_train(&updated)?;
        train.set_record(updated);
        self.publish_train(&train);
        Ok(())
    }

    /// Remove an offline train that owns no zone.
    pub fn delete_train(&self, id: TrainId) -> Result<(), InterlockError> {
        let mut trains = self.trains_mut();
        let train = trains
            .get(&id)
            .cloned()
            .ok_or_else(|| InterlockError::NotFound(format!("train {id}")))?;
        {
            let session = train.session();
            if session.online() || session.last_signal.is_some() {
                return Err(InterlockError::TrainNotStopped(id));
            }
        }
        self.store.delete_train(id)?;
        trains.remove(&id);
        drop(trains);

        info!("train {id} deleted");
        self.publish(Verb::ServerDelete, Resource::Train, &train.record());
        Ok(())
    }

    // ========================================================================
    // Stretches
    // ========================================================================

    /// Create a stretch; assigns its id.
    pub fn insert_stretch(
        &self,
        mut record: StretchRecord,
    ) -> Result<StretchRecord, InterlockError> {
        record.validate()?;
        let mut topology = self.topology_mut();
        record.id = topology
            .next_stretch_id()
            .ok_or_else(ids_exhausted)?;
        self.store.save_stretch(&record)?;
        topology.upsert_stretch(record.clone());
        drop(topology);

        info!("stretch {} ({}) created", record.id, record.name);
        self.publish(Verb::ServerInsert, Resource::Stretch, &record);
        Ok(record)
    }

    /// Rename or retype a stretch.
    pub fn update_stretch(&self, record: StretchRecord) -> Result<(), InterlockError> {
        record.validate()?;
        let mut topology = self.topology_mut();
        if topology.stretch(record.id).is_none() {
            return Err(InterlockError::NotFound(format!("stretch {}", record.id)));
        }
        self.store.save_stretch(&record)?;
        topology.upsert_stretch(record.clone());
        drop(topology);

        self.publish(Verb::ServerUpdate, Resource::Stretch, &record);
        Ok(())
    }

    /// Remove a stretch and all its signals; every one of its zones must be idle.
    pub fn delete_stretch(&self, id: StretchId) -> Result<(), InterlockError> {
        let mut topology = self.topology_mut();
        let record = topology
            .stretch(id)
            .cloned()
            .ok_or_else(|| InterlockError::NotFound(format!("stretch {id}")))?;
        for signal in topology.signals_in(id) {
            ensure_idle(signal)?;
        }
        self.store.delete_stretch(id)?;
        let removed = topology.remove_stretch(id);
        let changed = zone::refresh_all(&topology);

        info!("stretch {id} deleted with {} signals", removed.len());
        for key in &removed {
            self.publish(Verb::ServerDelete, Resource::Signal, &signal_details(*key));
        }
        self.publish(Verb::ServerDelete, Resource::Stretch, &record);
        self.publish_signals(&topology, &changed);
        Ok(())
    }

    // ========================================================================
    // Signals
    // ========================================================================

    /// Create a signal; assigns its id within the stretch and relinks.
    pub fn insert_signal(&self, mut record: SignalRecord) -> Result<SignalRecord, InterlockError> {
        let mut topology = self.topology_mut();
        if topology.stretch(record.stretch_id).is_some() {
            record.id = topology
                .next_signal_id(record.stretch_id)
                .ok_or_else(ids_exhausted)?;
        }
        record.validate()?;
        topology.validate_references(&record)?;

        self.store.save_signal(&record)?;
        let signal = topology.insert_signal(record.clone());
        let changed = zone::refresh_all(&topology);

        info!("signal {} ({}) created", signal.key(), record.name);
        self.publish(Verb::ServerInsert, Resource::Signal, &signal.view());
        self.publish_signals(&topology, &changed);
        Ok(record)
    }

    /// Replace a signal's configuration and relink.
    pub fn update_signal(&self, record: SignalRecord) -> Result<(), InterlockError> {
        record.validate()?;
        let mut topology = self.topology_mut();
        let key = record.key();
        let signal = topology
            .get(key)
            .ok_or_else(|| InterlockError::NotFound(format!("signal {key}")))?;
        topology.validate_references(&record)?;
        if signal.switch_pending() {
            return Err(InterlockError::SwitchNotReady(
                key,
                "a route change is pending",
            ));
        }

        self.store.save_signal(&record)?;
        signal.set_record(record);
        topology.relink();
        let mut changed = zone::refresh_all(&topology);
        changed.push(key);

        self.publish_signals(&topology, &changed);
        Ok(())
    }

    /// Remove an idle signal and relink.
    pub fn delete_signal(&self, key: SignalKey) -> Result<(), InterlockError> {
        let mut topology = self.topology_mut();
        let signal = topology
            .get(key)
            .ok_or_else(|| InterlockError::NotFound(format!("signal {key}")))?;
        ensure_idle(&signal)?;

        self.store.delete_signal(key)?;
        topology.remove_signal(key);
        let changed = zone::refresh_all(&topology);

        info!("signal {key} deleted");
        self.publish(Verb::ServerDelete, Resource::Signal, &signal_details(key));
        self.publish_signals(&topology, &changed);
        Ok(())
    }

    // ========================================================================
    // Points and forced red
    // ========================================================================

    /// Queue a route change on the points at `key`.
    ///
    /// The signal shows Danger until a train arriving there moves the points.
    pub fn switch_points(&self, key: SignalKey, passthrough: bool) -> Result<(), InterlockError> {
        {
            let topology = self.topology();
            let signal = topology
                .get(key)
                .ok_or_else(|| InterlockError::NotFound(format!("signal {key}")))?;
            if !signal.record().is_switch {
                return Err(InterlockError::SwitchNotReady(key, "not a switch"));
            }
            let mut changed = {
                let _check = signal.zone.lock_check();
                if signal.zone.is_occupied() {
                    return Err(InterlockError::ZoneOccupied(key));
                }
                signal
                    .points
                    .update(|points| points.request(passthrough))
                    .map_err(|refusal| InterlockError::SwitchNotReady(key, refusal.as_str()))?;
                zone::cascade(&topology, &signal)
            };
            changed.push(key);
            self.publish_signals(&topology, &changed);
        }

        let route = if passthrough { "through route" } else { "detour" };
        info!("points at {key} queued for the {route}");
        let mut details = signal_details(key);
        details["passthrough"] = json!(passthrough);
        self.log_event(EventKind::SwitchQueuedForSwitching, details);
        Ok(())
    }

    /// Hold the zone of `key` at Danger.
    pub fn force_red(&self, key: SignalKey) -> Result<(), InterlockError> {
        {
            let topology = self.topology();
            let signal = topology
                .get(key)
                .ok_or_else(|| InterlockError::NotFound(format!("signal {key}")))?;
            let mut changed = {
                let check = signal.zone.lock_check();
                if !signal.zone.occupy(&check, Occupant::ForcedRed) {
                    return Err(InterlockError::ZoneOccupied(key));
                }
                zone::cascade(&topology, &signal)
            };
            changed.push(key);
            self.publish_signals(&topology, &changed);
        }

        info!("signal {key} forced to danger");
        self.log_event(EventKind::SignalLocked, signal_details(key));
        Ok(())
    }

    /// Release a zone held at Danger by [`Interlocking::force_red`].
    pub fn unforce_red(&self, key: SignalKey) -> Result<(), InterlockError> {
        {
            let topology = self.topology();
            let signal = topology
                .get(key)
                .ok_or_else(|| InterlockError::NotFound(format!("signal {key}")))?;
            let mut changed = {
                let _check = signal.zone.lock_check();
                if !signal.zone.vacate(Occupant::ForcedRed) {
                    return Err(InterlockError::Invalid(vec!["forceRed".to_string()]));
                }
                zone::cascade(&topology, &signal)
            };
            changed.push(key);
            self.publish_signals(&topology, &changed);
        }

        info!("signal {key} released from danger");
        self.log_event(EventKind::SignalUnlocked, signal_details(key));
        Ok(())
    }
}
