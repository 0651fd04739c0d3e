//! Trains: persisted attributes and live session state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{InterlockError, LinkError};
use crate::link::TrainCommand;
use crate::topology::{SignalKey, SpeedLimit, MAX_NAME_LEN};
use crate::traits::TrainLink;
use crate::zone::SignalAspect;

/// Train identifier.
pub type TrainId = u8;

/// Persisted train attributes.
///
/// Speeds are absolute motor values and must satisfy `0 < slow < half < fast`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainRecord {
    /// Train id (assigned on insert).
    #[serde(default)]
    pub id: TrainId,
    /// Display name.
    pub name: String,
    /// Calibrated slow speed.
    pub slow_speed: u8,
    /// Calibrated half speed.
    pub half_speed: u8,
    /// Calibrated fast speed.
    pub fast_speed: u8,
    /// Hardware-link credential (assigned on insert).
    #[serde(default)]
    pub access_key: u32,
}

impl TrainRecord {
    /// Check field constraints.
    pub fn validate(&self) -> Result<(), InterlockError> {
        let mut invalid = Vec::new();
        let name_len = self.name.chars().count();
        if name_len == 0 || name_len > MAX_NAME_LEN {
            invalid.push("name".to_string());
        }
        if self.slow_speed == 0 {
            invalid.push("slowSpeed".to_string());
        }
        if self.half_speed <= self.slow_speed {
            invalid.push("halfSpeed".to_string());
        }
        if self.fast_speed <= self.half_speed {
            invalid.push("fastSpeed".to_string());
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(InterlockError::Invalid(invalid))
        }
    }

    /// Absolute speed for a zone's class under an aspect.
    ///
    /// Caution caps at half speed; Danger is a stop.
    pub fn speed_for(&self, aspect: SignalAspect, limit: SpeedLimit) -> u8 {
        let base = match limit {
            SpeedLimit::Slow => self.slow_speed,
            SpeedLimit::Half => self.half_speed,
            SpeedLimit::Fast => self.fast_speed,
        };
        match aspect {
            SignalAspect::Clear | SignalAspect::PreliminaryCaution => base,
            SignalAspect::Caution => base.min(self.half_speed),
            SignalAspect::Danger => 0,
        }
    }
}

/// Work queued for a train's movement worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Order {
    /// Reed switch crossed: move into the zone after the current one.
    Advance,
    /// Place the train into a zone (jump start).
    Enter(SignalKey),
}

/// Live state; exists only while a hardware connection is attached.
#[derive(Default)]
pub struct Session {
    pub(crate) link: Option<Arc<dyn TrainLink>>,
    pub(crate) orders: Option<mpsc::UnboundedSender<Order>>,
    pub(crate) worker: Option<JoinHandle<()>>,
    /// Zone the train owns.
    pub last_signal: Option<SignalKey>,
    /// Aspect of the last signal passed.
    pub last_passed_aspect: Option<SignalAspect>,
    /// Whether the train is running under interlocking control.
    pub started: bool,
    /// Pending stop marker.
    pub stop_at: Option<SignalKey>,
    /// Actuation attempts for the points currently being moved.
    pub switch_attempts: u8,
}

impl Session {
    /// Whether a hardware connection is attached.
    pub fn online(&self) -> bool {
        self.link.is_some()
    }
}

/// A train with its record and session.
pub struct Train {
    id: TrainId,
    record: RwLock<TrainRecord>,
    session: Mutex<Session>,
    halt: watch::Sender<u64>,
}

impl Train {
    /// Create an offline train.
    pub fn new(record: TrainRecord) -> Self {
        let (halt, _) = watch::channel(0);
        Self {
            id: record.id,
            record: RwLock::new(record),
            session: Mutex::new(Session::default()),
            halt,
        }
    }

    /// Train id.
    pub fn id(&self) -> TrainId {
        self.id
    }

    /// Snapshot of the record.
    pub fn record(&self) -> TrainRecord {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_record(&self, record: TrainRecord) {
        *self.record.write().unwrap_or_else(PoisonError::into_inner) = record;
    }

    /// Lock the session. Must not be held across an await.
    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Movement generation; bumped by every stop or disconnect.
    pub fn generation(&self) -> u64 {
        *self.halt.borrow()
    }

    pub(crate) fn subscribe_halt(&self) -> watch::Receiver<u64> {
        self.halt.subscribe()
    }

    /// Abort in-flight movement; call with the session locked.
    pub(crate) fn halt(&self) {
        self.halt.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Send a command if the movement that computed it is still current.
    pub(crate) fn command(&self, generation: u64, command: TrainCommand) -> Result<(), LinkError> {
        let link = {
            let session = self.session();
            if self.generation() != generation {
                return Ok(());
            }
            session.link.clone()
        };
        match link {
            Some(link) => link.send(command),
            None => Err(LinkError::Closed),
        }
    }

    /// Serializable view for operator clients.
    pub fn view(&self) -> TrainView {
        let record = self.record();
        let session = self.session();
        TrainView {
            record,
            online: session.online(),
            last_signal: session.last_signal,
            last_signal_passed_aspect: session.last_passed_aspect,
            started: session.started,
            stop_at_signal: session.stop_at.is_some(),
            signal_to_stop_at: session.stop_at,
            switch_attempts: session.switch_attempts,
        }
    }
}

/// Train as shown to operator clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainView {
    /// Persisted attributes.
    #[serde(flatten)]
    pub record: TrainRecord,
    /// Hardware connection attached.
    pub online: bool,
    /// Zone the train owns.
    pub last_signal: Option<SignalKey>,
    /// Aspect of the last signal passed.
    pub last_signal_passed_aspect: Option<SignalAspect>,
    /// Running under interlocking control.
    pub started: bool,
    /// A stop marker is set.
    pub stop_at_signal: bool,
    /// Where the train will stop.
    pub signal_to_stop_at: Option<SignalKey>,
    /// Points actuation attempts so far.
    pub switch_attempts: u8,
}
