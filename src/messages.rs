//! Operator channel message format and request payloads.
//!
//! Every frame is text of the form `VERB:RESOURCE$payload`, where the payload
//! is JSON (or empty). Clients send `GET`, `INSERT`, `UPDATE`, `DELETE` and
//! `ACTION`; the server answers with the same verb and resource, and pushes
//! `SERVER_INSERT`, `SERVER_UPDATE` and `SERVER_DELETE` on its own.
//!
//! # Examples
//!
//! ```text
//! GET:TRAIN$
//! ACTION:MANUALLY_JUMP_START_TRAIN${"trainId":1,"stretchId":1,"signalId":2}
//! ACTION:SWITCH_DETOUR${"stretchId":1,"id":4}
//! SERVER_UPDATE:SIGNAL${"stretchId":1,"id":4,"aspect":3,...}
//! ```

use serde::{Deserialize, Serialize};

use crate::topology::{SignalId, SignalKey, StretchId};
use crate::train::TrainId;

/// Frame verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Read a collection.
    Get,
    /// Create a record.
    Insert,
    /// Modify a record.
    Update,
    /// Remove a record.
    Delete,
    /// Run an operation.
    Action,
    /// Pushed: a record was created.
    ServerInsert,
    /// Pushed: a record changed.
    ServerUpdate,
    /// Pushed: a record was removed.
    ServerDelete,
}

impl Verb {
    /// Wire text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Action => "ACTION",
            Self::ServerInsert => "SERVER_INSERT",
            Self::ServerUpdate => "SERVER_UPDATE",
            Self::ServerDelete => "SERVER_DELETE",
        }
    }

    /// Parse wire text.
    pub fn from_text(text: &str) -> Option<Self> {
        Some(match text {
            "GET" => Self::Get,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "ACTION" => Self::Action,
            "SERVER_INSERT" => Self::ServerInsert,
            "SERVER_UPDATE" => Self::ServerUpdate,
            "SERVER_DELETE" => Self::ServerDelete,
            _ => return None,
        })
    }
}

/// Frame resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Trains.
    Train,
    /// Stretches.
    Stretch,
    /// Signals.
    Signal,
    /// Event log.
    EventLog,
    /// Place a train into a zone.
    ManuallyJumpStartTrain,
    /// Stop a train and release its zone.
    ManuallyStopTrain,
    /// Stop a train when it reaches a signal.
    ManuallyStopTrainAtSignal,
    /// Cancel a pending stop-at-signal.
    ManuallyCancelStopTrainAtSignal,
    /// Move points to the through route.
    SwitchPassthrough,
    /// Move points to the detour.
    SwitchDetour,
    /// Hold a zone at Danger.
    ForceRed,
    /// Release a held zone.
    UnforceRed,
}

impl Resource {
    /// Wire text.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "TRAIN",
            Self::Stretch => "STRETCH",
            Self::Signal => "SIGNAL",
            Self::EventLog => "EVENT_LOG",
            Self::ManuallyJumpStartTrain => "MANUALLY_JUMP_START_TRAIN",
            Self::ManuallyStopTrain => "MANUALLY_STOP_TRAIN",
            Self::ManuallyStopTrainAtSignal => "MANUALLY_STOP_TRAIN_AT_SIGNAL",
            Self::ManuallyCancelStopTrainAtSignal => "MANUALLY_CANCEL_STOP_TRAIN_AT_SIGNAL",
            Self::SwitchPassthrough => "SWITCH_PASSTHROUGH",
            Self::SwitchDetour => "SWITCH_DETOUR",
            Self::ForceRed => "FORCE_RED",
            Self::UnforceRed => "UNFORCE_RED",
        }
    }

    /// Parse wire text.
    pub fn from_text(text: &str) -> Option<Self> {
        Some(match text {
            "TRAIN" => Self::Train,
            "STRETCH" => Self::Stretch,
            "SIGNAL" => Self::Signal,
            "EVENT_LOG" => Self::EventLog,
            "MANUALLY_JUMP_START_TRAIN" => Self::ManuallyJumpStartTrain,
            "MANUALLY_STOP_TRAIN" => Self::ManuallyStopTrain,
            "MANUALLY_STOP_TRAIN_AT_SIGNAL" => Self::ManuallyStopTrainAtSignal,
            "MANUALLY_CANCEL_STOP_TRAIN_AT_SIGNAL" => Self::ManuallyCancelStopTrainAtSignal,
            "SWITCH_PASSTHROUGH" => Self::SwitchPassthrough,
            "SWITCH_DETOUR" => Self::SwitchDetour,
            "FORCE_RED" => Self::ForceRed,
            "UNFORCE_RED" => Self::UnforceRed,
            _ => return None,
        })
    }
}

/// A parsed operator frame borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Verb.
    pub verb: Verb,
    /// Resource.
    pub resource: Resource,
    /// Raw payload after `$`.
    pub payload: &'a str,
}

/// Parse `VERB:RESOURCE$payload`. Returns `None` for anything else.
pub fn parse_frame(text: &str) -> Option<Frame<'_>> {
    let (verb, rest) = text.split_once(':')?;
    let (resource, payload) = rest.split_once('$')?;
    Some(Frame {
        verb: Verb::from_text(verb)?,
        resource: Resource::from_text(resource)?,
        payload,
    })
}

/// Build `VERB:RESOURCE$payload`.
pub fn format_frame(verb: Verb, resource: Resource, payload: &str) -> String {
    format!("{}:{}${}", verb.as_str(), resource.as_str(), payload)
}

/// Train and zone for jump-start and stop-at-signal.
///
/// ```json
/// {"trainId": 1, "stretchId": 1, "signalId": 3}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainAtSignal {
    /// Train.
    pub train_id: TrainId,
    /// Stretch of the signal.
    pub stretch_id: StretchId,
    /// Signal within the stretch.
    pub signal_id: SignalId,
}

impl TrainAtSignal {
    /// Key of the addressed signal.
    pub fn signal(&self) -> SignalKey {
        SignalKey::new(self.stretch_id, self.signal_id)
    }
}
