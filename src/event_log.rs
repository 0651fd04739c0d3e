//! Append-only event log of movements, switch operations, and overrides.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Kind of a logged event. The numbering is part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
pub enum EventKind {
    /// Unrecognized code.
    #[default]
    Unknown,
    /// Controller started.
    Start,
    /// Operator placed a train into a zone.
    JumpStartTrain,
    /// Operator stopped a train.
    RequestStopTrain,
    /// A train crossed a block boundary.
    TrainReedSwitchTriggered,
    /// A train passed a Clear signal.
    TrainPassClearSignal,
    /// A train passed a Preliminary-Caution signal.
    TrainPassPreliminaryCautionSignal,
    /// A train passed a Caution signal.
    TrainPassCautionSignal,
    /// A train stopped at Danger.
    TrainStopAtDangerSignal,
    /// Operator forced a signal to Danger.
    SignalLocked,
    /// Operator released a forced signal.
    SignalUnlocked,
    /// A route change was staged.
    SwitchQueuedForSwitching,
    /// An actuation command was sent.
    SwitchStartedSwitching,
    /// Points moved.
    SwitchSuccessfullySwitched,
    /// Points gave up after the retry bound.
    SwitchFailedSwitching,
}

const KINDS: [EventKind; 15] = [
    EventKind::Unknown,
    EventKind::Start,
    EventKind::JumpStartTrain,
    EventKind::RequestStopTrain,
    EventKind::TrainReedSwitchTriggered,
    EventKind::TrainPassClearSignal,
    EventKind::TrainPassPreliminaryCautionSignal,
    EventKind::TrainPassCautionSignal,
    EventKind::TrainStopAtDangerSignal,
    EventKind::SignalLocked,
    EventKind::SignalUnlocked,
    EventKind::SwitchQueuedForSwitching,
    EventKind::SwitchStartedSwitching,
    EventKind::SwitchSuccessfullySwitched,
    EventKind::SwitchFailedSwitching,
];

impl From<EventKind> for u8 {
    fn from(kind: EventKind) -> Self {
        KINDS.iter().position(|k| *k == kind).unwrap_or(0) as u8
    }
}

impl From<u8> for EventKind {
    fn from(code: u8) -> Self {
        KINDS
            .get(usize::from(code))
            .copied()
            .unwrap_or(EventKind::Unknown)
    }
}

/// One logged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Store-assigned id.
    pub id: u64,
    /// Milliseconds since the Unix epoch.
    pub time: u64,
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Event-specific detail (train id, signal key, ...).
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Filter for event log reads. Both time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogQuery {
    /// Earliest time, ms since epoch.
    #[serde(default)]
    pub time_start: u64,
    /// Latest time, ms since epoch; `0` means no upper bound.
    #[serde(default)]
    pub time_end: u64,
    /// Restrict to one kind.
    #[serde(rename = "type", default)]
    pub kind: Option<EventKind>,
}

impl EventLogQuery {
    /// Whether a record passes the filter.
    pub fn matches(&self, record: &EventRecord) -> bool {
        record.time >= self.time_start
            && (self.time_end == 0 || record.time <= self.time_end)
            && self.kind.map_or(true, |kind| kind == record.kind)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
