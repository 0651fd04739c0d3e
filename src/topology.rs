//! Track topology: stretches, signals, and the navigational graph between them.
//!
//! Signals live in an arena keyed by [`SignalKey`]. Neighbor relations are
//! stored as keys and resolved through [`Topology`], so loop-backs and switch
//! pairs never form ownership cycles.
//!
//! # Linking rules
//!
//! | Link | Source |
//! |------|--------|
//! | `previous` / `next` | ascending local id within a stretch |
//! | splitter detour | counterpart's `previous` points back at the splitter |
//! | merger detour | counterpart's `next` points at the merger |
//! | loop-back | overrides `next`; target's `previous` points back |
//!
//! A signal without a resolved `next` is an end of line and always shows
//! Danger.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::InterlockError;
use crate::switch::{Points, SwitchPhase, SwitchStatus};
use crate::train::TrainId;
use crate::zone::{Occupant, SignalAspect, Zone};

/// Stretch identifier.
pub type StretchId = u8;

/// Signal identifier, unique within its stretch.
pub type SignalId = u8;

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 50;

/// Global address of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalKey {
    /// Owning stretch.
    pub stretch_id: StretchId,
    /// Local id within the stretch.
    pub id: SignalId,
}

impl SignalKey {
    /// Create a key.
    pub const fn new(stretch_id: StretchId, id: SignalId) -> Self {
        Self { stretch_id, id }
    }
}

impl fmt::Display for SignalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.stretch_id, self.id)
    }
}

/// Speed class of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SpeedLimit {
    /// Train's calibrated slow speed.
    #[default]
    Slow,
    /// Train's calibrated half speed.
    Half,
    /// Train's calibrated fast speed.
    Fast,
}

impl From<SpeedLimit> for u8 {
    fn from(limit: SpeedLimit) -> Self {
        match limit {
            SpeedLimit::Slow => 0,
            SpeedLimit::Half => 1,
            SpeedLimit::Fast => 2,
        }
    }
}

impl TryFrom<u8> for SpeedLimit {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Slow),
            1 => Ok(Self::Half),
            2 => Ok(Self::Fast),
            other => Err(format!("invalid speed limit {other}")),
        }
    }
}

/// Kind of track a stretch models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum StretchKind {
    /// Not configured; rejected by validation.
    #[default]
    Unknown,
    /// Single track run in one direction.
    OneWaySingleTrack,
}

impl From<StretchKind> for u8 {
    fn from(kind: StretchKind) -> Self {
        match kind {
            StretchKind::Unknown => 0,
            StretchKind::OneWaySingleTrack => 1,
        }
    }
}

impl TryFrom<u8> for StretchKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::OneWaySingleTrack),
            other => Err(format!("invalid stretch type {other}")),
        }
    }
}

fn name_is_valid(name: &str) -> bool {
    let len = name.chars().count();
    (1..=MAX_NAME_LEN).contains(&len)
}

/// Persisted stretch attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StretchRecord {
    /// Stretch id (assigned on insert).
    #[serde(default)]
    pub id: StretchId,
    /// Display name.
    pub name: String,
    /// Track kind.
    #[serde(rename = "type", default)]
    pub kind: StretchKind,
}

impl StretchRecord {
    /// Check field constraints.
    pub fn validate(&self) -> Result<(), InterlockError> {
        let mut invalid = Vec::new();
        if !name_is_valid(&self.name) {
            invalid.push("name".to_string());
        }
        if self.kind == StretchKind::Unknown {
            invalid.push("type".to_string());
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(InterlockError::Invalid(invalid))
        }
    }
}

/// Persisted signal attributes, including switch and loop-back routing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRecord {
    /// Owning stretch.
    pub stretch_id: StretchId,
    /// Local id (assigned on insert).
    #[serde(default)]
    pub id: SignalId,
    /// Display name.
    pub name: String,
    /// Speed class of the zone this signal governs.
    #[serde(default)]
    pub speed_limit: SpeedLimit,
    /// Whether this signal guards points.
    #[serde(rename = "switch", default)]
    pub is_switch: bool,
    /// `true` for the splitter of a switch pair, `false` for the merger.
    #[serde(default)]
    pub splitter: Option<bool>,
    /// Stretch of the detour counterpart.
    #[serde(default)]
    pub stretch_detour_id: Option<StretchId>,
    /// Signal id of the detour counterpart.
    #[serde(default)]
    pub signal_detour_id: Option<SignalId>,
    /// Whether `next` is overridden by a loop-back target.
    #[serde(default)]
    pub loops_back: bool,
    /// Stretch of the loop-back target.
    #[serde(default)]
    pub stretch_loop_back_id: Option<StretchId>,
    /// Signal id of the loop-back target.
    #[serde(default)]
    pub signal_loop_back_id: Option<SignalId>,
}

impl SignalRecord {
    /// Key of this signal.
    pub fn key(&self) -> SignalKey {
        SignalKey::new(self.stretch_id, self.id)
    }

    /// Detour counterpart, for switches.
    pub fn detour(&self) -> Option<SignalKey> {
        if !self.is_switch {
            return None;
        }
        Some(SignalKey::new(self.stretch_detour_id?, self.signal_detour_id?))
    }

    /// Loop-back target, when configured.
    pub fn loop_back(&self) -> Option<SignalKey> {
        if !self.loops_back {
            return None;
        }
        Some(SignalKey::new(
            self.stretch_loop_back_id?,
            self.signal_loop_back_id?,
        ))
    }

    /// Switch that routes outbound trains.
    pub fn is_splitter(&self) -> bool {
        self.is_switch && self.splitter == Some(true)
    }

    /// Switch that routes inbound trains.
    pub fn is_merger(&self) -> bool {
        self.is_switch && self.splitter == Some(false)
    }

    /// Check field constraints that do not need the rest of the topology.
    pub fn validate(&self) -> Result<(), InterlockError> {
        let mut invalid = Vec::new();
        if self.stretch_id == 0 {
            invalid.push("stretchId".to_string());
        }
        if !name_is_valid(&self.name) {
            invalid.push("name".to_string());
        }
        if self.is_switch && self.loops_back {
            invalid.push("loopsBack".to_string());
        }
        if self.is_switch {
            if self.splitter.is_none() {
                invalid.push("splitter".to_string());
            }
            match self.detour() {
                None => invalid.push("signalDetourId".to_string()),
                Some(target) if self.id != 0 && target == self.key() => {
                    invalid.push("signalDetourId".to_string())
                }
                Some(_) => {}
            }
        }
        if self.loops_back {
            match self.loop_back() {
                None => invalid.push("signalLoopBackId".to_string()),
                Some(target) if self.id != 0 && target == self.key() => {
                    invalid.push("signalLoopBackId".to_string())
                }
                Some(_) => {}
            }
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(InterlockError::Invalid(invalid))
        }
    }
}

/// Resolved neighbor keys of a signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Links {
    /// Signal behind this one in normal flow.
    pub previous: Option<SignalKey>,
    /// Signal ahead (through route for splitters).
    pub next: Option<SignalKey>,
    /// Switch counterpart in the other stretch.
    pub detour: Option<SignalKey>,
}

/// A block boundary: configuration, links, zone occupancy, and points.
#[derive(Debug)]
pub struct Signal {
    key: SignalKey,
    record: RwLock<SignalRecord>,
    links: RwLock<Links>,
    /// Occupancy of the zone this signal governs.
    pub zone: Zone,
    /// Points state machine (only meaningful when the record is a switch).
    pub points: Points,
}

impl Signal {
    /// Create an unlinked signal showing Danger.
    pub fn new(record: SignalRecord) -> Self {
        Self {
            key: record.key(),
            record: RwLock::new(record),
            links: RwLock::new(Links::default()),
            zone: Zone::new(SignalAspect::Danger),
            points: Points::new(),
        }
    }

    /// Key of this signal.
    pub fn key(&self) -> SignalKey {
        self.key
    }

    /// Snapshot of the configuration.
    pub fn record(&self) -> SignalRecord {
        self.record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the neighbor links.
    pub fn links(&self) -> Links {
        *self.links.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_record(&self, record: SignalRecord) {
        *self.record.write().unwrap_or_else(PoisonError::into_inner) = record;
    }

    fn set_links(&self, links: Links) {
        *self.links.write().unwrap_or_else(PoisonError::into_inner) = links;
    }

    /// Whether the points currently await or undergo a route change.
    pub fn switch_pending(&self) -> bool {
        self.record().is_switch && self.points.state().pending()
    }

    /// Serializable view for operator clients.
    pub fn view(&self) -> SignalView {
        let record = self.record();
        let occupant = self.zone.occupant();
        let points = self.points.state();
        let is_switch = record.is_switch;
        SignalView {
            record,
            aspect: self.zone.aspect(),
            occupied: occupant.is_some(),
            occupied_by: occupant.and_then(|o| o.train()),
            force_red: occupant == Some(Occupant::ForcedRed),
            passthrough: points.passthrough(),
            queued_for_switching: is_switch && points.pending(),
            currently_switching: is_switch && points.phase() == SwitchPhase::Actuating,
            switch_failure: is_switch && points.phase() == SwitchPhase::Failed,
            switch_status: is_switch.then(|| points.status()),
        }
    }
}

/// Signal as shown to operator clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalView {
    /// Persisted attributes.
    #[serde(flatten)]
    pub record: SignalRecord,
    /// Displayed aspect.
    pub aspect: SignalAspect,
    /// Zone held by a train or forced red.
    pub occupied: bool,
    /// Train holding the zone.
    pub occupied_by: Option<TrainId>,
    /// Zone held at Danger by an operator.
    pub force_red: bool,
    /// Points rest on the through route.
    pub passthrough: bool,
    /// A route change is pending.
    pub queued_for_switching: bool,
    /// An actuation command is in flight.
    pub currently_switching: bool,
    /// Actuation retries were exhausted.
    pub switch_failure: bool,
    /// Points status, for switches.
    pub switch_status: Option<SwitchStatus>,
}

/// Arena of stretches and signals with their derived links.
#[derive(Debug, Default)]
pub struct Topology {
    stretches: BTreeMap<StretchId, StretchRecord>,
    signals: BTreeMap<SignalKey, Arc<Signal>>,
}

impl Topology {
    /// Build and link a topology from loaded records.
    ///
    /// Records are assumed validated; dangling references resolve to none.
    pub fn build(stretches: Vec<StretchRecord>, signals: Vec<SignalRecord>) -> Self {
        let mut topology = Self {
            stretches: stretches.into_iter().map(|s| (s.id, s)).collect(),
            signals: signals
                .into_iter()
                .map(|s| (s.key(), Arc::new(Signal::new(s))))
                .collect(),
        };
        topology.relink();
        topology
    }

    /// Look up a signal.
    pub fn get(&self, key: SignalKey) -> Option<Arc<Signal>> {
        self.signals.get(&key).cloned()
    }

    /// Look up a stretch.
    pub fn stretch(&self, id: StretchId) -> Option<&StretchRecord> {
        self.stretches.get(&id)
    }

    /// All stretches, ordered by id.
    pub fn stretches(&self) -> impl Iterator<Item = &StretchRecord> {
        self.stretches.values()
    }

    /// All signals, ordered by key.
    pub fn signals(&self) -> impl Iterator<Item = &Arc<Signal>> {
        self.signals.values()
    }

    /// Signals belonging to one stretch.
    pub fn signals_in(
        &self,
        stretch_id: StretchId,
    ) -> impl DoubleEndedIterator<Item = &Arc<Signal>> {
        self.signals
            .range(SignalKey::new(stretch_id, 0)..=SignalKey::new(stretch_id, SignalId::MAX))
            .map(|(_, signal)| signal)
    }

    /// Id the next inserted stretch receives.
    pub fn next_stretch_id(&self) -> Option<StretchId> {
        match self.stretches.keys().next_back() {
            None => Some(1),
            Some(last) => last.checked_add(1),
        }
    }

    /// Id the next signal inserted into `stretch_id` receives.
    pub fn next_signal_id(&self, stretch_id: StretchId) -> Option<SignalId> {
        match self.signals_in(stretch_id).next_back() {
            None => Some(1),
            Some(last) => last.key().id.checked_add(1),
        }
    }

    pub(crate) fn upsert_stretch(&mut self, record: StretchRecord) {
        self.stretches.insert(record.id, record);
    }

    /// Remove a stretch and every signal in it; returns the removed signal keys.
    pub(crate) fn remove_stretch(&mut self, id: StretchId) -> Vec<SignalKey> {
        self.stretches.remove(&id);
        let keys: Vec<SignalKey> = self.signals_in(id).map(|s| s.key()).collect();
        for key in &keys {
            self.signals.remove(key);
        }
        self.relink();
        keys
    }

    pub(crate) fn insert_signal(&mut self, record: SignalRecord) -> Arc<Signal> {
        let signal = Arc::new(Signal::new(record));
        self.signals.insert(signal.key(), Arc::clone(&signal));
        self.relink();
        signal
    }

    pub(crate) fn remove_signal(&mut self, key: SignalKey) -> Option<Arc<Signal>> {
        let removed = self.signals.remove(&key);
        self.relink();
        removed
    }

    /// Recompute every signal's links from the records.
    pub(crate) fn relink(&mut self) {
        let mut links: BTreeMap<SignalKey, Links> =
            self.signals.keys().map(|k| (*k, Links::default())).collect();

        for key in self.signals.keys() {
            let entry = links.entry(*key).or_default();
            if let Some(prev_id) = key.id.checked_sub(1) {
                let prev = SignalKey::new(key.stretch_id, prev_id);
                if self.signals.contains_key(&prev) {
                    entry.previous = Some(prev);
                }
            }
            if let Some(next_id) = key.id.checked_add(1) {
                let next = SignalKey::new(key.stretch_id, next_id);
                if self.signals.contains_key(&next) {
                    entry.next = Some(next);
                }
            }
        }

        for (key, signal) in &self.signals {
            let record = signal.record();
            if let Some(detour) = record.detour().filter(|d| self.signals.contains_key(d)) {
                links.entry(*key).or_default().detour = Some(detour);
                let counterpart = links.entry(detour).or_default();
                if record.is_splitter() {
                    counterpart.previous = Some(*key);
                } else {
                    counterpart.next = Some(*key);
                }
            }
            if let Some(target) = record.loop_back().filter(|t| self.signals.contains_key(t)) {
                links.entry(*key).or_default().next = Some(target);
                links.entry(target).or_default().previous = Some(*key);
            }
        }

        for (key, signal) in &self.signals {
            signal.set_links(links.get(key).copied().unwrap_or_default());
        }
    }

    /// Switch-aware next signal.
    ///
    /// A splitter routes through its detour when the points are set (or about
    /// to be set) that way; everything else follows `next`.
    pub fn resolve_next(&self, signal: &Signal) -> Option<Arc<Signal>> {
        let links = signal.links();
        let record = signal.record();
        let key = if record.is_splitter() && !signal.points.state().routes_passthrough() {
            links.detour
        } else {
            links.next
        };
        key.and_then(|k| self.get(k))
    }

    /// Resolve a signal's previous neighbor.
    pub fn previous(&self, signal: &Signal) -> Option<Arc<Signal>> {
        signal.links().previous.and_then(|k| self.get(k))
    }

    /// Check that a record's stretch and routing targets exist.
    pub fn validate_references(&self, record: &SignalRecord) -> Result<(), InterlockError> {
        if !self.stretches.contains_key(&record.stretch_id) {
            return Err(InterlockError::NotFound(format!(
                "stretch {}",
                record.stretch_id
            )));
        }
        let mut invalid = Vec::new();
        if let Some(detour) = record.detour() {
            if !self.signals.contains_key(&detour) {
                invalid.push("signalDetourId".to_string());
            }
        }
        if let Some(target) = record.loop_back() {
            if !self.signals.contains_key(&target) {
                invalid.push("signalLoopBackId".to_string());
            }
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(InterlockError::Invalid(invalid))
        }
    }
}
