//! Zone occupancy and signal aspects.
//!
//! Every signal governs one zone, guarded by two independent primitives:
//!
//! - the **check lock**, a short-held `std` mutex serializing the
//!   "is this zone free, and if so claim it" decision;
//! - the **occupancy latch**, a `tokio::sync::watch` cell holding the
//!   current [`Occupant`]. It stays set for as long as a train owns the zone
//!   and waiters block on it until it clears, never polling.
//!
//! # Lock order
//!
//! topology map → check lock → train session → leaf state (occupancy,
//! aspect, records, links, points). A check lock is never taken while
//! another signal's check lock is held, and leaf locks are never nested.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::topology::{Signal, SignalKey, Topology};
use crate::train::TrainId;

/// Displayed state of a signal, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SignalAspect {
    /// Next two zones free.
    #[default]
    Clear,
    /// Zone after next occupied.
    PreliminaryCaution,
    /// Next zone occupied.
    Caution,
    /// Own zone occupied, end of line, or points pending.
    Danger,
}

impl SignalAspect {
    /// Lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::PreliminaryCaution => "preliminary_caution",
            Self::Caution => "caution",
            Self::Danger => "danger",
        }
    }
}

impl From<SignalAspect> for u8 {
    fn from(aspect: SignalAspect) -> Self {
        match aspect {
            SignalAspect::Clear => 0,
            SignalAspect::PreliminaryCaution => 1,
            SignalAspect::Caution => 2,
            SignalAspect::Danger => 3,
        }
    }
}

impl TryFrom<u8> for SignalAspect {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Clear),
            1 => Ok(Self::PreliminaryCaution),
            2 => Ok(Self::Caution),
            3 => Ok(Self::Danger),
            other => Err(format!("invalid aspect {other}")),
        }
    }
}

/// Holder of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupant {
    /// A train owns the zone.
    Train(TrainId),
    /// An operator holds the zone at Danger.
    ForcedRed,
}

impl Occupant {
    /// Owning train, if any.
    pub fn train(&self) -> Option<TrainId> {
        match self {
            Self::Train(id) => Some(*id),
            Self::ForcedRed => None,
        }
    }
}

/// Proof that a zone's check lock is held.
pub struct CheckGuard<'a> {
    zone: &'a Zone,
    _guard: MutexGuard<'a, ()>,
}

/// Occupancy state of one zone.
#[derive(Debug)]
pub struct Zone {
    check: Mutex<()>,
    occupancy: watch::Sender<Option<Occupant>>,
    aspect: Mutex<SignalAspect>,
}

impl Zone {
    /// Create a free zone showing `aspect`.
    pub fn new(aspect: SignalAspect) -> Self {
        let (occupancy, _) = watch::channel(None);
        Self {
            check: Mutex::new(()),
            occupancy,
            aspect: Mutex::new(aspect),
        }
    }

    /// Acquire the check lock. Must not be held across an await.
    pub fn lock_check(&self) -> CheckGuard<'_> {
        CheckGuard {
            zone: self,
            _guard: self.check.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Current holder.
    pub fn occupant(&self) -> Option<Occupant> {
        *self.occupancy.borrow()
    }

    /// Whether anyone holds the zone.
    pub fn is_occupied(&self) -> bool {
        self.occupancy.borrow().is_some()
    }

    /// Cached aspect.
    pub fn aspect(&self) -> SignalAspect {
        *self.aspect.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a freshly derived aspect; returns whether it changed.
    pub(crate) fn set_aspect(&self, aspect: SignalAspect) -> bool {
        let mut current = self.aspect.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = *current != aspect;
        *current = aspect;
        changed
    }

    /// Claim the zone for `occupant`; fails when already held.
    pub(crate) fn occupy(&self, check: &CheckGuard<'_>, occupant: Occupant) -> bool {
        debug_assert!(std::ptr::eq(check.zone, self), "check lock of another zone");
        self.occupancy.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(occupant);
            true
        })
    }

    /// Release the zone if `occupant` holds it; returns whether it did.
    pub(crate) fn vacate(&self, occupant: Occupant) -> bool {
        self.occupancy.send_if_modified(|current| {
            if *current != Some(occupant) {
                return false;
            }
            *current = None;
            true
        })
    }

    /// Wait until nobody holds the zone.
    pub async fn wait_until_free(&self) {
        let mut rx = self.occupancy.subscribe();
        // The sender lives as long as `self`, so this only fails on teardown.
        let _ = rx.wait_for(Option::is_none).await;
    }
}

/// Derive a signal's aspect from the occupancy around it.
///
/// First match wins: Danger (own zone held, points pending, or no next),
/// Caution (next held), Preliminary-Caution (next-next held), else Clear.
pub fn derive_aspect(topology: &Topology, signal: &Signal) -> SignalAspect {
    if signal.zone.is_occupied() || signal.switch_pending() {
        return SignalAspect::Danger;
    }
    let Some(next) = topology.resolve_next(signal) else {
        return SignalAspect::Danger;
    };
    if next.zone.is_occupied() {
        return SignalAspect::Caution;
    }
    match topology.resolve_next(&next) {
        Some(after) if after.zone.is_occupied() => SignalAspect::PreliminaryCaution,
        _ => SignalAspect::Clear,
    }
}

/// Recompute a signal and up to two signals behind it.
///
/// Returns the keys whose cached aspect changed.
pub fn cascade(topology: &Topology, signal: &Signal) -> Vec<SignalKey> {
    let mut changed = Vec::new();
    if signal.zone.set_aspect(derive_aspect(topology, signal)) {
        changed.push(signal.key());
    }
    let mut behind = topology.previous(signal);
    for _ in 0..2 {
        let Some(prev) = behind else { break };
        if prev.zone.set_aspect(derive_aspect(topology, &prev)) {
            changed.push(prev.key());
        }
        behind = topology.previous(&prev);
    }
    changed
}

/// Recompute every signal; used after the graph is relinked.
pub fn refresh_all(topology: &Topology) -> Vec<SignalKey> {
    topology
        .signals()
        .filter(|signal| signal.zone.set_aspect(derive_aspect(topology, signal)))
        .map(|signal| signal.key())
        .collect()
}
