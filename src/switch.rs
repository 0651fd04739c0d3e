//! Points (switch) state machine.
//!
//! ```text
//! settled ──request──▶ queued ──train arrives──▶ actuating ──success──▶ settled (flipped)
//!                         ▲                         │  ▲
//!                         └──── train halted ───────┤  │ retry (< max attempts)
//!                                           failure │  │
//!                                                   ▼  │
//!                                                  failed (terminal)
//! ```
//!
//! Points start settled on the through route. Every change of state wakes
//! all trains waiting on the points; each re-checks what it waits for.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::link::TrainCommand;

/// Lifecycle phase of a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchPhase {
    /// At rest.
    #[default]
    Settled,
    /// A route change is staged and waits for a train to actuate it.
    Queued,
    /// An actuation command is in flight.
    Actuating,
    /// Retries exhausted; needs the operator.
    Failed,
}

/// Externally visible status of a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchStatus {
    /// At rest on the through route.
    SettledPassthrough,
    /// At rest on the detour.
    SettledDetour,
    /// Route change staged.
    Queued,
    /// Actuation in flight.
    Actuating,
    /// Retries exhausted.
    Failed,
}

/// Reasons a toggle request is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleRefusal {
    /// The points already sit in the requested position.
    AlreadySet,
    /// Another change is queued, in flight, or failed.
    Busy,
}

impl ToggleRefusal {
    /// Message for operator results.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadySet => "already in the requested position",
            Self::Busy => "a route change is already pending",
        }
    }
}

/// What to do after the hardware reports a failed actuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Send the command again.
    Retry(TrainCommand),
    /// Attempts exhausted; the points are now failed.
    GaveUp,
    /// No actuation was in flight.
    Ignored,
}

/// Position and phase of a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchState {
    passthrough: bool,
    phase: SwitchPhase,
}

impl Default for SwitchState {
    fn default() -> Self {
        Self {
            passthrough: true,
            phase: SwitchPhase::Settled,
        }
    }
}

impl SwitchState {
    /// Whether the points rest (or last rested) on the through route.
    pub fn passthrough(&self) -> bool {
        self.passthrough
    }

    /// Current phase.
    pub fn phase(&self) -> SwitchPhase {
        self.phase
    }

    /// Externally visible status.
    pub fn status(&self) -> SwitchStatus {
        match (self.phase, self.passthrough) {
            (SwitchPhase::Settled, true) => SwitchStatus::SettledPassthrough,
            (SwitchPhase::Settled, false) => SwitchStatus::SettledDetour,
            (SwitchPhase::Queued, _) => SwitchStatus::Queued,
            (SwitchPhase::Actuating, _) => SwitchStatus::Actuating,
            (SwitchPhase::Failed, _) => SwitchStatus::Failed,
        }
    }

    /// A change is queued, in flight, or stuck.
    pub fn pending(&self) -> bool {
        self.phase != SwitchPhase::Settled
    }

    /// Route a splitter resolves to: the staged position while a change is
    /// pending, the current one otherwise.
    pub fn routes_passthrough(&self) -> bool {
        self.pending() != self.passthrough
    }

    /// Stage a move to the given position.
    pub fn request(&mut self, passthrough: bool) -> Result<(), ToggleRefusal> {
        if self.pending() {
            return Err(ToggleRefusal::Busy);
        }
        if self.passthrough == passthrough {
            return Err(ToggleRefusal::AlreadySet);
        }
        self.phase = SwitchPhase::Queued;
        Ok(())
    }

    /// Stage a flip because an arriving train needs the other position.
    pub fn queue_flip(&mut self) {
        if self.phase == SwitchPhase::Settled {
            self.phase = SwitchPhase::Queued;
        }
    }

    fn command(&self) -> TrainCommand {
        if self.passthrough {
            TrainCommand::SwitchDetour
        } else {
            TrainCommand::SwitchPassthrough
        }
    }

    /// Points in motion or jammed; a train standing on them cannot go on.
    pub fn blocking(&self) -> bool {
        matches!(self.phase, SwitchPhase::Actuating | SwitchPhase::Failed)
    }

    /// The actuating train left; the change goes back to waiting for one.
    pub fn abandon(&mut self) -> bool {
        if self.phase != SwitchPhase::Actuating {
            return false;
        }
        self.phase = SwitchPhase::Queued;
        true
    }

    /// Start actuating a queued change.
    pub fn begin_actuation(&mut self) -> Option<TrainCommand> {
        if self.phase != SwitchPhase::Queued {
            return None;
        }
        self.phase = SwitchPhase::Actuating;
        Some(self.command())
    }

    /// Hardware confirmed the move; returns whether an actuation completed.
    pub fn settle(&mut self) -> bool {
        if self.phase != SwitchPhase::Actuating {
            return false;
        }
        self.passthrough = !self.passthrough;
        self.phase = SwitchPhase::Settled;
        true
    }

    /// Hardware reported a failed move after `attempts` tries.
    pub fn fail(&mut self, attempts: u8, max_attempts: u8) -> FailureOutcome {
        if self.phase != SwitchPhase::Actuating {
            return FailureOutcome::Ignored;
        }
        if attempts >= max_attempts {
            self.phase = SwitchPhase::Failed;
            FailureOutcome::GaveUp
        } else {
            FailureOutcome::Retry(self.command())
        }
    }
}

/// Points attached to a signal: state plus a wake-up for waiting trains.
#[derive(Debug)]
pub struct Points {
    state: Mutex<SwitchState>,
    changed: Notify,
}

impl Default for Points {
    fn default() -> Self {
        Self::new()
    }
}

impl Points {
    /// Points settled on the through route.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SwitchState::default()),
            changed: Notify::new(),
        }
    }

    /// Snapshot of the state.
    pub fn state(&self) -> SwitchState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the state under its lock, waking every waiter if it changed.
    pub fn update<R>(&self, f: impl FnOnce(&mut SwitchState) -> R) -> R {
        let (result, changed) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let before = *state;
            let result = f(&mut state);
            (result, *state != before)
        };
        if changed {
            self.changed.notify_waiters();
        }
        result
    }

    /// Wait until the points are neither moving nor jammed.
    pub async fn wait_unblocked(&self) {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            if !self.state().blocking() {
                return;
            }
            changed.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_settled_passthrough() {
        let state = SwitchState::default();
        assert_eq!(state.status(), SwitchStatus::SettledPassthrough);
        assert!(state.routes_passthrough());
    }

    #[test]
    fn request_rejects_same_position_and_double_queue() {
        let mut state = SwitchState::default();
        assert_eq!(state.request(true), Err(ToggleRefusal::AlreadySet));
        assert_eq!(state.request(false), Ok(()));
        assert_eq!(state.status(), SwitchStatus::Queued);
        assert_eq!(state.request(false), Err(ToggleRefusal::Busy));
        assert_eq!(state.request(true), Err(ToggleRefusal::Busy));
    }

    #[test]
    fn pending_toggle_routes_to_staged_position() {
        let mut state = SwitchState::default();
        state.request(false).unwrap();
        assert!(!state.routes_passthrough());

        state.begin_actuation();
        assert!(state.settle());
        assert!(!state.passthrough());
        assert!(!state.routes_passthrough());
    }

    #[test]
    fn actuation_command_targets_other_position() {
        let mut state = SwitchState::default();
        state.request(false).unwrap();
        assert_eq!(state.begin_actuation(), Some(TrainCommand::SwitchDetour));
        assert_eq!(state.begin_actuation(), None);
        state.settle();

        state.request(true).unwrap();
        assert_eq!(state.begin_actuation(), Some(TrainCommand::SwitchPassthrough));
    }

    #[test]
    fn failure_retries_until_bound() {
        let mut state = SwitchState::default();
        state.request(false).unwrap();
        state.begin_actuation();

        assert_eq!(state.fail(1, 3), FailureOutcome::Retry(TrainCommand::SwitchDetour));
        assert_eq!(state.fail(2, 3), FailureOutcome::Retry(TrainCommand::SwitchDetour));
        assert!(state.passthrough());
        assert_eq!(state.fail(3, 3), FailureOutcome::GaveUp);
        assert_eq!(state.status(), SwitchStatus::Failed);
        assert_eq!(state.fail(4, 3), FailureOutcome::Ignored);
        assert_eq!(state.request(true), Err(ToggleRefusal::Busy));
    }

    #[test]
    fn settle_without_actuation_is_ignored() {
        let mut state = SwitchState::default();
        assert!(!state.settle());
        assert!(state.passthrough());
    }

    #[test]
    fn abandoned_actuation_is_queued_again() {
        let mut state = SwitchState::default();
        assert!(!state.abandon());
        state.request(false).unwrap();
        state.begin_actuation();
        assert!(state.blocking());

        assert!(state.abandon());
        assert_eq!(state.status(), SwitchStatus::Queued);
        assert!(!state.blocking());
        assert_eq!(state.begin_actuation(), Some(TrainCommand::SwitchDetour));
    }

    #[tokio::test]
    async fn settling_wakes_every_waiter() {
        let points = std::sync::Arc::new(Points::new());
        points.update(|p| p.request(false)).unwrap();
        points.update(SwitchState::begin_actuation);

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let points = std::sync::Arc::clone(&points);
                tokio::spawn(async move { points.wait_unblocked().await })
            })
            .collect();
        tokio::task::yield_now().await;
        points.update(SwitchState::settle);

        for waiter in waiters {
            tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
                .await
                .expect("every waiter should wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn failed_points_keep_waiters_blocked() {
        let points = Points::new();
        points.update(|p| p.request(false)).unwrap();
        points.update(SwitchState::begin_actuation);
        points.update(|p| p.fail(1, 1));

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), points.wait_unblocked())
                .await;
        assert!(waited.is_err());
    }
}
