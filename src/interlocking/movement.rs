//! Train sessions and zone-to-zone movement.
//!
//! Each online train has one movement worker: a task draining that train's
//! order queue in sequence, so a train blocked at Danger never holds up
//! another. Switch results bypass the queue; the worker may be waiting on
//! exactly those points.
//!
//! Waits are indefinite. The only ways out are the zone (or points) freeing
//! up and a halt, which every stop and disconnect issues. A halted train
//! that was moving points hands them back to the queue, so the next train
//! to claim the zone actuates them.

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::json;
use tokio::sync::mpsc;

use super::{signal_details, Interlocking};
use crate::error::{InterlockError, LinkError};
use crate::event_log::EventKind;
use crate::link::TrainCommand;
use crate::messages::TrainAtSignal;
use crate::switch::{FailureOutcome, SwitchPhase, SwitchState};
use crate::topology::{Signal, SignalKey, SpeedLimit, Topology};
use crate::traits::TrainLink;
use crate::train::{Order, Session, Train, TrainId};
use crate::zone::{self, Occupant, SignalAspect};

/// Outcome of one attempt to enter a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Aspect the train runs under; Danger means stop.
    pub aspect: SignalAspect,
    /// Speed class of the entered zone.
    pub speed_limit: SpeedLimit,
    /// The points at the entered zone must move before the train can go on.
    pub needs_switching: bool,
}

impl Entry {
    const DANGER: Self = Self {
        aspect: SignalAspect::Danger,
        speed_limit: SpeedLimit::Slow,
        needs_switching: false,
    };

    const NEEDS_SWITCHING: Self = Self {
        needs_switching: true,
        ..Self::DANGER
    };

    fn go(aspect: SignalAspect, speed_limit: SpeedLimit) -> Self {
        Self {
            aspect,
            speed_limit,
            needs_switching: false,
        }
    }
}

/// What a stopped train waits for before trying again.
enum Blocker {
    /// Points under the train are moving or jammed.
    Points(Arc<Signal>),
    /// Another holder sits in this zone.
    Zone(Arc<Signal>),
}

impl Blocker {
    async fn wait(&self) {
        match self {
            Self::Points(signal) => signal.points.wait_unblocked().await,
            Self::Zone(signal) => signal.zone.wait_until_free().await,
        }
    }
}

enum Step {
    Done,
    Wait(Blocker),
}

/// A merger is set for the wrong route when the arriving train comes off
/// the detour while it lies on the through route, or the other way round.
fn merger_misaligned(
    passthrough: bool,
    previous: Option<SignalKey>,
    detour: Option<SignalKey>,
) -> bool {
    let from_detour = previous == detour;
    (passthrough && from_detour) || (!passthrough && !from_detour)
}

fn pass_event(aspect: SignalAspect) -> EventKind {
    match aspect {
        SignalAspect::Clear => EventKind::TrainPassClearSignal,
        SignalAspect::PreliminaryCaution => EventKind::TrainPassPreliminaryCautionSignal,
        SignalAspect::Caution => EventKind::TrainPassCautionSignal,
        SignalAspect::Danger => EventKind::TrainStopAtDangerSignal,
    }
}

fn train_at(train_id: TrainId, key: SignalKey) -> serde_json::Value {
    json!({ "trainId": train_id, "stretchId": key.stretch_id, "id": key.id })
}

async fn run_worker(
    interlocking: Arc<Interlocking>,
    train: Arc<Train>,
    mut orders: mpsc::UnboundedReceiver<Order>,
) {
    while let Some(order) = orders.recv().await {
        match order {
            Order::Advance => interlocking.advance(&train).await,
            Order::Enter(key) => interlocking.enter_zone(&train, key).await,
        }
    }
    debug!("movement worker for train {} stopped", train.id());
}

impl Interlocking {
    // ========================================================================
    // Sessions
    // ========================================================================

    /// Attach a hardware connection to the train holding `access_key`.
    pub fn connect(
        self: &Arc<Self>,
        access_key: u32,
        link: Arc<dyn TrainLink>,
    ) -> Result<Arc<Train>, LinkError> {
        let train = self
            .trains_read()
            .values()
            .find(|t| t.record().access_key == access_key)
            .cloned()
            .ok_or(LinkError::UnknownTrain)?;

        {
            let mut session = train.session();
            if session.online() {
                return Err(LinkError::AlreadyOnline(train.id()));
            }
            let (orders, rx) = mpsc::unbounded_channel();
            let worker = tokio::spawn(run_worker(Arc::clone(self), Arc::clone(&train), rx));
            *session = Session {
                link: Some(link),
                orders: Some(orders),
                worker: Some(worker),
                ..Session::default()
            };
        }

        info!("train {} online", train.id());
        self.publish_train(&train);
        Ok(train)
    }

    /// Detach the train's hardware connection and release its zone.
    pub fn disconnect(&self, train_id: TrainId) {
        let Some(train) = self.train(train_id) else {
            return;
        };
        let worker = {
            let topology = self.topology();
            let mut session = train.session();
            train.halt();
            let released = session
                .last_signal
                .map(|key| self.release_zone(&topology, train_id, key))
                .unwrap_or_default();
            let worker = session.worker.take();
            *session = Session::default();
            drop(session);
            self.publish_signals(&topology, &released);
            worker
        };
        if let Some(worker) = worker {
            worker.abort();
        }
        info!("train {train_id} offline");
        self.publish_train(&train);
    }

    /// Release `key` if `train_id` holds it; returns the signals to republish.
    ///
    /// Points the train was still moving go back to queued.
    fn release_zone(&self, topology: &Topology, train_id: TrainId, key: SignalKey) -> Vec<SignalKey> {
        let Some(signal) = topology.get(key) else {
            return Vec::new();
        };
        if signal.zone.occupant() != Some(Occupant::Train(train_id)) {
            return Vec::new();
        }
        if signal.record().is_switch && signal.points.update(SwitchState::abandon) {
            warn!("train {train_id} left {key} while its points were moving");
        }
        if !signal.zone.vacate(Occupant::Train(train_id)) {
            return Vec::new();
        }
        let mut changed = zone::cascade(topology, &signal);
        changed.push(key);
        changed
    }

    // ========================================================================
    // Hardware events
    // ========================================================================

    /// The train crossed a block boundary.
    pub fn reed_switch_triggered(&self, train_id: TrainId) {
        let Some(train) = self.train(train_id) else {
            return;
        };
        debug!("train {train_id} reed switch");
        self.log_event(
            EventKind::TrainReedSwitchTriggered,
            json!({ "trainId": train_id }),
        );
        if let Some(orders) = &train.session().orders {
            let _ = orders.send(Order::Advance);
        };
    }

    /// The train reported the outcome of a points actuation.
    pub fn switch_result(&self, train_id: TrainId, succeeded: bool) {
        let Some(train) = self.train(train_id) else {
            return;
        };
        let Some(key) = train.session().last_signal else {
            warn!("train {train_id} reported points but owns no zone");
            return;
        };
        let topology = self.topology();
        let Some(signal) = topology.get(key) else {
            return;
        };
        if !signal.record().is_switch {
            warn!("train {train_id} reported points at {key}, which is not a switch");
            return;
        }

        if succeeded {
            let mut changed = {
                let _check = signal.zone.lock_check();
                if !signal.points.update(SwitchState::settle) {
                    debug!("points at {key}: stray success report");
                    return;
                }
                zone::cascade(&topology, &signal)
            };
            info!("points at {key} switched");
            changed.push(key);
            self.publish_signals(&topology, &changed);
            drop(topology);
            self.log_event(EventKind::SwitchSuccessfullySwitched, signal_details(key));
            return;
        }

        let attempts = train.session().switch_attempts;
        match signal
            .points
            .update(|points| points.fail(attempts, self.max_switch_attempts))
        {
            FailureOutcome::Retry(command) => {
                let generation = {
                    let mut session = train.session();
                    session.switch_attempts = attempts.saturating_add(1);
                    train.generation()
                };
                drop(topology);
                warn!("points at {key} failed to move (attempt {attempts}), retrying");
                self.send(&train, generation, command);
                self.log_event(EventKind::SwitchStartedSwitching, signal_details(key));
                self.publish_train(&train);
            }
            FailureOutcome::GaveUp => {
                error!("points at {key} failed after {attempts} attempts");
                self.publish_signals(&topology, &[key]);
                drop(topology);
                self.log_event(EventKind::SwitchFailedSwitching, signal_details(key));
            }
            FailureOutcome::Ignored => debug!("points at {key}: stray failure report"),
        }
    }

    // ========================================================================
    // Operator actions
    // ========================================================================

    /// Place an idle online train into the zone of `key`.
    pub fn jump_start(&self, train_id: TrainId, key: SignalKey) -> Result<(), InterlockError> {
        let train = self.require_train(train_id)?;
        self.require_signal(key)?;
        {
            let mut session = train.session();
            if !session.online() {
                return Err(InterlockError::TrainNotOnline(train_id));
            }
            if session.started || session.last_signal.is_some() {
                return Err(InterlockError::TrainNotStopped(train_id));
            }
            session
                .orders
                .as_ref()
                .and_then(|orders| orders.send(Order::Enter(key)).ok())
                .ok_or(InterlockError::TrainNotOnline(train_id))?;
            session.started = true;
            session.stop_at = None;
            session.last_passed_aspect = None;
        }
        info!("train {train_id} jump-started at {key}");
        self.log_event(EventKind::JumpStartTrain, train_at(train_id, key));
        self.publish_train(&train);
        Ok(())
    }

    /// Stop the train and release its zone. Stopping a stopped train is a no-op.
    pub fn stop_train(&self, train_id: TrainId) -> Result<(), InterlockError> {
        let train = self.require_train(train_id)?;
        let (online, generation) = {
            let topology = self.topology();
            let mut session = train.session();
            train.halt();
            let released = session
                .last_signal
                .take()
                .map(|key| self.release_zone(&topology, train_id, key))
                .unwrap_or_default();
            session.started = false;
            session.stop_at = None;
            session.last_passed_aspect = None;
            session.switch_attempts = 0;
            let online = session.online();
            drop(session);
            self.publish_signals(&topology, &released);
            (online, train.generation())
        };
        if online {
            self.send(&train, generation, TrainCommand::FastStop);
        }
        info!("train {train_id} stopped by operator");
        self.log_event(EventKind::RequestStopTrain, json!({ "trainId": train_id }));
        self.publish_train(&train);
        Ok(())
    }

    /// Stop a running train when it next claims the given zone.
    pub fn stop_train_at_signal(&self, request: TrainAtSignal) -> Result<(), InterlockError> {
        let train = self.require_train(request.train_id)?;
        let key = request.signal();
        self.require_signal(key)?;
        {
            let mut session = train.session();
            if !session.started {
                return Err(InterlockError::TrainNotStarted(request.train_id));
            }
            session.stop_at = Some(key);
        }
        info!("train {} will stop at {key}", request.train_id);
        self.publish_train(&train);
        Ok(())
    }

    /// Drop a pending stop-at-signal marker.
    pub fn cancel_stop_at_signal(&self, train_id: TrainId) -> Result<(), InterlockError> {
        let train = self.require_train(train_id)?;
        if train.session().stop_at.take().is_none() {
            return Err(InterlockError::NoStopAtSignal(train_id));
        }
        self.publish_train(&train);
        Ok(())
    }

    // ========================================================================
    // Zone entry
    // ========================================================================

    /// One entry attempt for `train_id` into the zone of `key`.
    ///
    /// Claims the zone when it is free and releases the train's previous
    /// zone; never waits and sends nothing to the train.
    pub fn attempt_enter_zone(
        &self,
        train_id: TrainId,
        key: SignalKey,
    ) -> Result<Entry, InterlockError> {
        let train = self.require_train(train_id)?;
        let generation = train.generation();
        Ok(self.attempt(&train, key, generation)?.unwrap_or(Entry::DANGER))
    }

    /// Entry attempt; `None` when the train was halted since `generation`.
    fn attempt(
        &self,
        train: &Train,
        key: SignalKey,
        generation: u64,
    ) -> Result<Option<Entry>, InterlockError> {
        let me = Occupant::Train(train.id());
        let topology = self.topology();
        let signal = topology
            .get(key)
            .ok_or_else(|| InterlockError::NotFound(format!("signal {key}")))?;
        let record = signal.record();
        let next = topology.resolve_next(&signal);

        let next_held = next
            .as_ref()
            .and_then(|n| n.zone.occupant())
            .is_some_and(|holder| holder != me);

        let check = signal.zone.lock_check();
        match signal.zone.occupant() {
            Some(holder) if holder == me => {
                let points = signal.points.state();
                let entry = if next_held {
                    Entry::DANGER
                } else if !record.is_switch {
                    Entry::go(SignalAspect::Clear, record.speed_limit)
                } else if points.phase() == SwitchPhase::Queued {
                    Entry::NEEDS_SWITCHING
                } else if points.blocking() {
                    Entry::DANGER
                } else if !points.passthrough() {
                    Entry::go(SignalAspect::Caution, SpeedLimit::Slow)
                } else {
                    Entry::go(SignalAspect::Clear, record.speed_limit)
                };
                return Ok(Some(entry));
            }
            Some(_) => return Ok(Some(Entry::DANGER)),
            None => {}
        }

        let prior = signal.zone.aspect();

        let mut session = train.session();
        if train.generation() != generation {
            return Ok(None);
        }
        if !signal.zone.occupy(&check, me) {
            return Ok(Some(Entry::DANGER));
        }
        let previous = session.last_signal.replace(key);

        let entry = if next_held {
            Entry::DANGER
        } else if record.is_switch {
            signal.points.update(|points| {
                if points.pending() {
                    Entry::NEEDS_SWITCHING
                } else if record.is_merger()
                    && merger_misaligned(points.passthrough(), previous, record.detour())
                {
                    points.queue_flip();
                    Entry::NEEDS_SWITCHING
                } else {
                    Entry::go(prior, record.speed_limit)
                }
            })
        } else {
            Entry::go(prior, record.speed_limit)
        };

        let mut changed = match previous.filter(|prev| *prev != key) {
            Some(prev) => self.release_zone(&topology, train.id(), prev),
            None => Vec::new(),
        };
        drop(session);
        changed.extend(zone::cascade(&topology, &signal));
        changed.push(key);
        drop(check);

        debug!(
            "train {} claimed {key}: {} (switching: {})",
            train.id(),
            entry.aspect.as_str(),
            entry.needs_switching
        );
        self.publish_signals(&topology, &changed);
        Ok(Some(entry))
    }

    /// Move into the zone after the one the train owns.
    async fn advance(&self, train: &Arc<Train>) {
        let (started, last) = {
            let session = train.session();
            (session.started, session.last_signal)
        };
        let Some(last) = last.filter(|_| started) else {
            debug!("train {}: reed switch while not running", train.id());
            return;
        };
        let next = {
            let topology = self.topology();
            topology
                .get(last)
                .and_then(|signal| topology.resolve_next(&signal))
                .map(|signal| signal.key())
        };
        match next {
            Some(key) => self.enter_zone(train, key).await,
            None => debug!("train {} is at the end of the line", train.id()),
        }
    }

    /// Retry entry into `key` until the train may run or is halted.
    pub(crate) async fn enter_zone(&self, train: &Arc<Train>, key: SignalKey) {
        let mut halt = train.subscribe_halt();
        let generation = *halt.borrow_and_update();
        if !train.session().started {
            debug!("train {} was stopped before entering {key}", train.id());
            return;
        }
        loop {
            let blocker = match self.try_enter(train, key, generation) {
                Ok(Step::Done) => return,
                Ok(Step::Wait(blocker)) => blocker,
                Err(e) => {
                    warn!("train {} cannot enter {key}: {e}", train.id());
                    return;
                }
            };
            tokio::select! {
                _ = blocker.wait() => {}
                _ = halt.changed() => {
                    debug!("train {} halted while waiting at {key}", train.id());
                    return;
                }
            }
        }
    }

    fn try_enter(&self, train: &Train, key: SignalKey, generation: u64) -> Result<Step, InterlockError> {
        let Some(entry) = self.attempt(train, key, generation)? else {
            return Ok(Step::Done);
        };
        let signal = self.require_signal(key)?;

        if signal.zone.occupant() == Some(Occupant::Train(train.id())) && !entry.needs_switching {
            let terminal = self.topology().resolve_next(&signal).is_none();
            let marked = train.session().stop_at == Some(key);
            if terminal || marked {
                self.hold(train, key, generation, marked);
                return Ok(Step::Done);
            }
        }

        if entry.aspect != SignalAspect::Danger {
            let speed = train.record().speed_for(entry.aspect, entry.speed_limit);
            train.session().last_passed_aspect = Some(entry.aspect);
            self.send(train, generation, TrainCommand::Forward(speed));
            let mut details = train_at(train.id(), key);
            details["speed"] = json!(speed);
            self.log_event(pass_event(entry.aspect), details);
            self.publish_train(train);
            return Ok(Step::Done);
        }

        train.session().last_passed_aspect = Some(SignalAspect::Danger);
        self.send(train, generation, TrainCommand::FastStop);
        self.log_event(EventKind::TrainStopAtDangerSignal, train_at(train.id(), key));
        if entry.needs_switching {
            self.actuate(train, &signal, generation);
        }
        self.publish_train(train);
        Ok(self.blocker(train.id(), key).map_or(Step::Done, Step::Wait))
    }

    /// Stop the train inside a zone it keeps: end of line or a stop marker.
    fn hold(&self, train: &Train, key: SignalKey, generation: u64, marked: bool) {
        {
            let mut session = train.session();
            if train.generation() != generation {
                return;
            }
            session.started = false;
            session.last_passed_aspect = Some(SignalAspect::Danger);
            if marked {
                session.stop_at = None;
            }
        }
        self.send(train, generation, TrainCommand::FastStop);
        info!("train {} holding at {key}", train.id());
        let kind = if marked {
            EventKind::RequestStopTrain
        } else {
            EventKind::TrainStopAtDangerSignal
        };
        self.log_event(kind, train_at(train.id(), key));
        self.publish_train(train);
    }

    /// The zone or points a train stopped at `key` must wait for.
    ///
    /// Points only block the train standing on them; a train kept out of a
    /// zone waits for its holder to leave, whatever the points there do.
    fn blocker(&self, train_id: TrainId, key: SignalKey) -> Option<Blocker> {
        let topology = self.topology();
        let signal = topology.get(key)?;
        match signal.zone.occupant() {
            Some(holder) if holder != Occupant::Train(train_id) => {
                return Some(Blocker::Zone(signal));
            }
            Some(_) if signal.record().is_switch && signal.points.state().blocking() => {
                return Some(Blocker::Points(signal));
            }
            _ => {}
        }
        let next = topology.resolve_next(&signal)?;
        Some(Blocker::Zone(next))
    }

    /// Start moving queued points with the train standing on them.
    fn actuate(&self, train: &Train, signal: &Signal, generation: u64) {
        let Some(command) = signal.points.update(SwitchState::begin_actuation) else {
            return;
        };
        train.session().switch_attempts = 1;
        let key = signal.key();
        info!("train {} moving points at {key}", train.id());
        self.send(train, generation, command);
        self.publish_signal(signal);
        self.log_event(EventKind::SwitchStartedSwitching, signal_details(key));
    }

    fn send(&self, train: &Train, generation: u64, command: TrainCommand) {
        if let Err(e) = train.command(generation, command) {
            warn!("train {}: could not send {command:?}: {e}", train.id());
        }
    }
}
