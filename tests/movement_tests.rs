//! Integration tests for train movement: jump starts, reed switches, waits
//! at Danger, stops, and points actuated by the train standing on them.

use std::sync::Arc;
use std::time::Duration;

use rs_signalbox::config::ServerConfig;
use rs_signalbox::hal::MockLink;
use rs_signalbox::link::TrainCommand;
use rs_signalbox::messages::TrainAtSignal;
use rs_signalbox::notify::Notifier;
use rs_signalbox::store::MemoryStore;
use rs_signalbox::topology::{SignalKey, SignalRecord, SpeedLimit, StretchKind, StretchRecord};
use rs_signalbox::{Interlocking, Occupant, SignalAspect, TrainId, TrainRecord};

const SLOW: u8 = 40;
const HALF: u8 = 80;
const FAST: u8 = 120;

struct Layout {
    ilk: Arc<Interlocking>,
}

impl Layout {
    fn new() -> Self {
        let ilk = Interlocking::load(
            Arc::new(MemoryStore::new()),
            Notifier::default(),
            &ServerConfig::default(),
        )
        .unwrap();
        Self { ilk: Arc::new(ilk) }
    }

    /// Plain line of `len` fast signals in a new stretch.
    fn line(self, len: u8) -> Self {
        let id = self.stretch("main");
        for n in 1..=len {
            self.ilk
                .insert_signal(SignalRecord {
                    stretch_id: id,
                    name: format!("S{n}"),
                    speed_limit: SpeedLimit::Fast,
                    ..Default::default()
                })
                .unwrap();
        }
        self
    }

    fn stretch(&self, name: &str) -> u8 {
        self.ilk
            .insert_stretch(StretchRecord {
                id: 0,
                name: name.into(),
                kind: StretchKind::OneWaySingleTrack,
            })
            .unwrap()
            .id
    }

    /// Insert a train and put it online behind a recording link.
    fn online_train(&self, name: &str) -> (TrainId, Arc<MockLink>) {
        let record = self
            .ilk
            .insert_train(TrainRecord {
                name: name.into(),
                slow_speed: SLOW,
                half_speed: HALF,
                fast_speed: FAST,
                ..Default::default()
            })
            .unwrap();
        let link = Arc::new(MockLink::new());
        self.ilk.connect(record.access_key, link.clone()).unwrap();
        (record.id, link)
    }

    fn occupant(&self, key: SignalKey) -> Option<Occupant> {
        self.ilk.signal(key).unwrap().zone.occupant()
    }
}

fn key(id: u8) -> SignalKey {
    SignalKey::new(1, id)
}

async fn wait_for(link: &MockLink, command: TrainCommand, count: usize) -> Vec<TrainCommand> {
    tokio::time::timeout(
        Duration::from_secs(2),
        link.wait_until(|sent| sent.iter().filter(|c| **c == command).count() >= count),
    )
    .await
    .expect("train never received the command")
}

async fn wait_until_free(layout: &Layout, key: SignalKey) {
    let signal = layout.ilk.signal(key).unwrap();
    tokio::time::timeout(Duration::from_secs(2), signal.zone.wait_until_free())
        .await
        .expect("zone never freed");
}

// ============================================================================
// Running
// ============================================================================

#[tokio::test]
async fn jump_start_sends_the_zone_speed() {
    let layout = Layout::new().line(4);
    let (t, link) = layout.online_train("T");

    layout.ilk.jump_start(t, key(1)).unwrap();
    wait_for(&link, TrainCommand::Forward(FAST), 1).await;

    let view = layout.ilk.train(t).unwrap().view();
    assert!(view.started);
    assert_eq!(view.last_signal, Some(key(1)));
    assert_eq!(view.last_signal_passed_aspect, Some(SignalAspect::Clear));
    assert_eq!(layout.occupant(key(1)), Some(Occupant::Train(t)));
}

#[tokio::test]
async fn reed_switch_moves_the_train_on() {
    let layout = Layout::new().line(4);
    let (t, link) = layout.online_train("T");

    layout.ilk.jump_start(t, key(1)).unwrap();
    wait_for(&link, TrainCommand::Forward(FAST), 1).await;

    layout.ilk.reed_switch_triggered(t);
    wait_for(&link, TrainCommand::Forward(FAST), 2).await;

    assert_eq!(layout.occupant(key(1)), None);
    assert_eq!(layout.occupant(key(2)), Some(Occupant::Train(t)));
}

#[tokio::test]
async fn preliminary_caution_keeps_zone_speed() {
    let layout = Layout::new().line(4);
    let (a, link_a) = layout.online_train("A");
    let (b, link_b) = layout.online_train("B");

    layout.ilk.jump_start(a, key(3)).unwrap();
    wait_for(&link_a, TrainCommand::Forward(FAST), 1).await;

    // Two zones behind A.
    layout.ilk.jump_start(b, key(1)).unwrap();
    wait_for(&link_b, TrainCommand::Forward(FAST), 1).await;
    assert_eq!(
        layout.ilk.train(b).unwrap().view().last_signal_passed_aspect,
        Some(SignalAspect::PreliminaryCaution)
    );
    assert!(!link_b.commands().contains(&TrainCommand::Forward(HALF)));
}

#[tokio::test]
async fn end_of_line_holds_the_train() {
    let layout = Layout::new().line(2);
    let (t, link) = layout.online_train("T");

    layout.ilk.jump_start(t, key(1)).unwrap();
    wait_for(&link, TrainCommand::Forward(FAST), 1).await;
    layout.ilk.reed_switch_triggered(t);
    wait_for(&link, TrainCommand::FastStop, 1).await;

    let view = layout.ilk.train(t).unwrap().view();
    assert!(!view.started);
    assert_eq!(view.last_signal, Some(key(2)));
    assert_eq!(layout.occupant(key(2)), Some(Occupant::Train(t)));

    // A held train ignores further reed switches.
    layout.ilk.reed_switch_triggered(t);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(link.last(), Some(TrainCommand::FastStop));
}

// ============================================================================
// Waiting at Danger
// ============================================================================

#[tokio::test]
async fn blocked_train_proceeds_when_the_zone_ahead_frees() {
    let layout = Layout::new().line(4);
    let (t, link) = layout.online_train("T");
    layout.ilk.force_red(key(2)).unwrap();

    layout.ilk.jump_start(t, key(1)).unwrap();
    wait_for(&link, TrainCommand::FastStop, 1).await;
    assert_eq!(
        layout.ilk.train(t).unwrap().view().last_signal_passed_aspect,
        Some(SignalAspect::Danger)
    );

    layout.ilk.unforce_red(key(2)).unwrap();
    let sent = wait_for(&link, TrainCommand::Forward(FAST), 1).await;
    assert_eq!(sent, vec![TrainCommand::FastStop, TrainCommand::Forward(FAST)]);
}

#[tokio::test]
async fn following_train_waits_for_the_leader() {
    let layout = Layout::new().line(5);
    let (lead, lead_link) = layout.online_train("Lead");
    let (follow, follow_link) = layout.online_train("Follow");

    layout.ilk.jump_start(lead, key(2)).unwrap();
    wait_for(&lead_link, TrainCommand::Forward(FAST), 1).await;
    layout.ilk.jump_start(follow, key(1)).unwrap();
    wait_for(&follow_link, TrainCommand::FastStop, 1).await;

    layout.ilk.reed_switch_triggered(lead);
    wait_until_free(&layout, key(2)).await;
    wait_for(&follow_link, TrainCommand::Forward(FAST), 1).await;

    assert_eq!(layout.occupant(key(1)), Some(Occupant::Train(follow)));
    assert_eq!(layout.occupant(key(3)), Some(Occupant::Train(lead)));
}

#[tokio::test]
async fn stop_aborts_a_waiting_train() {
    let layout = Layout::new().line(4);
    let (t, link) = layout.online_train("T");
    layout.ilk.force_red(key(2)).unwrap();

    layout.ilk.jump_start(t, key(1)).unwrap();
    wait_for(&link, TrainCommand::FastStop, 1).await;

    layout.ilk.stop_train(t).unwrap();
    wait_for(&link, TrainCommand::FastStop, 2).await;
    assert_eq!(layout.occupant(key(1)), None);

    layout.ilk.unforce_red(key(2)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!link.commands().contains(&TrainCommand::Forward(FAST)));
    assert!(!layout.ilk.train(t).unwrap().view().started);
}

#[tokio::test]
async fn disconnect_releases_the_zone() {
    let layout = Layout::new().line(3);
    let (t, link) = layout.online_train("T");

    layout.ilk.jump_start(t, key(1)).unwrap();
    wait_for(&link, TrainCommand::Forward(FAST), 1).await;

    layout.ilk.disconnect(t);
    let view = layout.ilk.train(t).unwrap().view();
    assert!(!view.online);
    assert!(!view.started);
    assert_eq!(layout.occupant(key(1)), None);
}

// ============================================================================
// Stop at signal
// ============================================================================

#[tokio::test]
async fn stop_marker_holds_the_train_in_its_zone() {
    let layout = Layout::new().line(4);
    let (t, link) = layout.online_train("T");

    layout.ilk.jump_start(t, key(1)).unwrap();
    wait_for(&link, TrainCommand::Forward(FAST), 1).await;
    layout
        .ilk
        .stop_train_at_signal(TrainAtSignal {
            train_id: t,
            stretch_id: 1,
            signal_id: 2,
        })
        .unwrap();
    assert!(layout.ilk.train(t).unwrap().view().stop_at_signal);

    layout.ilk.reed_switch_triggered(t);
    wait_for(&link, TrainCommand::FastStop, 1).await;

    let view = layout.ilk.train(t).unwrap().view();
    assert!(!view.started);
    assert!(!view.stop_at_signal);
    assert_eq!(layout.occupant(key(2)), Some(Occupant::Train(t)));
    assert_eq!(layout.occupant(key(1)), None);
}

#[tokio::test]
async fn cancelled_marker_lets_the_train_pass() {
    let layout = Layout::new().line(4);
    let (t, link) = layout.online_train("T");

    layout.ilk.jump_start(t, key(1)).unwrap();
    wait_for(&link, TrainCommand::Forward(FAST), 1).await;
    layout
        .ilk
        .stop_train_at_signal(TrainAtSignal {
            train_id: t,
            stretch_id: 1,
            signal_id: 2,
        })
        .unwrap();
    layout.ilk.cancel_stop_at_signal(t).unwrap();

    layout.ilk.reed_switch_triggered(t);
    wait_for(&link, TrainCommand::Forward(FAST), 2).await;
    assert!(layout.ilk.train(t).unwrap().view().started);
}

// ============================================================================
// Points
// ============================================================================

/// Main line 1/1..1/3 with a splitter at 1/2 diverging to 2/1..2/2.
fn junction() -> Layout {
    let layout = Layout::new();
    let main = layout.stretch("main");
    let branch = layout.stretch("branch");
    for (stretch_id, name) in [(branch, "B1"), (branch, "B2"), (main, "M1")] {
        layout
            .ilk
            .insert_signal(SignalRecord {
                stretch_id,
                name: name.into(),
                speed_limit: SpeedLimit::Fast,
                ..Default::default()
            })
            .unwrap();
    }
    layout
        .ilk
        .insert_signal(SignalRecord {
            stretch_id: main,
            name: "M2".into(),
            speed_limit: SpeedLimit::Fast,
            is_switch: true,
            splitter: Some(true),
            stretch_detour_id: Some(branch),
            signal_detour_id: Some(1),
            ..Default::default()
        })
        .unwrap();
    layout
        .ilk
        .insert_signal(SignalRecord {
            stretch_id: main,
            name: "M3".into(),
            speed_limit: SpeedLimit::Fast,
            ..Default::default()
        })
        .unwrap();
    layout
}

#[tokio::test]
async fn train_actuates_queued_points_then_takes_the_detour() {
    let layout = junction();
    let (t, link) = layout.online_train("T");
    layout.ilk.switch_points(key(2), false).unwrap();

    layout.ilk.jump_start(t, key(1)).unwrap();
    wait_for(&link, TrainCommand::Forward(FAST), 1).await;

    layout.ilk.reed_switch_triggered(t);
    let sent = wait_for(&link, TrainCommand::SwitchDetour, 1).await;
    assert_eq!(
        sent,
        vec![
            TrainCommand::Forward(FAST),
            TrainCommand::FastStop,
            TrainCommand::SwitchDetour
        ]
    );
    assert!(layout.ilk.signal(key(2)).unwrap().view().currently_switching);

    layout.ilk.switch_result(t, true);
    // Diverging runs at caution, capped by the slow speed.
    wait_for(&link, TrainCommand::Forward(SLOW), 1).await;

    let view = layout.ilk.signal(key(2)).unwrap().view();
    assert!(!view.passthrough);
    assert!(!view.queued_for_switching);

    layout.ilk.reed_switch_triggered(t);
    tokio::time::timeout(Duration::from_secs(2), async {
        while layout.occupant(SignalKey::new(2, 1)) != Some(Occupant::Train(t)) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("train never reached the branch");
    assert_eq!(layout.occupant(key(2)), None);
}

#[tokio::test]
async fn failed_actuation_is_retried() {
    let layout = junction();
    let (t, link) = layout.online_train("T");
    layout.ilk.switch_points(key(2), false).unwrap();

    layout.ilk.jump_start(t, key(2)).unwrap();
    wait_for(&link, TrainCommand::SwitchDetour, 1).await;

    layout.ilk.switch_result(t, false);
    wait_for(&link, TrainCommand::SwitchDetour, 2).await;
    assert_eq!(layout.ilk.train(t).unwrap().view().switch_attempts, 2);

    layout.ilk.switch_result(t, true);
    wait_for(&link, TrainCommand::Forward(SLOW), 1).await;
}

#[tokio::test]
async fn second_train_claims_the_points_zone_after_the_first_leaves() {
    let layout = junction();
    let (a, link_a) = layout.online_train("A");
    let (b, link_b) = layout.online_train("B");
    layout.ilk.switch_points(key(2), false).unwrap();

    layout.ilk.jump_start(a, key(2)).unwrap();
    wait_for(&link_a, TrainCommand::SwitchDetour, 1).await;
    layout.ilk.jump_start(b, key(2)).unwrap();
    wait_for(&link_b, TrainCommand::FastStop, 1).await;

    layout.ilk.switch_result(a, true);
    wait_for(&link_a, TrainCommand::Forward(SLOW), 1).await;
    layout.ilk.reed_switch_triggered(a);

    // B waited on the zone, not the points, and takes it once A is gone.
    tokio::time::timeout(Duration::from_secs(2), async {
        while layout.occupant(key(2)) != Some(Occupant::Train(b)) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("second train never claimed the points zone");
    assert_eq!(layout.occupant(SignalKey::new(2, 1)), Some(Occupant::Train(a)));

    // A runs to the end of the branch, freeing the zone B waits for.
    layout.ilk.reed_switch_triggered(a);
    wait_for(&link_b, TrainCommand::Forward(SLOW), 1).await;
    assert!(!link_b.commands().contains(&TrainCommand::SwitchDetour));
}

#[tokio::test]
async fn halted_train_hands_moving_points_to_the_next_train() {
    let layout = junction();
    let (a, link_a) = layout.online_train("A");
    let (b, link_b) = layout.online_train("B");
    layout.ilk.switch_points(key(2), false).unwrap();

    layout.ilk.jump_start(a, key(2)).unwrap();
    wait_for(&link_a, TrainCommand::SwitchDetour, 1).await;
    layout.ilk.disconnect(a);

    let view = layout.ilk.signal(key(2)).unwrap().view();
    assert!(view.queued_for_switching);
    assert!(!view.currently_switching);
    assert_eq!(layout.occupant(key(2)), None);

    layout.ilk.jump_start(b, key(2)).unwrap();
    wait_for(&link_b, TrainCommand::SwitchDetour, 1).await;
    assert_eq!(layout.ilk.train(b).unwrap().view().switch_attempts, 1);

    layout.ilk.switch_result(b, true);
    wait_for(&link_b, TrainCommand::Forward(SLOW), 1).await;
    assert!(!layout.ilk.signal(key(2)).unwrap().view().passthrough);
}

#[tokio::test]
async fn stopping_the_actuating_train_requeues_the_points() {
    let layout = junction();
    let (t, link) = layout.online_train("T");
    layout.ilk.switch_points(key(2), false).unwrap();

    layout.ilk.jump_start(t, key(2)).unwrap();
    wait_for(&link, TrainCommand::SwitchDetour, 1).await;
    layout.ilk.stop_train(t).unwrap();

    let view = layout.ilk.signal(key(2)).unwrap().view();
    assert!(view.queued_for_switching);
    assert!(!view.currently_switching);

    // A late report from the halted actuation changes nothing.
    layout.ilk.switch_result(t, true);
    assert!(layout.ilk.signal(key(2)).unwrap().view().passthrough);

    layout.ilk.jump_start(t, key(2)).unwrap();
    wait_for(&link, TrainCommand::SwitchDetour, 2).await;
}

#[tokio::test]
async fn queued_points_are_actuated_once_the_branch_frees() {
    let layout = junction();
    let (t, link) = layout.online_train("T");
    let branch = SignalKey::new(2, 1);
    layout.ilk.force_red(branch).unwrap();
    layout.ilk.switch_points(key(2), false).unwrap();

    layout.ilk.jump_start(t, key(2)).unwrap();
    wait_for(&link, TrainCommand::FastStop, 1).await;
    assert!(!link.commands().contains(&TrainCommand::SwitchDetour));

    layout.ilk.unforce_red(branch).unwrap();
    let sent = wait_for(&link, TrainCommand::SwitchDetour, 1).await;
    assert_eq!(sent.last(), Some(&TrainCommand::SwitchDetour));

    layout.ilk.switch_result(t, true);
    wait_for(&link, TrainCommand::Forward(SLOW), 1).await;
}

// ============================================================================
// Mergers
// ============================================================================

/// Main line 1/1..1/4 with a merger at 1/3 joined from branch 2/1..2/2.
fn merge() -> Layout {
    let layout = Layout::new();
    let main = layout.stretch("main");
    let branch = layout.stretch("branch");
    for (stretch_id, name) in [(branch, "B1"), (branch, "B2"), (main, "M1"), (main, "M2")] {
        layout
            .ilk
            .insert_signal(SignalRecord {
                stretch_id,
                name: name.into(),
                speed_limit: SpeedLimit::Fast,
                ..Default::default()
            })
            .unwrap();
    }
    layout
        .ilk
        .insert_signal(SignalRecord {
            stretch_id: main,
            name: "M3".into(),
            speed_limit: SpeedLimit::Fast,
            is_switch: true,
            splitter: Some(false),
            stretch_detour_id: Some(branch),
            signal_detour_id: Some(2),
            ..Default::default()
        })
        .unwrap();
    layout
        .ilk
        .insert_signal(SignalRecord {
            stretch_id: main,
            name: "M4".into(),
            speed_limit: SpeedLimit::Fast,
            ..Default::default()
        })
        .unwrap();
    layout
}

fn passed_aspect(layout: &Layout, train: TrainId) -> Option<SignalAspect> {
    layout.ilk.train(train).unwrap().view().last_signal_passed_aspect
}

#[tokio::test]
async fn aligned_merger_lets_the_main_line_through() {
    let layout = merge();
    let (t, link) = layout.online_train("T");

    layout.ilk.jump_start(t, key(2)).unwrap();
    wait_for(&link, TrainCommand::Forward(FAST), 1).await;
    layout.ilk.reed_switch_triggered(t);
    wait_for(&link, TrainCommand::Forward(FAST), 2).await;

    assert_eq!(layout.occupant(key(3)), Some(Occupant::Train(t)));
    assert_eq!(passed_aspect(&layout, t), Some(SignalAspect::Clear));
    assert!(!link.commands().contains(&TrainCommand::FastStop));
}

#[tokio::test]
async fn branch_train_realigns_the_merger_to_the_detour() {
    let layout = merge();
    let (t, link) = layout.online_train("T");

    layout.ilk.jump_start(t, SignalKey::new(2, 2)).unwrap();
    wait_for(&link, TrainCommand::Forward(FAST), 1).await;
    layout.ilk.reed_switch_triggered(t);

    let sent = wait_for(&link, TrainCommand::SwitchDetour, 1).await;
    assert_eq!(
        sent,
        vec![
            TrainCommand::Forward(FAST),
            TrainCommand::FastStop,
            TrainCommand::SwitchDetour
        ]
    );
    assert_eq!(passed_aspect(&layout, t), Some(SignalAspect::Danger));
    assert_eq!(layout.occupant(key(3)), Some(Occupant::Train(t)));

    layout.ilk.switch_result(t, true);
    wait_for(&link, TrainCommand::Forward(SLOW), 1).await;
    assert_eq!(passed_aspect(&layout, t), Some(SignalAspect::Caution));
    assert!(!layout.ilk.signal(key(3)).unwrap().view().passthrough);
}

#[tokio::test]
async fn main_line_train_realigns_the_merger_to_the_through_route() {
    let layout = merge();
    let (a, link_a) = layout.online_train("A");
    let (b, link_b) = layout.online_train("B");

    // A comes off the branch and leaves the merger set to the detour.
    layout.ilk.jump_start(a, SignalKey::new(2, 2)).unwrap();
    wait_for(&link_a, TrainCommand::Forward(FAST), 1).await;
    layout.ilk.reed_switch_triggered(a);
    wait_for(&link_a, TrainCommand::SwitchDetour, 1).await;
    layout.ilk.switch_result(a, true);
    wait_for(&link_a, TrainCommand::Forward(SLOW), 1).await;
    layout.ilk.stop_train(a).unwrap();
    assert!(!layout.ilk.signal(key(3)).unwrap().view().passthrough);

    layout.ilk.jump_start(b, key(2)).unwrap();
    wait_for(&link_b, TrainCommand::Forward(FAST), 1).await;
    layout.ilk.reed_switch_triggered(b);

    let sent = wait_for(&link_b, TrainCommand::SwitchPassthrough, 1).await;
    assert_eq!(
        sent,
        vec![
            TrainCommand::Forward(FAST),
            TrainCommand::FastStop,
            TrainCommand::SwitchPassthrough
        ]
    );
    assert_eq!(passed_aspect(&layout, b), Some(SignalAspect::Danger));

    layout.ilk.switch_result(b, true);
    wait_for(&link_b, TrainCommand::Forward(FAST), 2).await;
    assert_eq!(passed_aspect(&layout, b), Some(SignalAspect::Clear));
    assert!(layout.ilk.signal(key(3)).unwrap().view().passthrough);
}
