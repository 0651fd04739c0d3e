//! Operator channel: a WebSocket speaking `VERB:RESOURCE$payload` frames.
//!
//! [`dispatch`] is transport-agnostic and maps one parsed request frame to
//! its reply. [`ws_handler`] upgrades the connection, greets the client with
//! `true`, then interleaves replies with pushed notifications.
//!
//! | Request | Payload | Reply |
//! |---------|---------|-------|
//! | `GET:TRAIN` / `STRETCH` / `SIGNAL` | empty | array of views |
//! | `GET:EVENT_LOG` | `EventLogQuery` or empty | array of events |
//! | `INSERT:*` | record without id | `OpResult`, new id in `extraData` |
//! | `UPDATE:*` | record | `OpResult` |
//! | `DELETE:TRAIN` / `STRETCH` | `{"id":..}` | `OpResult` |
//! | `DELETE:SIGNAL` | `{"stretchId":..,"id":..}` | `OpResult` |
//! | `ACTION:MANUALLY_JUMP_START_TRAIN` | `{"trainId":..,"stretchId":..,"signalId":..}` | `OpResult` |
//! | `ACTION:MANUALLY_STOP_TRAIN` | train id | `OpResult` |
//! | `ACTION:MANUALLY_STOP_TRAIN_AT_SIGNAL` | as jump start | `OpResult` |
//! | `ACTION:MANUALLY_CANCEL_STOP_TRAIN_AT_SIGNAL` | train id | `OpResult` |
//! | `ACTION:SWITCH_PASSTHROUGH` / `SWITCH_DETOUR` / `FORCE_RED` / `UNFORCE_RED` | `{"stretchId":..,"id":..}` | `OpResult` |

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use super::api::{decode, decode_or_default, op_result, RecordId};
use super::web::AppState;
use crate::error::OpResult;
use crate::event_log::EventLogQuery;
use crate::interlocking::Interlocking;
use crate::messages::{format_frame, parse_frame, Frame, Resource, TrainAtSignal, Verb};
use crate::topology::{SignalKey, SignalRecord, StretchRecord};
use crate::train::{TrainId, TrainRecord};

fn reply<T: Serialize>(frame: &Frame<'_>, body: &T) -> Option<String> {
    match serde_json::to_string(body) {
        Ok(json) => Some(format_frame(frame.verb, frame.resource, &json)),
        Err(e) => {
            warn!("could not encode {} reply: {e}", frame.resource.as_str());
            None
        }
    }
}

fn no_extra<T>(_: T) -> Vec<String> {
    Vec::new()
}

/// Handle one request frame; `None` when the frame gets no reply.
pub fn dispatch(interlocking: &Interlocking, frame: &Frame<'_>) -> Option<String> {
    let payload = frame.payload;
    let result: OpResult = match (frame.verb, frame.resource) {
        (Verb::Get, Resource::Train) => return reply(frame, &interlocking.trains()),
        (Verb::Get, Resource::Stretch) => return reply(frame, &interlocking.stretches()),
        (Verb::Get, Resource::Signal) => return reply(frame, &interlocking.signals()),
        (Verb::Get, Resource::EventLog) => {
            let events = decode_or_default::<EventLogQuery>(payload)
                .and_then(|query| interlocking.events(&query));
            return match events {
                Ok(events) => reply(frame, &events),
                Err(e) => reply(frame, &OpResult::err(&e)),
            };
        }

        (Verb::Insert, Resource::Train) => op_result(
            decode::<TrainRecord>(payload).and_then(|r| interlocking.insert_train(r)),
            |r| vec![r.id.to_string()],
        ),
        (Verb::Update, Resource::Train) => op_result(
            decode::<TrainRecord>(payload).and_then(|r| interlocking.update_train(r)),
            no_extra,
        ),
        (Verb::Delete, Resource::Train) => op_result(
            decode::<RecordId>(payload).and_then(|r| interlocking.delete_train(r.id)),
            no_extra,
        ),

        (Verb::Insert, Resource::Stretch) => op_result(
            decode::<StretchRecord>(payload).and_then(|r| interlocking.insert_stretch(r)),
            |r| vec![r.id.to_string()],
        ),
        (Verb::Update, Resource::Stretch) => op_result(
            decode::<StretchRecord>(payload).and_then(|r| interlocking.update_stretch(r)),
            no_extra,
        ),
        (Verb::Delete, Resource::Stretch) => op_result(
            decode::<RecordId>(payload).and_then(|r| interlocking.delete_stretch(r.id)),
            no_extra,
        ),

        (Verb::Insert, Resource::Signal) => op_result(
            decode::<SignalRecord>(payload).and_then(|r| interlocking.insert_signal(r)),
            |r| vec![r.stretch_id.to_string(), r.id.to_string()],
        ),
        (Verb::Update, Resource::Signal) => op_result(
            decode::<SignalRecord>(payload).and_then(|r| interlocking.update_signal(r)),
            no_extra,
        ),
        (Verb::Delete, Resource::Signal) => op_result(
            decode::<SignalKey>(payload).and_then(|k| interlocking.delete_signal(k)),
            no_extra,
        ),

        (Verb::Action, Resource::ManuallyJumpStartTrain) => op_result(
            decode::<TrainAtSignal>(payload)
                .and_then(|r| interlocking.jump_start(r.train_id, r.signal())),
            no_extra,
        ),
        (Verb::Action, Resource::ManuallyStopTrain) => op_result(
            decode::<TrainId>(payload).and_then(|id| interlocking.stop_train(id)),
            no_extra,
        ),
        (Verb::Action, Resource::ManuallyStopTrainAtSignal) => op_result(
            decode::<TrainAtSignal>(payload).and_then(|r| interlocking.stop_train_at_signal(r)),
            no_extra,
        ),
        (Verb::Action, Resource::ManuallyCancelStopTrainAtSignal) => op_result(
            decode::<TrainId>(payload).and_then(|id| interlocking.cancel_stop_at_signal(id)),
            no_extra,
        ),
        (Verb::Action, Resource::SwitchPassthrough) => op_result(
            decode::<SignalKey>(payload).and_then(|k| interlocking.switch_points(k, true)),
            no_extra,
        ),
        (Verb::Action, Resource::SwitchDetour) => op_result(
            decode::<SignalKey>(payload).and_then(|k| interlocking.switch_points(k, false)),
            no_extra,
        ),
        (Verb::Action, Resource::ForceRed) => op_result(
            decode::<SignalKey>(payload).and_then(|k| interlocking.force_red(k)),
            no_extra,
        ),
        (Verb::Action, Resource::UnforceRed) => op_result(
            decode::<SignalKey>(payload).and_then(|k| interlocking.unforce_red(k)),
            no_extra,
        ),

        (verb, resource) => {
            debug!("ignoring {}:{}", verb.as_str(), resource.as_str());
            return None;
        }
    };
    reply(frame, &result)
}

/// GET / - Upgrade to the operator channel.
///
/// A message over the size limit ends that client's session.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| operator_session(socket, state))
}

async fn operator_session(mut socket: WebSocket, state: Arc<AppState>) {
    let mut notifications = state.interlocking.notifier().subscribe();
    if socket.send(Message::Text("true".into())).await.is_err() {
        return;
    }
    info!("operator client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("operator socket error: {e}");
                        break;
                    }
                };
                let Some(frame) = parse_frame(&text) else {
                    debug!("ignoring unparseable operator frame");
                    continue;
                };
                if let Some(answer) = dispatch(&state.interlocking, &frame) {
                    if socket.send(Message::Text(answer)).await.is_err() {
                        break;
                    }
                }
            }
            notification = notifications.recv() => match notification {
                Ok(notification) => {
                    if socket.send(Message::Text(notification.to_frame())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("operator client lagging, skipped {skipped} notifications");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    info!("operator client disconnected");
}
