//! Error types and the structured result returned to operator clients.
//!
//! Administrative operations never fail silently: every one of them returns
//! an [`OpResult`] to its caller. Internally they produce [`InterlockError`],
//! which carries the numeric [`ErrorCode`] operator clients switch on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topology::SignalKey;

/// Numeric error classification sent to operator clients.
///
/// The numbering is part of the wire contract and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum ErrorCode {
    /// No error.
    Ok = 0,
    /// The request payload was not valid JSON for the expected type.
    JsonCouldNotUnmarshal = 1,
    /// Field constraints were violated.
    DataNotValid = 2,
    /// The store rejected a write.
    InternalDatabaseError = 3,
    /// A referenced train, stretch or signal does not exist.
    CouldNotFindRecord = 4,
    /// The train is moving or owns a zone.
    TrainNotStopped = 5,
    /// The train has not been started.
    TrainNotStarted = 6,
    /// The train has no hardware connection.
    TrainNotOnline = 7,
    /// No stop-at-signal marker is set on the train.
    TrainNotStopAtSignal = 8,
    /// The zone is occupied or held at Danger.
    ZoneOccupied = 9,
    /// The points are not a switch, already in place, or busy.
    SwitchNotReady = 10,
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Ok,
            1 => Self::JsonCouldNotUnmarshal,
            2 => Self::DataNotValid,
            3 => Self::InternalDatabaseError,
            4 => Self::CouldNotFindRecord,
            5 => Self::TrainNotStopped,
            6 => Self::TrainNotStarted,
            7 => Self::TrainNotOnline,
            8 => Self::TrainNotStopAtSignal,
            9 => Self::ZoneOccupied,
            10 => Self::SwitchNotReady,
            other => return Err(format!("unknown error code {other}")),
        })
    }
}

/// Failure of a core or administrative operation.
#[derive(Debug, Error)]
pub enum InterlockError {
    /// Payload could not be decoded.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Field constraints violated; each entry names one offending field.
    #[error("invalid data: {}", .0.join(", "))]
    Invalid(Vec<String>),

    /// Referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Train is online but moving, or owns a zone.
    #[error("train {0} is not stopped")]
    TrainNotStopped(u8),

    /// Train was never started.
    #[error("train {0} is not started")]
    TrainNotStarted(u8),

    /// Train has no hardware connection.
    #[error("train {0} is not online")]
    TrainNotOnline(u8),

    /// No stop-at-signal marker to cancel.
    #[error("train {0} has no pending stop at a signal")]
    NoStopAtSignal(u8),

    /// Zone occupied by a train or forced to Danger.
    #[error("zone {0} is occupied")]
    ZoneOccupied(SignalKey),

    /// Points cannot take the request in their current state.
    #[error("points at {0}: {1}")]
    SwitchNotReady(SignalKey, &'static str),

    /// Persistence failed.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl InterlockError {
    /// Wire classification of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed(_) => ErrorCode::JsonCouldNotUnmarshal,
            Self::Invalid(_) => ErrorCode::DataNotValid,
            Self::NotFound(_) => ErrorCode::CouldNotFindRecord,
            Self::TrainNotStopped(_) => ErrorCode::TrainNotStopped,
            Self::TrainNotStarted(_) => ErrorCode::TrainNotStarted,
            Self::TrainNotOnline(_) => ErrorCode::TrainNotOnline,
            Self::NoStopAtSignal(_) => ErrorCode::TrainNotStopAtSignal,
            Self::ZoneOccupied(_) => ErrorCode::ZoneOccupied,
            Self::SwitchNotReady(..) => ErrorCode::SwitchNotReady,
            Self::Store(_) => ErrorCode::InternalDatabaseError,
        }
    }

    fn extra_data(&self) -> Vec<String> {
        match self {
            Self::Invalid(fields) => fields.clone(),
            Self::NotFound(what) => vec![what.clone()],
            Self::ZoneOccupied(key) | Self::SwitchNotReady(key, _) => {
                vec![key.stretch_id.to_string(), key.id.to_string()]
            }
            _ => Vec::new(),
        }
    }
}

/// Failure of the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Store refused the write for another reason.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure on a hardware link or bridge connection.
///
/// Any of these closes the one connection it occurred on.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Socket or device failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload does not fit the one-byte length prefix.
    #[error("frame of {0} bytes exceeds the 255 byte limit")]
    FrameTooLong(usize),

    /// Payload is empty where a code was expected.
    #[error("empty frame")]
    EmptyFrame,

    /// Unrecognized train event code.
    #[error("unknown event code {0}")]
    UnknownEvent(u8),

    /// Unrecognized controller command code.
    #[error("unknown command code {0}")]
    UnknownCommand(u8),

    /// Authentication frame is not four bytes.
    #[error("access key frame has {0} bytes, expected 4")]
    BadAccessKey(usize),

    /// No train has this access key.
    #[error("unknown access key")]
    UnknownTrain,

    /// The train already has a live connection.
    #[error("train {0} is already online")]
    AlreadyOnline(u8),

    /// The connection's writer is gone.
    #[error("link closed")]
    Closed,
}

/// Structured result of an administrative operation.
///
/// Serialized as `{"ok":..,"errorCode":..,"extraData":[..],"errorMessage":".."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpResult {
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Classification of the failure, [`ErrorCode::Ok`] on success.
    pub error_code: ErrorCode,
    /// Diagnostic payload (offending fields, ids).
    #[serde(default)]
    pub extra_data: Vec<String>,
    /// Human-readable message, empty on success.
    #[serde(default)]
    pub error_message: String,
}

impl OpResult {
    /// Successful result with no payload.
    pub fn ok() -> Self {
        Self {
            ok: true,
            error_code: ErrorCode::Ok,
            extra_data: Vec::new(),
            error_message: String::new(),
        }
    }

    /// Successful result carrying diagnostic data (e.g. an assigned id).
    pub fn ok_with(extra_data: Vec<String>) -> Self {
        Self {
            extra_data,
            ..Self::ok()
        }
    }

    /// Failed result from an error.
    pub fn err(error: &InterlockError) -> Self {
        Self {
            ok: false,
            error_code: error.code(),
            extra_data: error.extra_data(),
            error_message: error.to_string(),
        }
    }
}

impl From<Result<(), InterlockError>> for OpResult {
    fn from(result: Result<(), InterlockError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::err(&e),
        }
    }
}

impl From<InterlockError> for OpResult {
    fn from(error: InterlockError) -> Self {
        Self::err(&error)
    }
}
