//! Request decoding and result shaping shared by the operator channel and
//! the administrative HTTP endpoints.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{InterlockError, OpResult};

/// Payload naming a record by id. Other fields are ignored, so a full
/// record works too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RecordId {
    /// Record id.
    pub id: u8,
}

/// Decode a JSON payload, mapping failures to JSON_COULD_NOT_UNMARSHAL.
pub fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, InterlockError> {
    serde_json::from_str(payload).map_err(|e| InterlockError::Malformed(e.to_string()))
}

/// Decode a payload that may be empty, defaulting when it is.
pub fn decode_or_default<T: DeserializeOwned + Default>(payload: &str) -> Result<T, InterlockError> {
    if payload.trim().is_empty() {
        Ok(T::default())
    } else {
        decode(payload)
    }
}

/// Shape an operation's outcome; `extra` turns a success value into the
/// diagnostic payload (e.g. an assigned id).
pub fn op_result<T>(
    result: Result<T, InterlockError>,
    extra: impl FnOnce(T) -> Vec<String>,
) -> OpResult {
    match result {
        Ok(value) => OpResult::ok_with(extra(value)),
        Err(e) => OpResult::err(&e),
    }
}

// Axum integration: return OpResult directly from handlers
impl IntoResponse for OpResult {
    fn into_response(self) -> Response {
        let status = if self.ok {
            StatusCode::OK
        } else {
            StatusCode::BAD_REQUEST
        };
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::train::TrainRecord;

    #[test]
    fn decode_failure_is_malformed() {
        let err = decode::<TrainRecord>("{\"name\":").unwrap_err();
        assert_eq!(err.code(), ErrorCode::JsonCouldNotUnmarshal);
    }

    #[test]
    fn record_id_ignores_other_fields() {
        let id: RecordId = decode(r#"{"id":4,"name":"T4","slowSpeed":1}"#).unwrap();
        assert_eq!(id.id, 4);
    }

    #[test]
    fn empty_payload_defaults() {
        let query: crate::event_log::EventLogQuery = decode_or_default("  ").unwrap();
        assert_eq!(query, Default::default());
    }

    #[test]
    fn op_result_carries_extra_data() {
        let result = op_result(Ok(7u8), |id| vec![id.to_string()]);
        assert!(result.ok);
        assert_eq!(result.extra_data, vec!["7".to_string()]);

        let failed = op_result::<()>(Err(InterlockError::TrainNotOnline(1)), |_| Vec::new());
        assert_eq!(failed.error_code, ErrorCode::TrainNotOnline);
    }
}
