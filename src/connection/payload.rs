//! Wire payload models.
//!
//! Data responses look like
//! `{"buffer": {"accX": {"size": 0, "updateMode": "partial", "buffer": [0.1, null, 0.3]}}, "status": {...}}`;
//! only the per-buffer `buffer` arrays matter here. Control responses are a single
//! `result` flag, but the device writes them with `=` instead of `:`.

use crate::data::Buffer;
use crate::error::{SyncError, SyncResult};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
struct DataPayload {
    buffer: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct BufferPayload {
    buffer: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct ControlPayload {
    result: bool,
}

/// Decode a `/get` response into one [`Buffer`] per entry, in payload order.
///
/// `null` samples (how the device encodes NaN) decode to `f64::NAN`.
pub(crate) fn decode_buffers(body: &str) -> SyncResult<Vec<Buffer>> {
    let payload: DataPayload = serde_json::from_str(body)
        .map_err(|e| SyncError::connection_with("malformed data payload", e))?;

    payload
        .buffer
        .into_iter()
        .map(|(name, value)| {
            let entry: BufferPayload = serde_json::from_value(value).map_err(|e| {
                SyncError::connection_with(format!("malformed data for buffer '{name}'"), e)
            })?;
            let samples = entry
                .buffer
                .into_iter()
                .map(|sample| sample.unwrap_or(f64::NAN))
                .collect();
            Ok(Buffer::new(name, samples))
        })
        .collect()
}

/// Make a control response parseable as JSON.
pub(crate) fn repair_control_payload(body: &str) -> String {
    body.replace('=', ":")
}

/// Decode the `result` flag of a `/control` response.
pub(crate) fn decode_control_result(body: &str) -> SyncResult<bool> {
    let repaired = repair_control_payload(body);
    let payload: ControlPayload = serde_json::from_str(&repaired)
        .map_err(|e| SyncError::connection_with("malformed control payload", e))?;
    Ok(payload.result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_buffers_keeps_values_and_order() {
        let body = r#"{
            "buffer": {
                "time": {"size": 0, "updateMode": "partial", "buffer": [0.5, 0.25, 0.5]},
                "accX": {"size": 0, "updateMode": "partial", "buffer": [3, 1, 2]}
            },
            "status": {"measuring": true}
        }"#;

        let buffers = decode_buffers(body).unwrap();

        assert_eq!(buffers.len(), 2);
        assert_eq!(buffers[0].name(), "time");
        assert_eq!(buffers[0].data(), &[0.5, 0.25, 0.5]);
        assert_eq!(buffers[1].name(), "accX");
        assert_eq!(buffers[1].data(), &[3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_decode_null_sample_as_nan() {
        let body = r#"{"buffer": {"x": {"buffer": [1.0, null]}}}"#;
        let buffers = decode_buffers(body).unwrap();

        assert_eq!(buffers[0].data()[0], 1.0);
        assert!(buffers[0].data()[1].is_nan());
    }

    #[test]
    fn test_decode_malformed_data() {
        assert!(decode_buffers("<html>").unwrap_err().is_connection_failure());
        assert!(decode_buffers(r#"{"status": {}}"#).is_err());
        assert!(decode_buffers(r#"{"buffer": {"x": {"buffer": "nope"}}}"#).is_err());
    }

    #[test]
    fn test_control_payload_repair() {
        assert_eq!(repair_control_payload(r#"{"result"=true}"#), r#"{"result":true}"#);
        assert!(decode_control_result(r#"{"result"=true}"#).unwrap());
        assert!(!decode_control_result(r#"{"result" = false}"#).unwrap());
        // Already valid JSON passes through untouched
        assert!(decode_control_result(r#"{"result": true}"#).unwrap());
    }

    #[test]
    fn test_control_payload_without_result() {
        let err = decode_control_result(r#"{"status"=1}"#).unwrap_err();
        assert!(err.is_connection_failure());
    }
}
