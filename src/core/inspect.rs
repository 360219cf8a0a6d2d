//! Best-effort decoding of relayed payloads for diagnostics.
//!
//! Bot gateway traffic is JSON shaped like `{"op": 0, "s": 42, "t": "READY", "d": {...}}`.
//! Nothing here may influence forwarding; a payload that does not parse simply
//! yields no summary.
use serde::Deserialize;
use serde_json::Value;

use crate::ports::Frame;

/// The routing fields of a gateway payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct PayloadSummary {
    #[serde(default)]
    pub op: Option<i64>,
    #[serde(default)]
    pub s: Option<i64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// Summarise a frame if it is a JSON object, otherwise `None`.
pub fn summarize(frame: &Frame) -> Option<PayloadSummary> {
    let Frame::Text(text) = frame else {
        return None;
    };
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
        _ => None,
    }
}

/// Emit a debug event describing `frame`. Cheap when debug logging is off.
pub fn trace_frame(direction: &str, frame: &Frame) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    match summarize(frame) {
        Some(summary) => tracing::debug!(
            direction,
            op = ?summary.op,
            seq = ?summary.s,
            event = ?summary.t,
            len = frame.len(),
            "Relayed gateway payload"
        ),
        None => tracing::debug!(
            direction,
            kind = frame.kind(),
            len = frame.len(),
            "Relayed opaque payload"
        ),
    }
}
