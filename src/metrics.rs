//! Lightweight metrics helpers for relaygate.
//!
//! This module exposes a small set of convenience functions and RAII timers
//! wrapping the `metrics` crate macros. It intentionally avoids embedding a
//! concrete exporter (the application can initialize any compatible recorder
//! externally) while still documenting and describing relay‑specific metric
//! names.
//!
//! Provided metrics (labels vary by family):
//! * `relaygate_sessions_total` (counter, label: outcome)
//! * `relaygate_active_sessions` (gauge)
//! * `relaygate_frames_total` (counter, labels: direction, kind)
//! * `relaygate_frame_bytes_total` (counter, label: direction)
//! * `relaygate_dropped_frames_total` (counter)
//! * `relaygate_reconnect_attempts_total` (counter, label: outcome)
//! * `relaygate_forward_requests_total` (counter, label: status)
//! * `relaygate_forward_duration_seconds` (histogram)
//! * `relaygate_decompress_total` (counter, labels: encoding, outcome)
//!
//! The `*_timer` structs leverage `Drop` to record durations safely even when
//! early returns or errors occur.
use std::time::Instant;

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const RELAYGATE_SESSIONS_TOTAL: &str = "relaygate_sessions_total";
pub const RELAYGATE_ACTIVE_SESSIONS: &str = "relaygate_active_sessions";
pub const RELAYGATE_FRAMES_TOTAL: &str = "relaygate_frames_total";
pub const RELAYGATE_FRAME_BYTES_TOTAL: &str = "relaygate_frame_bytes_total";
pub const RELAYGATE_DROPPED_FRAMES_TOTAL: &str = "relaygate_dropped_frames_total";
pub const RELAYGATE_RECONNECT_ATTEMPTS_TOTAL: &str = "relaygate_reconnect_attempts_total";
pub const RELAYGATE_FORWARD_REQUESTS_TOTAL: &str = "relaygate_forward_requests_total";
pub const RELAYGATE_FORWARD_DURATION_SECONDS: &str = "relaygate_forward_duration_seconds";
pub const RELAYGATE_DECOMPRESS_TOTAL: &str = "relaygate_decompress_total";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        RELAYGATE_SESSIONS_TOTAL,
        Unit::Count,
        "Relay sessions accepted or rejected (by outcome)."
    );
    describe_gauge!(
        RELAYGATE_ACTIVE_SESSIONS,
        "Number of relay sessions currently registered."
    );
    describe_counter!(
        RELAYGATE_FRAMES_TOTAL,
        Unit::Count,
        "Frames relayed (by direction/kind)."
    );
    describe_counter!(
        RELAYGATE_FRAME_BYTES_TOTAL,
        Unit::Bytes,
        "Payload bytes relayed (by direction)."
    );
    describe_counter!(
        RELAYGATE_DROPPED_FRAMES_TOTAL,
        Unit::Count,
        "Client frames dropped while no upstream channel was installed."
    );
    describe_counter!(
        RELAYGATE_RECONNECT_ATTEMPTS_TOTAL,
        Unit::Count,
        "Upstream reconnect attempts (by outcome)."
    );
    describe_counter!(
        RELAYGATE_FORWARD_REQUESTS_TOTAL,
        Unit::Count,
        "One-shot forwarded requests (by status)."
    );
    describe_histogram!(
        RELAYGATE_FORWARD_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of one-shot forwarded requests."
    );
    describe_counter!(
        RELAYGATE_DECOMPRESS_TOTAL,
        Unit::Count,
        "Response body decompressions (by encoding/outcome)."
    );
});

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing relaygate metrics descriptions");
    Lazy::force(&DESCRIPTIONS);
    Ok(())
}

/// Count a session creation outcome (`accepted`, `rejected`, `dial_failed`).
pub fn increment_sessions(outcome: &'static str) {
    counter!(RELAYGATE_SESSIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// Set the number of currently registered sessions.
pub fn set_active_sessions(count: usize) {
    gauge!(RELAYGATE_ACTIVE_SESSIONS).set(count as f64);
}

/// Record one relayed frame (direction `upstream`/`client`, kind `text`/`binary`).
pub fn record_frame(direction: &'static str, kind: &'static str, bytes: usize) {
    counter!(
        RELAYGATE_FRAMES_TOTAL,
        "direction" => direction,
        "kind" => kind
    )
    .increment(1);
    counter!(RELAYGATE_FRAME_BYTES_TOTAL, "direction" => direction).increment(bytes as u64);
}

pub fn increment_dropped_frames() {
    counter!(RELAYGATE_DROPPED_FRAMES_TOTAL).increment(1);
}

/// Count a reconnect attempt outcome (`success`, `failure`, `refused`).
pub fn increment_reconnect(outcome: &'static str) {
    counter!(RELAYGATE_RECONNECT_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn increment_forward_request(status: u16) {
    counter!(
        RELAYGATE_FORWARD_REQUESTS_TOTAL,
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn increment_decompress(encoding: &str, outcome: &'static str) {
    counter!(
        RELAYGATE_DECOMPRESS_TOTAL,
        "encoding" => encoding.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// RAII helper measuring one-shot forward duration.
pub struct ForwardTimer {
    start: Instant,
}

impl ForwardTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ForwardTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ForwardTimer {
    fn drop(&mut self) {
        histogram!(RELAYGATE_FORWARD_DURATION_SECONDS).record(self.start.elapsed().as_secs_f64());
    }
}
