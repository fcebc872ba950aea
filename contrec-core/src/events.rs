//! Event types exposed to external observers (CLI host, future GUI).
//!
//! Levels travel over a `tokio::sync::watch` channel: a single-slot
//! latest-value cell whose send overwrites and never blocks, so a slow
//! observer can only ever miss stale frames — it cannot stall capture.

use serde::{Deserialize, Serialize};

/// One live loudness reading, published at most once per capture iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelFrame {
    /// Monotonically increasing frame sequence number.
    pub seq: u64,
    /// Normalized RMS loudness in [0.0, 1.0].
    pub level: f32,
}

/// Emitted when the recorder state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderStatusEvent {
    pub status: RecorderStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the recorder engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderStatus {
    /// Engine created but `start()` not yet called (also the state after a
    /// failed device open).
    Idle,
    /// Actively capturing and segmenting audio.
    Recording,
    /// Capture stopped by request; engine may be restarted.
    Stopped,
    /// Capture aborted by a device failure — restart required.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_frame_serializes_with_camel_case() {
        let frame = LevelFrame { seq: 3, level: 0.42 };

        let json = serde_json::to_value(frame).expect("serialize level frame");
        assert_eq!(json["seq"], 3);
        let level = json["level"].as_f64().expect("level should be a number");
        assert!((level - 0.42).abs() < 1e-5);

        let round_trip: LevelFrame = serde_json::from_value(json).expect("deserialize");
        assert_eq!(round_trip.seq, 3);
    }

    #[test]
    fn status_event_serializes_with_lowercase_status() {
        let event = RecorderStatusEvent {
            status: RecorderStatus::Recording,
            detail: Some("mic open".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "recording");
        assert_eq!(json["detail"], "mic open");

        let round_trip: RecorderStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, RecorderStatus::Recording);
    }

    #[test]
    fn status_rejects_non_lowercase_values() {
        let err = serde_json::from_str::<RecorderStatus>(r#""Recording""#);
        assert!(err.is_err(), "expected invalid casing to fail");
    }
}
