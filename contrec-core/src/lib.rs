//! # contrec-core
//!
//! Continuous segmented audio recorder engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → capture loop (spawn_blocking)
//!                                                    │
//!                                         LevelMeter + threshold
//!                                                    │
//!                                     SegmentSink (temp .pcm, append)
//!                                                    │
//!                                duration / silence split → finalize
//!                                                    │
//!                                 discard  or  Encoder (.wav / .m4a)
//! ```
//!
//! The audio callback is lock-free and allocation-light. All file I/O and
//! encoding happen on the capture loop thread; external observers read the
//! live level and session counters without ever blocking that thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod encode;
pub mod engine;
pub mod error;
pub mod events;
pub mod meter;
pub mod store;

// Convenience re-exports for downstream crates
pub use encode::{make_encoder, Encoder, OutputFormat, PcmSpec};
pub use engine::{CaptureConfig, RecorderEngine, RecordingMode};
pub use error::ContrecError;
pub use events::{LevelFrame, RecorderStatus, RecorderStatusEvent};
