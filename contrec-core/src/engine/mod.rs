//! `RecorderEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! RecorderEngine::new(config, encoder)
//!     └─► start()        → mic open, capture loop spawned, status = Recording
//!         └─► stop()     → running=false, loop drains within one iteration,
//!                          in-flight segment finalized, status = Stopped
//! ```
//!
//! `start()`/`stop()` are idempotent: calling them in the wrong state
//! returns an error rather than panicking.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). `AudioCapture` is therefore created *inside* the
//! `spawn_blocking` closure so it never crosses a thread boundary. A sync
//! oneshot channel propagates any open-device errors back to the `start()`
//! caller, which leaves the engine Idle on failure.

pub mod capture;
pub mod policy;

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::{
    audio::{AudioCapture, RingSource},
    buffering::create_capture_ring,
    encode::Encoder,
    error::{ContrecError, Result},
    events::{LevelFrame, RecorderStatus, RecorderStatusEvent},
    store::SegmentStore,
};

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 64;

/// Whether silence between segments is recorded or skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    /// One segment is always open while recording; silence inside a segment
    /// is captured too. Fully-silent segments are discarded at finalize.
    Continuous,
    /// No segment is open until a block crosses the loudness threshold;
    /// silence between segments is never written to disk.
    Gated,
}

/// Configuration for `RecorderEngine`, read once at `start()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Capture sample rate in Hz. Default: 44100.
    pub sample_rate: u32,
    /// Channel count. The shipping configuration is mono.
    pub channels: u16,
    /// Bits per sample (16-bit linear PCM).
    pub bits_per_sample: u16,
    /// Maximum lifetime of one segment. Default: 30 s.
    pub segment_duration: Duration,
    /// Maximum time since the last loud block before a segment is forcibly
    /// closed. Default: 20 s. May exceed `segment_duration`.
    pub silence_cutoff: Duration,
    /// Normalized RMS loudness threshold in [0, 1]. Default: 0.50.
    pub threshold: f32,
    /// Continuous (default) or gated recording.
    pub mode: RecordingMode,
    /// Directory receiving both temp segments and finished recordings.
    pub output_dir: PathBuf,
    /// Preferred input device name; `None` selects the system default.
    pub preferred_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            bits_per_sample: 16,
            segment_duration: Duration::from_secs(30),
            silence_cutoff: Duration::from_secs(20),
            threshold: 0.50,
            mode: RecordingMode::Continuous,
            output_dir: PathBuf::from("recordings"),
            preferred_device: None,
        }
    }
}

impl CaptureConfig {
    /// Validate constraints before the capture loop consumes the config.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ContrecError::InvalidConfig("sample_rate must be > 0".into()));
        }
        if self.channels != 1 {
            return Err(ContrecError::InvalidConfig(
                "only mono capture is supported".into(),
            ));
        }
        if self.bits_per_sample != 16 {
            return Err(ContrecError::InvalidConfig(
                "only 16-bit samples are supported".into(),
            ));
        }
        if self.segment_duration.is_zero() {
            return Err(ContrecError::InvalidConfig(
                "segment_duration must be > 0".into(),
            ));
        }
        if self.silence_cutoff.is_zero() {
            return Err(ContrecError::InvalidConfig(
                "silence_cutoff must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ContrecError::InvalidConfig(
                "threshold must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// The top-level engine handle.
///
/// `RecorderEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<RecorderEngine>` to share between a host UI and observer
/// tasks.
pub struct RecorderEngine {
    config: CaptureConfig,
    encoder: Arc<dyn Encoder>,
    /// `true` while capture + loop are active.
    running: Arc<AtomicBool>,
    /// Canonical status (written via Mutex, read from host commands).
    status: Arc<Mutex<RecorderStatus>>,
    /// Broadcast sender for status events.
    status_tx: broadcast::Sender<RecorderStatusEvent>,
    /// Single-slot latest-value channel for live levels.
    level_tx: watch::Sender<LevelFrame>,
    /// Kept so the watch channel never closes while the engine lives.
    level_rx: watch::Receiver<LevelFrame>,
    /// Shared capture-session counters.
    stats: Arc<capture::SessionStats>,
    /// Disconnects when the capture loop thread has fully exited; lets
    /// `stop()` and a subsequent `start()` join the previous session
    /// instead of racing its wind-down.
    session_done: Mutex<Option<mpsc::Receiver<()>>>,
}

impl RecorderEngine {
    /// Create a new engine. Does not start capturing — call `start()`.
    pub fn new(config: CaptureConfig, encoder: Arc<dyn Encoder>) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (level_tx, level_rx) = watch::channel(LevelFrame { seq: 0, level: 0.0 });

        Self {
            config,
            encoder,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(RecorderStatus::Idle)),
            status_tx,
            level_tx,
            level_rx,
            stats: Arc::new(capture::SessionStats::default()),
            session_done: Mutex::new(None),
        }
    }

    /// Start audio capture and the segmentation loop.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then
    /// returns. The loop continues running in a background blocking thread.
    ///
    /// # Errors
    /// - `ContrecError::AlreadyRunning` if already started.
    /// - `ContrecError::InvalidConfig` on a bad configuration.
    /// - `ContrecError::NoDefaultInputDevice` / `ContrecError::DeviceUnavailable`
    ///   on device error — the engine stays Idle.
    pub fn start(&self) -> Result<()> {
        self.start_with_device(self.config.preferred_device.clone())
    }

    /// Start with an explicit input device, overriding the configured
    /// preference. `None` selects the system default.
    pub fn start_with_device(&self, device: Option<String>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ContrecError::AlreadyRunning);
        }
        self.config.validate()?;

        // A stopped loop may still be finalizing its last segment; two
        // concurrent loops would interleave status and stats writes.
        self.join_previous_session();

        self.stats.reset();
        self.running.store(true, Ordering::SeqCst);

        let (producer, consumer) = create_capture_ring();

        // Clone all Arc-wrapped state before moving into the closure.
        let mut config = self.config.clone();
        config.preferred_device = device;
        let encoder = Arc::clone(&self.encoder);
        let running = Arc::clone(&self.running);
        let status = Arc::clone(&self.status);
        let status_tx = self.status_tx.clone();
        let level_tx = self.level_tx.clone();
        let stats = Arc::clone(&self.stats);

        // Sync oneshot: capture thread signals open success/failure to start().
        let (open_tx, open_rx) = mpsc::channel::<Result<()>>();
        // Held by the loop closure for its whole lifetime; disconnect is
        // the completion signal observed by join_previous_session().
        let (done_tx, done_rx) = mpsc::channel::<()>();

        tokio::task::spawn_blocking(move || {
            // ── Open audio device (must happen on THIS thread — cpal::Stream
            //    is !Send) ───────────────────────────────────────────────────
            let capture = match AudioCapture::open_with_preference(
                producer,
                Arc::clone(&running),
                config.sample_rate,
                config.preferred_device.as_deref(),
            ) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(()));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let source = Box::new(RingSource::new(consumer, Arc::clone(&capture.failed)));
            let store = SegmentStore::new(&config.output_dir);

            // ── Run the segmentation loop ────────────────────────────────────
            capture::run(capture::CaptureContext {
                config,
                source,
                store,
                encoder,
                running,
                status,
                status_tx,
                level_tx,
                stats,
            });

            // Stream drops here, releasing the audio device on this thread.
            drop(capture);
            drop(done_tx);
        });

        *self.session_done.lock() = Some(done_rx);

        // Block start() until device open is confirmed.
        match open_rx.recv() {
            Ok(Ok(())) => {
                self.set_status(RecorderStatus::Recording, None);
                info!("engine started — recording");
                Ok(())
            }
            Ok(Err(e)) => {
                // Open failed: the engine never left Idle for observers.
                self.running.store(false, Ordering::SeqCst);
                self.set_status(RecorderStatus::Idle, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent — spawn_blocking panicked?
                self.running.store(false, Ordering::SeqCst);
                self.set_status(RecorderStatus::Error, Some("capture task died".into()));
                Err(ContrecError::Other(anyhow::anyhow!(
                    "capture task died unexpectedly"
                )))
            }
        }
    }

    /// Request a stop and wait for the loop to wind down. The loop observes
    /// the flag within one iteration, finalizes the in-flight segment and
    /// publishes the final status before this returns.
    ///
    /// # Errors
    /// - `ContrecError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ContrecError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        info!("engine stop requested");
        self.join_previous_session();
        Ok(())
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> RecorderStatus {
        *self.status.lock()
    }

    /// Subscribe to live level frames (latest value only, never blocking
    /// the capture loop).
    pub fn subscribe_levels(&self) -> watch::Receiver<LevelFrame> {
        self.level_rx.clone()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<RecorderStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Seconds since the current session started; 0 when not running.
    pub fn elapsed_secs(&self) -> u64 {
        if !self.running.load(Ordering::SeqCst) {
            return 0;
        }
        self.stats
            .started_at
            .lock()
            .as_ref()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Count of persisted (non-discarded) segments this session.
    pub fn saved_count(&self) -> usize {
        self.stats
            .segments_saved
            .load(Ordering::Relaxed)
    }

    /// Most recent normalized loudness in [0, 1].
    pub fn last_level(&self) -> f32 {
        f32::from_bits(self.stats.level_bits.load(Ordering::Relaxed))
    }

    /// Snapshot of session counters for observability.
    pub fn stats_snapshot(&self) -> capture::StatsSnapshot {
        self.stats.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    /// Block until the previous capture loop thread has fully exited.
    /// No-op when none is pending; `recv` returns on disconnect because the
    /// sender half lives inside the loop closure.
    fn join_previous_session(&self) {
        let pending = self.session_done.lock().take();
        if let Some(rx) = pending {
            let _ = rx.recv();
        }
    }

    fn set_status(&self, new_status: RecorderStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(RecorderStatusEvent {
            status: new_status,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{make_encoder, OutputFormat};

    fn engine() -> RecorderEngine {
        RecorderEngine::new(
            CaptureConfig::default(),
            make_encoder(OutputFormat::Wav).unwrap(),
        )
    }

    #[test]
    fn default_config_is_valid() {
        assert!(CaptureConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut cfg = CaptureConfig::default();
        cfg.threshold = 1.5;
        assert!(matches!(
            cfg.validate(),
            Err(ContrecError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_zero_durations_and_rate() {
        let mut cfg = CaptureConfig::default();
        cfg.segment_duration = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = CaptureConfig::default();
        cfg.silence_cutoff = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = CaptureConfig::default();
        cfg.sample_rate = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn silence_cutoff_may_exceed_segment_duration() {
        let mut cfg = CaptureConfig::default();
        cfg.segment_duration = Duration::from_secs(10);
        cfg.silence_cutoff = Duration::from_secs(40);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn stop_before_start_is_not_running() {
        let engine = engine();
        assert!(matches!(engine.stop(), Err(ContrecError::NotRunning)));
        assert_eq!(engine.status(), RecorderStatus::Idle);
    }

    #[test]
    fn start_waits_for_previous_loop_to_exit() {
        use std::time::Instant;

        let engine = engine();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        *engine.session_done.lock() = Some(done_rx);

        // Stand-in for a loop still finalizing its last segment.
        let winding_down = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            drop(done_tx);
        });

        let waited = Instant::now();
        engine.join_previous_session();
        assert!(
            waited.elapsed() >= Duration::from_millis(50),
            "join returned before the previous session finished"
        );
        assert!(engine.session_done.lock().is_none());
        winding_down.join().unwrap();
    }

    #[test]
    fn fresh_engine_reports_idle_surface() {
        let engine = engine();
        assert_eq!(engine.status(), RecorderStatus::Idle);
        assert_eq!(engine.elapsed_secs(), 0);
        assert_eq!(engine.saved_count(), 0);
        assert_eq!(engine.last_level(), 0.0);
    }
}
