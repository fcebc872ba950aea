//! Blocking capture loop.
//!
//! ## Loop stages (per iteration)
//!
//! ```text
//! 1. Check the cooperative running flag
//! 2. Pull one block from the FrameSource (back off on empty reads)
//! 3. Meter the block and publish the level (watch slot, overwrite-on-send)
//! 4. Threshold compare → mark last-loud / had-loud
//! 5. Append the block to the open segment (silence included)
//! 6. Split check: duration expiry, then silence expiry — one split max
//! 7. Brief yield to bound CPU
//! ```
//!
//! The whole loop runs in `spawn_blocking`; it is the sole writer of
//! segment data. Encoding happens synchronously at segment boundaries —
//! the capture ring absorbs callback audio for the encode duration.
//!
//! Per-iteration write and encode failures are logged and the loop keeps
//! going; only a device read failure ends the session, after salvaging the
//! in-flight segment. Stop is observed within one iteration (≈ 20 ms plus
//! any in-flight encode, bounded at well under a second for WAV output).

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::{
    audio::FrameSource,
    buffering::block::SampleBlock,
    encode::{output_path, Encoder, PcmSpec},
    engine::{
        policy::{SplitPolicy, SplitReason},
        CaptureConfig, RecordingMode,
    },
    events::{LevelFrame, RecorderStatus, RecorderStatusEvent},
    meter::LevelMeter,
    store::{SegmentSink, SegmentStore},
};

/// Samples pulled from the source per iteration (≈ 46 ms at 44.1 kHz).
pub const READ_BLOCK: usize = 2048;

/// Back-off when the source has nothing buffered yet.
const EMPTY_SLEEP: Duration = Duration::from_millis(5);

/// Bounded yield at the end of each iteration.
const ITERATION_YIELD: Duration = Duration::from_millis(20);

/// Shared capture-session counters, single-writer / multi-reader.
pub struct SessionStats {
    pub blocks_in: AtomicUsize,
    pub samples_in: AtomicUsize,
    pub segments_opened: AtomicUsize,
    pub segments_saved: AtomicUsize,
    pub segments_discarded: AtomicUsize,
    pub write_errors: AtomicUsize,
    pub encode_errors: AtomicUsize,
    /// f32 bits of the most recent normalized level.
    pub level_bits: AtomicU32,
    /// Level frame sequence, shared with the watch publisher.
    pub level_seq: AtomicU64,
    /// Set when the loop starts, cleared on reset.
    pub started_at: Mutex<Option<Instant>>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            blocks_in: AtomicUsize::new(0),
            samples_in: AtomicUsize::new(0),
            segments_opened: AtomicUsize::new(0),
            segments_saved: AtomicUsize::new(0),
            segments_discarded: AtomicUsize::new(0),
            write_errors: AtomicUsize::new(0),
            encode_errors: AtomicUsize::new(0),
            level_bits: AtomicU32::new(0),
            level_seq: AtomicU64::new(0),
            started_at: Mutex::new(None),
        }
    }
}

impl SessionStats {
    pub fn reset(&self) {
        self.blocks_in.store(0, Ordering::Relaxed);
        self.samples_in.store(0, Ordering::Relaxed);
        self.segments_opened.store(0, Ordering::Relaxed);
        self.segments_saved.store(0, Ordering::Relaxed);
        self.segments_discarded.store(0, Ordering::Relaxed);
        self.write_errors.store(0, Ordering::Relaxed);
        self.encode_errors.store(0, Ordering::Relaxed);
        self.level_bits.store(0, Ordering::Relaxed);
        self.level_seq.store(0, Ordering::Relaxed);
        *self.started_at.lock() = None;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks_in: self.blocks_in.load(Ordering::Relaxed),
            samples_in: self.samples_in.load(Ordering::Relaxed),
            segments_opened: self.segments_opened.load(Ordering::Relaxed),
            segments_saved: self.segments_saved.load(Ordering::Relaxed),
            segments_discarded: self.segments_discarded.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub blocks_in: usize,
    pub samples_in: usize,
    pub segments_opened: usize,
    pub segments_saved: usize,
    pub segments_discarded: usize,
    pub write_errors: usize,
    pub encode_errors: usize,
}

/// All context the capture loop needs, passed as one struct so the
/// `spawn_blocking` closure stays tidy.
pub struct CaptureContext {
    pub config: CaptureConfig,
    pub source: Box<dyn FrameSource>,
    pub store: SegmentStore,
    pub encoder: Arc<dyn Encoder>,
    pub running: Arc<AtomicBool>,
    pub status: Arc<Mutex<RecorderStatus>>,
    pub status_tx: broadcast::Sender<RecorderStatusEvent>,
    pub level_tx: watch::Sender<LevelFrame>,
    pub stats: Arc<SessionStats>,
}

struct OpenSegment {
    sink: SegmentSink,
    had_loud: bool,
}

/// Run the blocking capture loop until `ctx.running` becomes false or the
/// device fails.
pub fn run(mut ctx: CaptureContext) {
    let spec = PcmSpec {
        sample_rate: ctx.config.sample_rate,
        channels: ctx.config.channels,
        bits_per_sample: ctx.config.bits_per_sample,
    };

    info!(
        sample_rate = spec.sample_rate,
        segment_secs = ctx.config.segment_duration.as_secs_f64(),
        silence_secs = ctx.config.silence_cutoff.as_secs_f64(),
        threshold = ctx.config.threshold,
        mode = ?ctx.config.mode,
        "capture loop started"
    );

    *ctx.stats.started_at.lock() = Some(Instant::now());

    let mut meter = LevelMeter::new();
    let mut buf = vec![0i16; READ_BLOCK];
    let mut policy = SplitPolicy::new(
        ctx.config.segment_duration,
        ctx.config.silence_cutoff,
        Instant::now(),
    );
    let mut segment: Option<OpenSegment> = None;
    let mut exit_status = RecorderStatus::Stopped;
    let mut exit_detail: Option<String> = None;

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // ── Pull one block ────────────────────────────────────────────────
        let n = match ctx.source.read(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                error!("device read failed: {e}");
                exit_status = RecorderStatus::Error;
                exit_detail = Some(e.to_string());
                break;
            }
        };

        if n == 0 {
            // Transient empty read — microphones never signal EOF.
            std::thread::sleep(EMPTY_SLEEP);
            continue;
        }

        let block = SampleBlock::new(buf[..n].to_vec(), ctx.config.sample_rate);
        ctx.stats.blocks_in.fetch_add(1, Ordering::Relaxed);
        ctx.stats
            .samples_in
            .fetch_add(block.samples.len(), Ordering::Relaxed);

        // ── Meter + publish ───────────────────────────────────────────────
        let level = meter.level(&block.samples);
        publish_level(&ctx, level);

        let now = Instant::now();
        let loud = level >= ctx.config.threshold;

        // ── Segment open (first iteration; after a gated close; after a
        //    failed open) ───────────────────────────────────────────────────
        if segment.is_none() {
            let should_open = matches!(ctx.config.mode, RecordingMode::Continuous) || loud;
            if should_open {
                match ctx.store.begin() {
                    Ok(sink) => {
                        policy.reset(now);
                        ctx.stats.segments_opened.fetch_add(1, Ordering::Relaxed);
                        segment = Some(OpenSegment {
                            sink,
                            had_loud: false,
                        });
                    }
                    Err(e) => {
                        warn!("failed to open segment sink: {e}");
                        ctx.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        if let Some(seg) = segment.as_mut() {
            if loud {
                policy.mark_loud(now);
                seg.had_loud = true;
            }

            // Silence is appended too — a segment that already has, or may
            // yet get, loud audio keeps its quiet stretches.
            if let Err(e) = seg.sink.append(&block.samples) {
                warn!("segment append failed: {e}");
                ctx.stats.write_errors.fetch_add(1, Ordering::Relaxed);
            }

            if let Some(reason) = policy.check(now) {
                if let Some(closed) = segment.take() {
                    finalize_segment(&ctx, closed, reason, &spec);
                }
                if matches!(ctx.config.mode, RecordingMode::Continuous) {
                    match ctx.store.begin() {
                        Ok(sink) => {
                            policy.reset(Instant::now());
                            ctx.stats.segments_opened.fetch_add(1, Ordering::Relaxed);
                            segment = Some(OpenSegment {
                                sink,
                                had_loud: false,
                            });
                        }
                        Err(e) => {
                            warn!("failed to reopen segment sink: {e}");
                            ctx.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
        }

        std::thread::sleep(ITERATION_YIELD);
    }

    // Salvage the in-flight segment with the same had-loud rule.
    if let Some(seg) = segment.take() {
        finalize_segment(&ctx, seg, SplitReason::SessionEnded, &spec);
    }

    // The loop owns the session. Clearing the flag here covers the
    // self-exit paths (device failure) too, so the engine can be
    // restarted afterwards instead of reporting AlreadyRunning forever.
    ctx.running.store(false, Ordering::SeqCst);

    *ctx.status.lock() = exit_status;
    let _ = ctx.status_tx.send(RecorderStatusEvent {
        status: exit_status,
        detail: exit_detail,
    });

    let snap = ctx.stats.snapshot();
    info!(
        blocks_in = snap.blocks_in,
        samples_in = snap.samples_in,
        segments_opened = snap.segments_opened,
        segments_saved = snap.segments_saved,
        segments_discarded = snap.segments_discarded,
        write_errors = snap.write_errors,
        encode_errors = snap.encode_errors,
        "capture loop stopped — session stats"
    );
}

fn publish_level(ctx: &CaptureContext, level: f32) {
    let seq = ctx.stats.level_seq.fetch_add(1, Ordering::Relaxed);
    ctx.stats
        .level_bits
        .store(level.to_bits(), Ordering::Relaxed);
    // watch overwrites the slot; a slow observer only misses stale frames.
    let _ = ctx.level_tx.send(LevelFrame { seq, level });
}

fn finalize_segment(
    ctx: &CaptureContext,
    seg: OpenSegment,
    reason: SplitReason,
    spec: &PcmSpec,
) {
    let frames = seg.sink.frames();
    match seg.sink.finish(seg.had_loud) {
        Ok(None) => {
            ctx.stats.segments_discarded.fetch_add(1, Ordering::Relaxed);
            debug!(?reason, frames, "segment discarded — never loud");
        }
        Ok(Some(raw)) => {
            let dest = output_path(ctx.store.dir(), ctx.encoder.extension());
            match ctx.encoder.encode(&raw.path, &dest, spec) {
                Ok(()) => {
                    ctx.stats.segments_saved.fetch_add(1, Ordering::Relaxed);
                    info!(path = %dest.display(), frames, ?reason, "segment saved");
                }
                Err(e) => {
                    // The segment's audio is lost but the session continues.
                    ctx.stats.encode_errors.fetch_add(1, Ordering::Relaxed);
                    error!(?reason, "segment encode failed: {e}");
                }
            }
            raw.remove();
        }
        Err(e) => {
            ctx.stats.write_errors.fetch_add(1, Ordering::Relaxed);
            error!(?reason, "segment finalize failed: {e}");
        }
    }
}
