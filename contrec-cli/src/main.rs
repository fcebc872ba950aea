//! Command-line host for the contrec recording engine.
//!
//! Runs the engine in the foreground, prints a periodic level/status line,
//! and stops cleanly on Ctrl-C (finalizing the in-flight segment before
//! the process exits).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use contrec_core::audio::device::list_input_devices;
use contrec_core::{
    make_encoder, CaptureConfig, OutputFormat, RecorderEngine, RecorderStatus, RecordingMode,
};
use tracing::info;

/// Continuous segmented audio recorder.
#[derive(Parser, Debug)]
#[command(name = "contrec", version, about)]
struct Cli {
    /// Directory receiving finished recordings (created if missing).
    #[arg(long, default_value = "recordings")]
    output_dir: PathBuf,

    /// Maximum length of one segment, in seconds.
    #[arg(long, default_value_t = 30)]
    segment_secs: u64,

    /// Close a segment after this many seconds without loud audio.
    #[arg(long, default_value_t = 20)]
    silence_secs: u64,

    /// Loudness threshold as a percentage of full scale (0-100).
    #[arg(long, default_value_t = 50)]
    threshold: u8,

    /// Capture sample rate in Hz.
    #[arg(long, default_value_t = 44_100)]
    sample_rate: u32,

    /// Input device name (substring match not supported; use --list-devices).
    #[arg(long)]
    device: Option<String>,

    /// List available input devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Output container: wav or m4a.
    #[arg(long, default_value = "wav")]
    format: String,

    /// Only record while audio is above the threshold (skip silence between
    /// segments entirely).
    #[arg(long)]
    gated: bool,
}

impl Cli {
    fn into_config(self) -> Result<(CaptureConfig, OutputFormat)> {
        if self.threshold > 100 {
            bail!("--threshold must be between 0 and 100");
        }
        let format = match self.format.as_str() {
            "wav" => OutputFormat::Wav,
            "m4a" => OutputFormat::M4a,
            other => bail!("unknown output format {other:?} (expected wav or m4a)"),
        };
        let config = CaptureConfig {
            sample_rate: self.sample_rate,
            segment_duration: Duration::from_secs(self.segment_secs),
            silence_cutoff: Duration::from_secs(self.silence_secs),
            threshold: f32::from(self.threshold) / 100.0,
            mode: if self.gated {
                RecordingMode::Gated
            } else {
                RecordingMode::Continuous
            },
            output_dir: self.output_dir,
            preferred_device: self.device,
            ..CaptureConfig::default()
        };
        Ok((config, format))
    }
}

fn print_devices() {
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("no input devices found");
        return;
    }
    for device in devices {
        if device.is_default {
            println!("{} (default)", device.name);
        } else {
            println!("{}", device.name);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contrec=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    if cli.list_devices {
        print_devices();
        return Ok(());
    }

    let (config, format) = cli.into_config()?;
    let encoder = make_encoder(format)
        .context("selected output format is not available in this build")?;

    info!(
        output_dir = %config.output_dir.display(),
        segment_secs = config.segment_duration.as_secs(),
        silence_secs = config.silence_cutoff.as_secs(),
        threshold = config.threshold,
        "starting recorder"
    );

    let engine = Arc::new(RecorderEngine::new(config, encoder));
    engine.start().context("failed to start recording")?;

    let mut status_rx = engine.subscribe_status();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping");
                // The loop finalizes the in-flight segment before exiting;
                // the status event below confirms it finished.
                if engine.stop().is_err() {
                    break;
                }
            }
            event = status_rx.recv() => {
                match event {
                    Ok(event) => {
                        println!("{}", serde_json::to_string(&event)?);
                        if matches!(
                            event.status,
                            RecorderStatus::Stopped | RecorderStatus::Error
                        ) {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("status receiver lagged by {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ticker.tick() => {
                eprintln!(
                    "rec {:>4}s  level {:>5.2}  saved {}",
                    engine.elapsed_secs(),
                    engine.last_level(),
                    engine.saved_count(),
                );
            }
        }
    }

    let stats = engine.stats_snapshot();
    println!(
        "session done: {} saved, {} discarded, {} write errors, {} encode errors",
        stats.segments_saved,
        stats.segments_discarded,
        stats.write_errors,
        stats.encode_errors,
    );

    Ok(())
}
