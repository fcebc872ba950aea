//! Segment encoding strategies.
//!
//! Every encoder consumes a closed raw little-endian PCM file plus its
//! [`PcmSpec`] and writes exactly one playable output file, fully flushed
//! and closed before returning. A failed encode must leave no partial
//! output visible — implementations delete `dest` on any error path.

pub mod wav;

#[cfg(feature = "aac")]
pub mod aac;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
#[cfg(not(feature = "aac"))]
use crate::error::ContrecError;

/// Format parameters of a raw PCM file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count (1 in the shipping configuration).
    pub channels: u16,
    /// Bits per sample (16).
    pub bits_per_sample: u16,
}

impl PcmSpec {
    /// Bytes per sample frame across all channels.
    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }

    /// Bytes of PCM per second.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }
}

/// Strategy converting a finalized raw segment into a container file.
pub trait Encoder: Send + Sync {
    /// Output file extension without the dot (`"wav"` / `"m4a"`).
    fn extension(&self) -> &'static str;

    /// Encode `raw` into `dest`. On error `dest` must not exist afterwards.
    fn encode(&self, raw: &Path, dest: &Path, spec: &PcmSpec) -> Result<()>;
}

/// Selectable output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Uncompressed RIFF/WAVE, canonical 44-byte header.
    Wav,
    /// AAC-LC at 128 kbps in an MPEG-4 container (requires the `aac` feature).
    M4a,
}

/// Build the encoder for `format`.
///
/// # Errors
/// `EncodeFailure` when `M4a` is requested but the crate was built without
/// the `aac` feature.
pub fn make_encoder(format: OutputFormat) -> Result<Arc<dyn Encoder>> {
    match format {
        OutputFormat::Wav => Ok(Arc::new(wav::WavEncoder)),
        #[cfg(feature = "aac")]
        OutputFormat::M4a => Ok(Arc::new(aac::AacEncoder::default())),
        #[cfg(not(feature = "aac"))]
        OutputFormat::M4a => Err(ContrecError::EncodeFailure(
            "m4a output requires the `aac` feature".into(),
        )),
    }
}

/// Timestamp-derived output path inside `dir`, collision-avoided.
///
/// Base stem is `YYYY-MM-DD_HH-MM-SS.<ext>`; an existing file gets a
/// `_<n>` suffix.
pub fn output_path(dir: &Path, extension: &str) -> PathBuf {
    let stem = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let mut candidate = dir.join(format!("{stem}.{extension}"));
    let mut n = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{n}.{extension}"));
        n += 1;
    }
    candidate
}

/// Remove a partially written output file, ignoring a missing file.
pub(crate) fn discard_partial_output(dest: &Path) {
    if let Err(e) = std::fs::remove_file(dest) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dest = %dest.display(), "failed to delete partial output: {e}");
        }
    }
}
