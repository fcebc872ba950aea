//! Uncompressed RIFF/WAVE output.
//!
//! The 44-byte canonical header is a compatibility contract: players are
//! unforgiving about field layout, so it is synthesized byte-for-byte here
//! rather than delegated to a writer library, followed by a verbatim
//! streamed copy of the raw PCM.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use tracing::debug;

use super::{discard_partial_output, Encoder, PcmSpec};
use crate::error::{ContrecError, Result};

/// Copy buffer for the PCM payload.
const COPY_BUF_LEN: usize = 4096;

pub struct WavEncoder;

/// Canonical 44-byte PCM WAV header for `data_len` bytes of payload.
pub fn wav_header(spec: &PcmSpec, data_len: u32) -> [u8; 44] {
    let mut h = [0u8; 44];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&(data_len + 36).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes()); // fmt subchunk size
    h[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    h[22..24].copy_from_slice(&spec.channels.to_le_bytes());
    h[24..28].copy_from_slice(&spec.sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&spec.byte_rate().to_le_bytes());
    h[32..34].copy_from_slice(&spec.block_align().to_le_bytes());
    h[34..36].copy_from_slice(&spec.bits_per_sample.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_len.to_le_bytes());
    h
}

fn write_wav(raw: &Path, dest: &Path, spec: &PcmSpec) -> io::Result<u64> {
    let data_len = fs::metadata(raw)?.len();
    let data_len = u32::try_from(data_len).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "raw segment exceeds 4 GiB")
    })?;

    let mut input = File::open(raw)?;
    let mut out = BufWriter::new(File::create(dest)?);
    out.write_all(&wav_header(spec, data_len))?;

    let mut buf = [0u8; COPY_BUF_LEN];
    let mut copied = 0u64;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        copied += n as u64;
    }

    out.flush()?;
    // Durability of the finished file, then drop closes it.
    out.get_ref().sync_all()?;
    Ok(copied)
}

impl Encoder for WavEncoder {
    fn extension(&self) -> &'static str {
        "wav"
    }

    fn encode(&self, raw: &Path, dest: &Path, spec: &PcmSpec) -> Result<()> {
        match write_wav(raw, dest, spec) {
            Ok(copied) => {
                debug!(dest = %dest.display(), bytes = copied, "wav segment written");
                Ok(())
            }
            Err(e) => {
                discard_partial_output(dest);
                Err(ContrecError::EncodeFailure(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PcmSpec {
        PcmSpec {
            sample_rate: 44_100,
            channels: 1,
            bits_per_sample: 16,
        }
    }

    fn write_raw(dir: &Path, samples: &[i16]) -> std::path::PathBuf {
        let path = dir.join("seg.pcm");
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn header_layout_is_byte_exact() {
        let h = wav_header(&spec(), 8);
        assert_eq!(&h[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(h[4..8].try_into().unwrap()), 8 + 36);
        assert_eq!(&h[8..12], b"WAVE");
        assert_eq!(&h[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes(h[16..20].try_into().unwrap()), 16);
        assert_eq!(u16::from_le_bytes(h[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(h[22..24].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(h[24..28].try_into().unwrap()), 44_100);
        assert_eq!(u32::from_le_bytes(h[28..32].try_into().unwrap()), 88_200);
        assert_eq!(u16::from_le_bytes(h[32..34].try_into().unwrap()), 2);
        assert_eq!(u16::from_le_bytes(h[34..36].try_into().unwrap()), 16);
        assert_eq!(&h[36..40], b"data");
        assert_eq!(u32::from_le_bytes(h[40..44].try_into().unwrap()), 8);
    }

    #[test]
    fn round_trip_recovers_identical_samples() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<i16> = (0..4096).map(|i| ((i * 37) % 32768) as i16 - 8000).collect();
        let raw = write_raw(dir.path(), &samples);
        let dest = dir.path().join("out.wav");

        WavEncoder.encode(&raw, &dest, &spec()).unwrap();

        let mut reader = hound::WavReader::open(&dest).unwrap();
        let wav_spec = reader.spec();
        assert_eq!(wav_spec.channels, 1);
        assert_eq!(wav_spec.sample_rate, 44_100);
        assert_eq!(wav_spec.bits_per_sample, 16);
        assert_eq!(wav_spec.sample_format, hound::SampleFormat::Int);

        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn chunk_size_field_is_data_len_plus_36() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![1i16; 1000];
        let raw = write_raw(dir.path(), &samples);
        let dest = dir.path().join("out.wav");

        WavEncoder.encode(&raw, &dest, &spec()).unwrap();

        let bytes = fs::read(&dest).unwrap();
        assert_eq!(bytes.len(), 44 + 2000);
        let chunk_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(chunk_size, 2000 + 36);
    }

    #[test]
    fn failed_encode_leaves_no_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.pcm");
        let dest = dir.path().join("out.wav");

        let err = WavEncoder.encode(&missing, &dest, &spec());
        assert!(matches!(err, Err(ContrecError::EncodeFailure(_))));
        assert!(!dest.exists());
    }
}
