//! AAC-LC → MPEG-4 (.m4a) output, gated behind the `aac` feature.
//!
//! ## Protocol
//!
//! The raw PCM file is streamed through libfdk-aac in bounded chunks
//! (≤ 16 KiB of input bytes per step); encoded access units are appended
//! to the MPEG-4 track as they become ready. After the last input chunk
//! the encoder is drained until it stops producing output, then the
//! container is closed. `Mp4Writer` finalizes the moov box only in
//! `write_end`, so every error path discards the unfinished file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bytes::Bytes;
use fdk_aac::enc::{BitRate, ChannelMode, Encoder as FdkEncoder, EncoderParams, Transport};
use mp4::{
    AacConfig, AudioObjectType, ChannelConfig, MediaConfig, Mp4Config, Mp4Sample, Mp4Writer,
    SampleFreqIndex, TrackConfig, TrackType,
};
use tracing::debug;

use super::{discard_partial_output, Encoder, PcmSpec};
use crate::error::{ContrecError, Result};

/// Fixed encode profile: AAC-LC at 128 kbps CBR.
const BIT_RATE: u32 = 128_000;

/// Input fed to the codec per step, in bytes (16-bit PCM → 8192 samples).
const INPUT_CHUNK_BYTES: usize = 16 * 1024;

/// Samples per AAC-LC access unit.
const AAC_FRAME_LEN: u32 = 1024;

/// Nominal delay line of the LC encoder, in samples per channel.
const ENCODER_DELAY_SAMPLES: usize = 2048;

#[derive(Default)]
pub struct AacEncoder;

fn freq_index(sample_rate: u32) -> Result<SampleFreqIndex> {
    let idx = match sample_rate {
        96_000 => SampleFreqIndex::Freq96000,
        88_200 => SampleFreqIndex::Freq88200,
        64_000 => SampleFreqIndex::Freq64000,
        48_000 => SampleFreqIndex::Freq48000,
        44_100 => SampleFreqIndex::Freq44100,
        32_000 => SampleFreqIndex::Freq32000,
        24_000 => SampleFreqIndex::Freq24000,
        22_050 => SampleFreqIndex::Freq22050,
        16_000 => SampleFreqIndex::Freq16000,
        12_000 => SampleFreqIndex::Freq12000,
        11_025 => SampleFreqIndex::Freq11025,
        8_000 => SampleFreqIndex::Freq8000,
        other => {
            return Err(ContrecError::EncodeFailure(format!(
                "sample rate {other} Hz has no AAC frequency index"
            )))
        }
    };
    Ok(idx)
}

fn channel_mode(channels: u16) -> Result<(ChannelMode, ChannelConfig)> {
    match channels {
        1 => Ok((ChannelMode::Mono, ChannelConfig::Mono)),
        2 => Ok((ChannelMode::Stereo, ChannelConfig::Stereo)),
        other => Err(ContrecError::EncodeFailure(format!(
            "unsupported channel count for AAC: {other}"
        ))),
    }
}

struct Mux<'w> {
    writer: &'w mut Mp4Writer<File>,
    track_id: u32,
    start_time: u64,
}

impl Mux<'_> {
    fn push(&mut self, frame: Vec<u8>) -> Result<()> {
        let sample = Mp4Sample {
            start_time: self.start_time,
            duration: AAC_FRAME_LEN,
            rendering_offset: 0,
            is_sync: true,
            bytes: Bytes::from(frame),
        };
        self.writer
            .write_sample(self.track_id, &sample)
            .map_err(|e| ContrecError::EncodeFailure(e.to_string()))?;
        self.start_time += AAC_FRAME_LEN as u64;
        Ok(())
    }
}

fn encode_m4a(raw: &Path, dest: &Path, spec: &PcmSpec) -> Result<()> {
    let (mode, chan_conf) = channel_mode(spec.channels)?;
    let freq = freq_index(spec.sample_rate)?;

    let encoder = FdkEncoder::new(EncoderParams {
        bit_rate: BitRate::Cbr(BIT_RATE),
        sample_rate: spec.sample_rate,
        transport: Transport::Raw,
        channels: mode,
        audio_object_type: fdk_aac::enc::AudioObjectType::Mpeg4LowComplexity,
    })
    .map_err(|e| ContrecError::EncodeFailure(format!("encoder init: {e:?}")))?;

    let mp4_config = Mp4Config {
        major_brand: str::parse("M4A ").unwrap(),
        minor_version: 512,
        compatible_brands: vec![str::parse("isom").unwrap(), str::parse("M4A ").unwrap()],
        timescale: 1000,
    };
    let mut writer = Mp4Writer::write_start(File::create(dest)?, &mp4_config)
        .map_err(|e| ContrecError::EncodeFailure(e.to_string()))?;

    writer
        .add_track(&TrackConfig {
            track_type: TrackType::Audio,
            timescale: spec.sample_rate,
            language: "und".to_string(),
            media_conf: MediaConfig::AacConfig(AacConfig {
                bitrate: BIT_RATE,
                profile: AudioObjectType::AacLowComplexity,
                freq_index: freq,
                chan_conf,
            }),
        })
        .map_err(|e| ContrecError::EncodeFailure(e.to_string()))?;

    let mut mux = Mux {
        writer: &mut writer,
        track_id: 1,
        start_time: 0,
    };

    let mut input = BufReader::new(File::open(raw)?);
    let mut in_bytes = [0u8; INPUT_CHUNK_BYTES];
    let mut pending: Vec<i16> = Vec::new();
    let mut out_buf = vec![0u8; 8192];
    let mut input_done = false;

    loop {
        if !input_done && pending.len() * 2 < INPUT_CHUNK_BYTES {
            let n = input.read(&mut in_bytes)?;
            if n == 0 {
                input_done = true;
                // The binding exposes no explicit flush call, so any
                // buffered partial frame plus the codec delay line would
                // be dropped at end-of-input. One frame plus the delay of
                // trailing silence pushes the last real audio out.
                let pad = (AAC_FRAME_LEN as usize + ENCODER_DELAY_SAMPLES)
                    * spec.channels as usize;
                pending.extend(std::iter::repeat(0i16).take(pad));
            } else {
                // A trailing odd byte cannot form a sample; raw files are
                // written sample-at-a-time so this only guards corruption.
                for pair in in_bytes[..n - n % 2].chunks_exact(2) {
                    pending.push(i16::from_le_bytes([pair[0], pair[1]]));
                }
            }
        }

        if pending.is_empty() && input_done {
            break;
        }

        let info = encoder
            .encode(&pending, &mut out_buf)
            .map_err(|e| ContrecError::EncodeFailure(format!("encode step: {e:?}")))?;
        pending.drain(..info.input_consumed.min(pending.len()));

        if info.output_size > 0 {
            mux.push(out_buf[..info.output_size].to_vec())?;
        } else if info.input_consumed == 0 {
            // Codec neither consumed nor produced — nothing more to do.
            break;
        }
    }

    // Drain the codec's internal delay line until end-of-stream.
    loop {
        let info = encoder
            .encode(&[], &mut out_buf)
            .map_err(|e| ContrecError::EncodeFailure(format!("encode flush: {e:?}")))?;
        if info.output_size == 0 {
            break;
        }
        mux.push(out_buf[..info.output_size].to_vec())?;
    }

    let frames_written = mux.start_time / AAC_FRAME_LEN as u64;
    writer
        .write_end()
        .map_err(|e| ContrecError::EncodeFailure(e.to_string()))?;

    debug!(dest = %dest.display(), frames = frames_written, "m4a segment written");
    Ok(())
}

impl Encoder for AacEncoder {
    fn extension(&self) -> &'static str {
        "m4a"
    }

    fn encode(&self, raw: &Path, dest: &Path, spec: &PcmSpec) -> Result<()> {
        encode_m4a(raw, dest, spec).map_err(|e| {
            discard_partial_output(dest);
            e
        })
    }
}
