//! Normalized loudness metering.
//!
//! ## Algorithm
//!
//! 1. Compute RMS over all valid samples in a block:
//!    `rms = sqrt(mean(sample_i²))`.
//! 2. Normalize against 16-bit full scale: `min(1.0, rms / 32768.0)`.
//!
//! The same value drives the engine's threshold comparison and any live
//! level display, so it is always clamped to [0, 1] and never NaN.

/// Root-mean-square of a sample slice, normalized to [0, 1].
///
/// An empty slice yields `0.0`.
pub fn rms_normalized(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt();
    (rms / 32768.0).min(1.0) as f32
}

/// Loudness meter with last-value retention.
///
/// A zero-length read must not corrupt the published metric, so `level`
/// returns the previous value unchanged for empty input (initially 0.0).
#[derive(Debug, Clone, Default)]
pub struct LevelMeter {
    last: f32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalized loudness of `samples`, retained for later empty reads.
    pub fn level(&mut self, samples: &[i16]) -> f32 {
        if samples.is_empty() {
            return self.last;
        }
        self.last = rms_normalized(samples);
        self.last
    }

    /// Most recently computed level.
    pub fn last(&self) -> f32 {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn all_zero_block_is_exactly_zero() {
        let level = rms_normalized(&[0i16; 2048]);
        assert_eq!(level, 0.0);
        assert!(!level.is_nan());
    }

    #[test]
    fn full_scale_square_wave_is_clamped_to_one() {
        let samples: Vec<i16> = (0..256)
            .map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        // RMS of ±32768-ish square wave normalizes to ≈1.0 and never above.
        let level = rms_normalized(&samples);
        assert!(level <= 1.0);
        assert!(level > 0.999, "level={level}");
    }

    #[test]
    fn half_scale_square_wave_is_half() {
        let samples: Vec<i16> = (0..256)
            .map(|i| if i % 2 == 0 { 16384 } else { -16384 })
            .collect();
        assert_abs_diff_eq!(rms_normalized(&samples), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn empty_read_returns_previous_level() {
        let mut meter = LevelMeter::new();
        assert_eq!(meter.level(&[]), 0.0);

        let samples: Vec<i16> = (0..256)
            .map(|i| if i % 2 == 0 { 16384 } else { -16384 })
            .collect();
        let loud = meter.level(&samples);
        assert!(loud > 0.4);

        // Empty block keeps the metric at the last real value.
        assert_eq!(meter.level(&[]), loud);
        assert_eq!(meter.last(), loud);
    }
}
