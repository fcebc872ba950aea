//! Typed sample block passed from the ring buffer to the meter and segment store.

/// A contiguous block of mono 16-bit PCM samples at a known sample rate.
///
/// Allocated once per loop iteration (on the non-RT capture loop thread)
/// and not retained past it.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    /// Mono signed 16-bit samples.
    pub samples: Vec<i16>,
    /// Sample rate in Hz (e.g. 44100, 48000).
    pub sample_rate: u32,
}

impl SampleBlock {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Returns the duration of this block in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Returns true if the block contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_follows_sample_rate() {
        let block = SampleBlock::new(vec![0i16; 2048], 44_100);
        assert!((block.duration_secs() - 2048.0 / 44_100.0).abs() < 1e-9);
        assert!(!block.is_empty());
        assert!(SampleBlock::new(Vec::new(), 44_100).is_empty());
    }
}
