//! Temporary raw-segment storage.
//!
//! One live [`SegmentSink`] at a time accumulates little-endian 16-bit PCM
//! into a uniquely named `.pcm` temp file. At finalize time the sink either
//! deletes the file (segment never contained loud audio) or hands back a
//! [`RawSegment`] for the encoder; the engine removes the temp file once
//! encoding has consumed it.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::error::{ContrecError, Result};

/// Process-wide suffix so two sinks opened in the same millisecond still
/// get distinct temp names.
static SINK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Factory for temporary raw-sample sinks inside one directory.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    dir: PathBuf,
}

impl SegmentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate a new temp sink, creating the directory if absent.
    pub fn begin(&self) -> Result<SegmentSink> {
        fs::create_dir_all(&self.dir)?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let suffix = SINK_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("seg_{millis}_{suffix}.pcm"));

        let file = File::create(&path)?;
        debug!(path = %path.display(), "opened segment sink");

        Ok(SegmentSink {
            path,
            writer: Some(BufWriter::new(file)),
            frames: 0,
        })
    }
}

/// One open temporary raw-sample file.
pub struct SegmentSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    frames: u64,
}

impl SegmentSink {
    /// Append mono i16 samples in capture order, little-endian.
    pub fn append(&mut self, samples: &[i16]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ContrecError::WriteFailure("sink already finished".into()))?;

        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        writer
            .write_all(&bytes)
            .map_err(|e| ContrecError::WriteFailure(e.to_string()))?;
        self.frames += samples.len() as u64;
        Ok(())
    }

    /// Cumulative sample-frame count appended so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the sink.
    ///
    /// With `keep == false` the temp file is deleted and `None` returned —
    /// the segment never contained loud audio. Otherwise the closed raw
    /// file is handed to the caller for encoding.
    pub fn finish(mut self, keep: bool) -> Result<Option<RawSegment>> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .map_err(|e| ContrecError::WriteFailure(e.to_string()))?;
        }

        if !keep {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), "failed to delete discarded segment: {e}");
            }
            debug!(frames = self.frames, "segment discarded — no loud audio");
            return Ok(None);
        }

        Ok(Some(RawSegment {
            path: self.path.clone(),
            frames: self.frames,
        }))
    }
}

/// A closed raw PCM file awaiting encoding.
#[derive(Debug, Clone)]
pub struct RawSegment {
    pub path: PathBuf,
    pub frames: u64,
}

impl RawSegment {
    /// Delete the temp file. Called after the encoder has consumed it
    /// (successfully or not).
    pub fn remove(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "failed to delete raw segment: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_writes_little_endian_pcm() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::new(dir.path());

        let mut sink = store.begin().unwrap();
        sink.append(&[0x0102, -2]).unwrap();
        assert_eq!(sink.frames(), 2);

        let raw = sink.finish(true).unwrap().expect("kept segment");
        assert_eq!(raw.frames, 2);
        let bytes = fs::read(&raw.path).unwrap();
        assert_eq!(bytes, vec![0x02, 0x01, 0xfe, 0xff]);

        raw.remove();
        assert!(!raw.path.exists());
    }

    #[test]
    fn discard_deletes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::new(dir.path());

        let mut sink = store.begin().unwrap();
        sink.append(&[0i16; 128]).unwrap();
        let path = sink.path().to_path_buf();
        assert!(path.exists());

        assert!(sink.finish(false).unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn sinks_opened_back_to_back_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = SegmentStore::new(dir.path());

        let a = store.begin().unwrap();
        let b = store.begin().unwrap();
        assert_ne!(a.path(), b.path());

        a.finish(false).unwrap();
        b.finish(false).unwrap();
    }

    #[test]
    fn begin_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("recordings").join("tmp");
        let store = SegmentStore::new(&nested);

        let sink = store.begin().unwrap();
        assert!(nested.is_dir());
        sink.finish(false).unwrap();
    }
}
