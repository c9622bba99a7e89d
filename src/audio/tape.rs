//! The scratch tape: a single, ever-growing raw PCM file per chapter.
//!
//! The recorder only ever appends whole frames to the end of the tape.
//! Superseded takes stay on disk as "dirty" regions until the chapter is
//! compacted, at which point [`ScratchTape::replace_with`] swaps in a freshly
//! written file.
//!
//! There is no header: the file is interleaved little-endian PCM whose layout
//! is described entirely by [`TapeFormat`].

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// TapeError
// ---------------------------------------------------------------------------

/// Errors raised by the scratch tape accessor.
#[derive(Debug, Error)]
pub enum TapeError {
    #[error("tape I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported tape format: {channels} channel(s), {bits_per_sample} bits per sample")]
    UnsupportedFormat { channels: u16, bits_per_sample: u16 },

    /// Appended data must be a whole number of frames.
    #[error("partial frame: {len} bytes is not a multiple of the {frame_size}-byte frame")]
    PartialFrame { len: usize, frame_size: usize },
}

// ---------------------------------------------------------------------------
// TapeFormat
// ---------------------------------------------------------------------------

/// Fixed PCM layout of the tape, matching the source audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapeFormat {
    /// Frames per second.
    pub sample_rate: u32,
    /// Interleaved channels per frame.
    pub channels: u16,
    /// Bits per sample; must be a whole number of bytes.
    pub bits_per_sample: u16,
}

impl Default for TapeFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
            bits_per_sample: 16,
        }
    }
}

impl TapeFormat {
    /// Bytes occupied by one frame (one sample per channel).
    pub fn frame_size_in_bytes(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    pub fn validate(&self) -> Result<(), TapeError> {
        if self.channels == 0 || self.bits_per_sample == 0 || self.bits_per_sample % 8 != 0 {
            return Err(TapeError::UnsupportedFormat {
                channels: self.channels,
                bits_per_sample: self.bits_per_sample,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScratchTape
// ---------------------------------------------------------------------------

/// Exclusive owner of the chapter's raw audio file.
///
/// Readers get their own read-only handles through [`open_reader`]; the
/// append handle is kept here and dropped whenever the file is replaced.
///
/// [`open_reader`]: ScratchTape::open_reader
#[derive(Debug)]
pub struct ScratchTape {
    path: PathBuf,
    format: TapeFormat,
    writer: Mutex<Option<File>>,
}

impl ScratchTape {
    /// Open the tape at `path`, creating an empty file when absent.
    pub fn open(path: impl Into<PathBuf>, format: TapeFormat) -> Result<Self, TapeError> {
        format.validate()?;
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;

        log::debug!("scratch tape opened at {}", path.display());
        Ok(Self {
            path,
            format,
            writer: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> TapeFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.format.bits_per_sample
    }

    pub fn frame_size_in_bytes(&self) -> usize {
        self.format.frame_size_in_bytes()
    }

    /// Number of whole frames currently on disk. A missing file counts as empty.
    pub fn total_frames(&self) -> usize {
        std::fs::metadata(&self.path)
            .map(|m| m.len() as usize / self.frame_size_in_bytes())
            .unwrap_or(0)
    }

    /// Append whole frames to the end of the tape and return the new length
    /// in frames.
    pub fn append(&self, pcm: &[u8]) -> Result<usize, TapeError> {
        let frame_size = self.frame_size_in_bytes();
        if pcm.len() % frame_size != 0 {
            return Err(TapeError::PartialFrame {
                len: pcm.len(),
                frame_size,
            });
        }

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if writer.is_none() {
            *writer = Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        if let Some(file) = writer.as_mut() {
            file.write_all(pcm)?;
            file.flush()?;
        }
        Ok(self.total_frames())
    }

    /// A fresh read-only handle onto the current tape file.
    pub fn open_reader(&self) -> Result<File, TapeError> {
        Ok(File::open(&self.path)?)
    }

    /// Path used to stage a rewritten tape before it replaces this one.
    pub fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!("new_{name}"))
    }

    /// Atomically move `replacement` over the tape file.
    ///
    /// The append handle is closed first so later appends target the new file.
    pub fn replace_with(&self, replacement: &Path) -> Result<(), TapeError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.take();
        std::fs::rename(replacement, &self.path)?;
        log::info!("scratch tape replaced: {}", self.path.display());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
