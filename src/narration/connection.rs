//! Independent, seekable readers over a chapter's clean narration.
//!
//! A [`ChapterConnection`] owns its own read-only handle onto the scratch tape
//! and its own cursor. Public positions are logical (chapter-relative, or
//! verse-relative while locked to a verse); internally the cursor is an
//! absolute byte offset into the tape.
//!
//! Reads walk the active verses' sectors, seeking the file handle for every
//! sector, so dirty regions and interleaved audio of other verses are never
//! returned. Unlocked readers cross verse boundaries on their own; locked
//! readers stop at the verse's last frame.
//!
//! ```rust,no_run
//! use chapter_narration::narration::{AudioFileReader, ChapterRepresentation};
//! # fn play(chapter: std::sync::Arc<ChapterRepresentation>) {
//! let reader = chapter.get_audio_file_reader(None, None);
//! reader.open().unwrap();
//! reader.lock_to_verse(Some(2));
//! reader.seek(0);
//!
//! let mut buffer = vec![0u8; 4096];
//! while reader.has_remaining() {
//!     let n = reader.get_pcm_buffer(&mut buffer).unwrap();
//!     // hand buffer[..n] to the output device
//! #   let _ = n;
//! }
//! reader.release();
//! # }
//! ```

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use thiserror::Error;

use crate::audio::TapeError;

use super::chapter::{chapter_to_absolute, location_in_chapter};
use super::{ChapterRepresentation, VerseNode};

// ---------------------------------------------------------------------------
// ReaderError
// ---------------------------------------------------------------------------

/// Contract violations and I/O failures of a reader.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("reader used before open()")]
    NotOpen,

    #[error("reader used after release()")]
    Released,

    #[error("tape read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tape(#[from] TapeError),
}

// ---------------------------------------------------------------------------
// AudioFileReader trait
// ---------------------------------------------------------------------------

/// Streaming PCM reader contract shared by playback, preview and export.
///
/// Methods take `&self`: implementations guard their cursor internally so a
/// reader can be released from another thread while in use.
pub trait AudioFileReader: Send + Sync {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn sample_size_bits(&self) -> u16;

    /// Logical frame position of the cursor.
    fn frame_position(&self) -> usize;
    /// Logical length of the reader's current scope.
    fn total_frames(&self) -> usize;

    fn open(&self) -> Result<(), ReaderError>;
    fn seek(&self, sample: usize);
    /// Fill `bytes` with whole frames and return the number of bytes written.
    fn get_pcm_buffer(&self, bytes: &mut [u8]) -> Result<usize, ReaderError>;
    fn has_remaining(&self) -> bool;
    /// Close the file handle. Idempotent.
    fn release(&self);

    fn close(&self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// ReaderCursor
// ---------------------------------------------------------------------------

/// Per-connection state, shared weakly with the chapter's registry so bulk
/// close can release it.
#[derive(Debug)]
pub(crate) struct ReaderCursor {
    file: Option<File>,
    /// Absolute byte offset of the next frame to read.
    position: usize,
    locked_verse: Option<usize>,
    /// The last frame of the scope has been consumed.
    drained: bool,
    end_frame: Option<usize>,
    released: bool,
}

impl ReaderCursor {
    fn frame(&self, frame_size: usize) -> usize {
        self.position / frame_size
    }

    fn set_frame(&mut self, frame: usize, frame_size: usize) {
        self.position = frame * frame_size;
    }
}

/// Close the cursor's file handle and mark it dead.
pub(crate) fn release_cursor(cursor: &Mutex<ReaderCursor>) {
    let mut cursor = cursor.lock().unwrap_or_else(|e| e.into_inner());
    cursor.file = None;
    cursor.released = true;
}

// ---------------------------------------------------------------------------
// ChapterConnection
// ---------------------------------------------------------------------------

/// A reader bound to one [`ChapterRepresentation`].
///
/// Dropping the connection releases it.
pub struct ChapterConnection {
    id: u64,
    chapter: Arc<ChapterRepresentation>,
    cursor: Arc<Mutex<ReaderCursor>>,
    frame_size: usize,
}

impl std::fmt::Debug for ChapterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChapterConnection")
            .field("id", &self.id)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl ChapterConnection {
    pub(crate) fn new(
        id: u64,
        chapter: Arc<ChapterRepresentation>,
        start: Option<usize>,
        end: Option<usize>,
    ) -> Self {
        let frame_size = chapter.tape().frame_size_in_bytes();
        let cursor = ReaderCursor {
            file: None,
            position: start.unwrap_or(0) * frame_size,
            locked_verse: None,
            drained: false,
            end_frame: end,
            released: false,
        };
        Self {
            id,
            chapter,
            cursor: Arc::new(Mutex::new(cursor)),
            frame_size,
        }
    }

    pub(crate) fn cursor_handle(&self) -> Weak<Mutex<ReaderCursor>> {
        Arc::downgrade(&self.cursor)
    }

    fn cursor(&self) -> MutexGuard<'_, ReaderCursor> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Restrict reads and seeks to active verse `index`, or return to
    /// whole-chapter scope with `None`. Out-of-range indices are ignored.
    ///
    /// A cursor outside the target verse snaps to its first frame.
    pub fn lock_to_verse(&self, index: Option<usize>) {
        let mut cursor = self.cursor();
        let verses = self.chapter.active_verses();
        let frame = cursor.frame(self.frame_size);

        match index {
            Some(index) => {
                let Some(verse) = verses.get(index) else {
                    log::debug!("ignoring lock to verse {index}: {} active", verses.len());
                    return;
                };
                cursor.locked_verse = Some(index);
                if !verse.contains(frame) {
                    cursor.set_frame(verse.first_frame(), self.frame_size);
                    cursor.drained = false;
                }
            }
            None => {
                cursor.locked_verse = None;
                if !cursor.drained {
                    return;
                }
                // a drained verse hands over to the next one
                if let Some(current) = verses.iter().position(|v| v.contains(frame)) {
                    if let Some(next) = verses.get(current + 1) {
                        cursor.set_frame(next.first_frame(), self.frame_size);
                        cursor.drained = false;
                    }
                }
            }
        }
    }

    pub fn locked_verse(&self) -> Option<usize> {
        self.cursor().locked_verse
    }

    /// Move to the first frame of the current scope.
    pub fn reset(&self) {
        let mut cursor = self.cursor();
        let verses = self.chapter.active_verses();
        let index = cursor.locked_verse.unwrap_or(0);
        let first = verses.get(index).map_or(0, VerseNode::first_frame);
        cursor.set_frame(first, self.frame_size);
        cursor.drained = false;
    }

    /// Absolute tape frame of the cursor.
    pub fn absolute_frame_position(&self) -> usize {
        self.cursor().frame(self.frame_size)
    }

    fn read_verse(
        &self,
        cursor: &mut ReaderCursor,
        bytes: &mut [u8],
        verses: &[VerseNode],
        index: usize,
    ) -> Result<usize, ReaderError> {
        let fs = self.frame_size;
        let verse = &verses[index];
        let frame = cursor.frame(fs);
        if cursor.drained || !verse.contains(frame) {
            return Ok(0);
        }

        let offset = verse.frames_to_position(frame);
        let mut available = verse.len() - offset;
        if let Some(end) = cursor.end_frame.filter(|e| verse.contains(*e) && *e >= frame) {
            available = available.min(verse.frames_to_position(end) - offset + 1);
        }
        let frames_to_read = (bytes.len() / fs).min(available);
        if frames_to_read == 0 {
            log::error!(
                "no frames to read at {frame} ({} bytes requested) in {}",
                bytes.len(),
                verse.marker
            );
            self.finish_verse(cursor, verses, index);
            return Ok(0);
        }

        let sectors = verse.sectors_from_offset(frame, frames_to_read);
        if sectors.is_empty() {
            log::error!("sectors empty for {} at frame {frame}", verse.marker);
            self.finish_verse(cursor, verses, index);
            return Ok(0);
        }

        let file = cursor.file.as_mut().ok_or(ReaderError::NotOpen)?;
        let mut written = 0;
        let mut last_read = frame;
        for sector in &sectors {
            let len = sector.len() * fs;
            file.seek(SeekFrom::Start((sector.start * fs) as u64))?;
            let read = read_fully(file, &mut bytes[written..written + len])?;
            let whole = read / fs;
            written += whole * fs;

            if whole < sector.len() {
                log::error!(
                    "tape ended inside {} (frame {}); stopping verse",
                    verse.marker,
                    sector.start + whole
                );
                self.finish_verse(cursor, verses, index);
                return Ok(written);
            }
            last_read = sector.end;
        }

        let at_bound = cursor.end_frame == Some(last_read);
        if at_bound {
            cursor.set_frame(last_read, fs);
            cursor.drained = true;
        } else if last_read == verse.last_frame() {
            self.finish_verse(cursor, verses, index);
        } else if let Some(next) = verse.next_frame_after(last_read) {
            cursor.set_frame(next, fs);
        }
        Ok(written)
    }

    /// Cursor bookkeeping once a verse has been read to its end, or given up
    /// on after a stall: unlocked readers move to the next verse, otherwise
    /// the cursor parks drained on the verse's last frame.
    fn finish_verse(&self, cursor: &mut ReaderCursor, verses: &[VerseNode], index: usize) {
        if cursor.locked_verse.is_none() {
            if let Some(next) = verses.get(index + 1) {
                cursor.set_frame(next.first_frame(), self.frame_size);
                return;
            }
        }
        cursor.set_frame(verses[index].last_frame(), self.frame_size);
        cursor.drained = true;
    }
}

impl AudioFileReader for ChapterConnection {
    fn sample_rate(&self) -> u32 {
        self.chapter.tape().sample_rate()
    }

    fn channels(&self) -> u16 {
        self.chapter.tape().channels()
    }

    fn sample_size_bits(&self) -> u16 {
        self.chapter.tape().bits_per_sample()
    }

    fn frame_position(&self) -> usize {
        let cursor = self.cursor();
        let verses = self.chapter.active_verses();
        let frame = cursor.frame(self.frame_size);
        let position = match cursor.locked_verse {
            Some(index) => verses.get(index).map_or(0, |v| v.frames_to_position(frame)),
            None => location_in_chapter(&verses, frame),
        };
        // a drained cursor rests on the last frame it already returned
        if cursor.drained {
            position + 1
        } else {
            position
        }
    }

    fn total_frames(&self) -> usize {
        let locked = self.cursor().locked_verse;
        match locked {
            Some(index) => self
                .chapter
                .active_verses()
                .get(index)
                .map_or(0, VerseNode::len),
            None => self.chapter.total_frames(),
        }
    }

    fn open(&self) -> Result<(), ReaderError> {
        let mut cursor = self.cursor();
        if cursor.released {
            return Err(ReaderError::Released);
        }
        cursor.file = Some(self.chapter.tape().open_reader()?);
        Ok(())
    }

    /// Locked readers take a verse-relative sample, unlocked readers a
    /// chapter-relative one. Seeking to or past the scope's end leaves the
    /// reader drained.
    fn seek(&self, sample: usize) {
        let mut cursor = self.cursor();
        let verses = self.chapter.active_verses();

        let (scope_len, chapter_sample, scope_last) = match cursor.locked_verse {
            Some(index) => match verses.get(index) {
                Some(verse) => (
                    verse.len(),
                    sample + location_in_chapter(&verses, verse.first_frame()),
                    verse.last_frame(),
                ),
                None => return,
            },
            None => (
                verses.iter().map(VerseNode::len).sum(),
                sample,
                verses.last().map_or(0, VerseNode::last_frame),
            ),
        };

        if scope_len > 0 && sample >= scope_len {
            cursor.set_frame(scope_last, self.frame_size);
            cursor.drained = true;
            return;
        }
        let absolute = chapter_to_absolute(&verses, self.chapter.tape().total_frames(), chapter_sample);
        cursor.set_frame(absolute, self.frame_size);
        cursor.drained = false;
    }

    fn get_pcm_buffer(&self, bytes: &mut [u8]) -> Result<usize, ReaderError> {
        let mut cursor = self.cursor();
        if cursor.released {
            return Err(ReaderError::Released);
        }
        if cursor.file.is_none() {
            return Err(ReaderError::NotOpen);
        }

        let verses = self.chapter.active_verses();
        if verses.is_empty() {
            log::info!("reading a chapter with no recorded verses");
            return Ok(0);
        }

        let locked = cursor.locked_verse;
        match locked {
            Some(index) if index < verses.len() => {
                self.read_verse(&mut cursor, bytes, &verses, index)
            }
            Some(_) => Ok(0),
            None => {
                let frame = cursor.frame(self.frame_size);
                let index = match verses.iter().position(|v| v.contains(frame)) {
                    Some(index) => index,
                    None => {
                        log::warn!("frame {frame} is outside active audio; restarting at first verse");
                        cursor.set_frame(verses[0].first_frame(), self.frame_size);
                        cursor.drained = false;
                        0
                    }
                };
                self.read_verse(&mut cursor, bytes, &verses, index)
            }
        }
    }

    fn has_remaining(&self) -> bool {
        let cursor = self.cursor();
        if cursor.released || cursor.file.is_none() || cursor.drained {
            return false;
        }
        let verses = self.chapter.active_verses();
        let frame = cursor.frame(self.frame_size);
        match cursor.locked_verse {
            Some(index) => verses.get(index).is_some_and(|v| !v.is_empty() && v.contains(frame)),
            None => verses.iter().any(|v| v.contains(frame)),
        }
    }

    fn release(&self) {
        release_cursor(&self.cursor);
        self.chapter.unregister_connection(self.id);
    }
}

impl Drop for ChapterConnection {
    fn drop(&mut self) {
        self.release();
    }
}

/// Read until `buf` is full or the file ends.
fn read_fully(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NarrationConfig;
    use crate::narration::ChapterInfo;
    use tempfile::{tempdir, TempDir};

    /// 16-bit mono chapter 2 with verses 1..=3 (slots 1..=3).
    fn chapter() -> (Arc<ChapterRepresentation>, TempDir) {
        let dir = tempdir().expect("temp dir");
        let info = ChapterInfo {
            book_slug: "gen".into(),
            chapter_number: 2,
            verses: vec![(1, 1), (2, 2), (3, 3)],
        };
        let chapter = ChapterRepresentation::new(info, dir.path(), &NarrationConfig::default())
            .expect("chapter");
        (chapter, dir)
    }

    /// Record `frames` frames whose samples all hold `fill`.
    fn record(chapter: &ChapterRepresentation, slot: usize, frames: usize, fill: u8) {
        chapter.begin_verse(slot).unwrap();
        chapter.tape().append(&vec![fill; frames * 2]).unwrap();
        chapter.finalize_verse(slot, None).unwrap();
    }

    fn resume(chapter: &ChapterRepresentation, slot: usize, frames: usize, fill: u8) {
        chapter.resume_verse(slot).unwrap();
        chapter.tape().append(&vec![fill; frames * 2]).unwrap();
        chapter.finalize_verse(slot, None).unwrap();
    }

    fn drain(reader: &ChapterConnection, buffer_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buffer = vec![0u8; buffer_size];
        while reader.has_remaining() {
            let n = reader.get_pcm_buffer(&mut buffer).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buffer[..n]);
        }
        out
    }

    /// Verse 1 is split around verse 2 and has a dirty first take:
    /// tape = [9 x4 dirty][1 x3][2 x5][1 x2]
    fn interleaved() -> (Arc<ChapterRepresentation>, TempDir) {
        let (chapter, dir) = chapter();
        record(&chapter, 1, 4, 9);
        record(&chapter, 1, 3, 1);
        record(&chapter, 2, 5, 2);
        resume(&chapter, 1, 2, 1);
        (chapter, dir)
    }

    // ---- Contract ----------------------------------------------------------

    #[test]
    fn read_before_open_is_an_error() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        let mut buf = [0u8; 8];
        assert!(matches!(reader.get_pcm_buffer(&mut buf), Err(ReaderError::NotOpen)));
        assert!(!reader.has_remaining());
    }

    #[test]
    fn release_is_idempotent_and_final() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.open().unwrap();
        reader.release();
        reader.close();
        assert!(matches!(reader.open(), Err(ReaderError::Released)));
        let mut buf = [0u8; 8];
        assert!(matches!(reader.get_pcm_buffer(&mut buf), Err(ReaderError::Released)));
        assert_eq!(chapter.open_connection_count(), 0);
    }

    #[test]
    fn format_comes_from_tape() {
        let (chapter, _dir) = chapter();
        let reader = chapter.get_audio_file_reader(None, None);
        assert_eq!(reader.sample_rate(), 44_100);
        assert_eq!(reader.channels(), 1);
        assert_eq!(reader.sample_size_bits(), 16);
    }

    #[test]
    fn empty_chapter_has_nothing_to_read() {
        let (chapter, _dir) = chapter();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.open().unwrap();
        reader.seek(0);
        assert!(!reader.has_remaining());
        let mut buf = [0u8; 8];
        assert_eq!(reader.get_pcm_buffer(&mut buf).unwrap(), 0);
    }

    // ---- Unlocked playback -------------------------------------------------

    #[test]
    fn unlocked_reads_clean_audio_in_verse_order() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.open().unwrap();
        reader.seek(0);
        assert_eq!(reader.total_frames(), 10);

        let bytes = drain(&reader, 6);
        let mut expected = vec![1u8; 10];
        expected.extend([2u8; 10]);
        assert_eq!(bytes, expected);
        assert!(!reader.has_remaining());
        assert_eq!(reader.frame_position(), 10);
    }

    #[test]
    fn unlocked_crosses_verse_boundary_in_one_call() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.open().unwrap();
        reader.seek(3);

        // verse 1 has 2 frames left; the call stops at the verse end and
        // the cursor moves on to verse 2 by itself
        let mut buf = [0u8; 40];
        assert_eq!(reader.get_pcm_buffer(&mut buf).unwrap(), 4);
        assert_eq!(reader.frame_position(), 5);
        assert_eq!(reader.absolute_frame_position(), 7);
        assert!(reader.has_remaining());

        assert_eq!(reader.get_pcm_buffer(&mut buf).unwrap(), 10);
        assert_eq!(&buf[..10], &[2u8; 10]);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn seek_maps_chapter_position_over_gaps() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.seek(2);
        assert_eq!(reader.absolute_frame_position(), 6);
        reader.seek(3);
        assert_eq!(reader.absolute_frame_position(), 12);
        reader.seek(5);
        assert_eq!(reader.absolute_frame_position(), 7);
        assert_eq!(reader.frame_position(), 5);
    }

    #[test]
    fn gap_position_restarts_at_first_verse() {
        let (chapter, _dir) = interleaved();
        // frame 0 is dirty audio from the superseded take
        let reader = chapter.get_audio_file_reader(Some(0), None);
        reader.open().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.get_pcm_buffer(&mut buf).unwrap(), 4);
        assert_eq!(buf, [1u8; 4]);
        assert_eq!(reader.absolute_frame_position(), 6);
    }

    #[test]
    fn end_bound_stops_reading() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(Some(4), Some(8));
        reader.open().unwrap();
        let bytes = drain(&reader, 64);
        // 3 + 2 frames of verse 1, then frames 7..=8 of verse 2
        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[10..], &[2u8; 4]);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn end_outside_active_audio_is_ignored() {
        let (chapter, _dir) = interleaved();
        // frame 2 belongs to the superseded first take
        let reader = chapter.get_audio_file_reader(None, Some(2));
        reader.open().unwrap();
        reader.seek(0);
        assert_eq!(drain(&reader, 64).len(), 20);
        assert!(!reader.has_remaining());
    }

    // ---- Locked playback ---------------------------------------------------

    #[test]
    fn locked_reader_stays_inside_verse() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.open().unwrap();
        reader.lock_to_verse(Some(0));
        reader.seek(0);
        assert_eq!(reader.frame_position(), 0);
        assert_eq!(reader.total_frames(), 5);

        let bytes = drain(&reader, 4);
        assert_eq!(bytes, vec![1u8; 10]);
        assert_eq!(reader.frame_position(), 5);
        assert_eq!(reader.absolute_frame_position(), 13);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn locked_seek_is_verse_relative() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.lock_to_verse(Some(1));
        reader.seek(2);
        assert_eq!(reader.absolute_frame_position(), 9);
        assert_eq!(reader.frame_position(), 2);

        reader.seek(99);
        assert_eq!(reader.frame_position(), 5);
    }

    #[test]
    fn lock_snaps_to_verse_start_and_ignores_bad_index() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.lock_to_verse(Some(1));
        assert_eq!(reader.absolute_frame_position(), 7);

        reader.lock_to_verse(Some(7));
        assert_eq!(reader.locked_verse(), Some(1));
        assert_eq!(reader.absolute_frame_position(), 7);

        reader.lock_to_verse(None);
        assert_eq!(reader.locked_verse(), None);
    }

    #[test]
    fn unlocking_a_drained_verse_continues_with_next() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.open().unwrap();
        reader.lock_to_verse(Some(0));
        drain(&reader, 64);
        assert!(!reader.has_remaining());

        reader.lock_to_verse(None);
        assert!(reader.has_remaining());
        assert_eq!(drain(&reader, 64), vec![2u8; 10]);
    }

    #[test]
    fn reset_returns_to_scope_start() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.open().unwrap();
        reader.lock_to_verse(Some(1));
        drain(&reader, 64);
        reader.reset();
        assert!(reader.has_remaining());
        assert_eq!(reader.frame_position(), 0);
    }

    // ---- Stalls ------------------------------------------------------------

    #[test]
    fn stall_in_middle_verse_moves_to_next_verse() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.open().unwrap();
        reader.seek(0);
        let mut tiny = [0u8; 1];

        assert_eq!(reader.get_pcm_buffer(&mut tiny).unwrap(), 0);
        assert_eq!(reader.absolute_frame_position(), 7);
        assert!(reader.has_remaining());

        // the last verse stalls too and the reader ends
        assert_eq!(reader.get_pcm_buffer(&mut tiny).unwrap(), 0);
        assert_eq!(reader.absolute_frame_position(), 11);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn stall_in_locked_verse_ends_reader() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.open().unwrap();
        reader.lock_to_verse(Some(0));
        reader.seek(0);
        let mut tiny = [0u8; 1];

        assert_eq!(reader.get_pcm_buffer(&mut tiny).unwrap(), 0);
        assert_eq!(reader.absolute_frame_position(), 13);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn playback_loop_terminates_with_undersized_buffer() {
        let (chapter, _dir) = chapter();
        record(&chapter, 1, 4, 1);
        let reader = chapter.get_audio_file_reader(None, None);
        reader.open().unwrap();
        reader.lock_to_verse(Some(0));
        reader.seek(0);

        let mut calls = 0;
        let mut tiny = [0u8; 1];
        while reader.has_remaining() && calls < 100 {
            reader.get_pcm_buffer(&mut tiny).unwrap();
            calls += 1;
        }
        assert_eq!(calls, 1);
        assert!(!reader.has_remaining());
    }

    #[test]
    fn truncated_tape_stops_at_verse_boundary() {
        let (chapter, _dir) = chapter();
        record(&chapter, 1, 4, 1);
        let reader = chapter.get_audio_file_reader(None, None);
        reader.open().unwrap();
        reader.seek(0);
        std::fs::write(chapter.tape().path(), [1u8; 4]).unwrap();

        let bytes = drain(&reader, 64);
        assert_eq!(bytes, vec![1u8; 4]);
        assert!(!reader.has_remaining());
    }

    // ---- Concurrency -------------------------------------------------------

    #[test]
    fn connections_are_independent_across_threads() {
        let (chapter, _dir) = interleaved();
        let whole = chapter.get_audio_file_reader(None, None);
        let verse = chapter.get_audio_file_reader(None, None);

        let (a, b) = std::thread::scope(|s| {
            let a = s.spawn(|| {
                whole.open().unwrap();
                whole.seek(0);
                drain(&whole, 2)
            });
            let b = s.spawn(|| {
                verse.open().unwrap();
                verse.lock_to_verse(Some(1));
                verse.seek(0);
                drain(&verse, 4)
            });
            (a.join().unwrap(), b.join().unwrap())
        });

        let mut expected = vec![1u8; 10];
        expected.extend([2u8; 10]);
        assert_eq!(a, expected);
        assert_eq!(b, vec![2u8; 10]);
    }

    #[test]
    fn close_from_another_thread_stops_reader() {
        let (chapter, _dir) = interleaved();
        let reader = chapter.get_audio_file_reader(None, None);
        reader.open().unwrap();

        let closer = Arc::clone(&chapter);
        std::thread::spawn(move || closer.close_connections())
            .join()
            .unwrap();

        assert!(!reader.has_remaining());
        let mut buf = [0u8; 8];
        assert!(matches!(reader.get_pcm_buffer(&mut buf), Err(ReaderError::Released)));
    }
}
