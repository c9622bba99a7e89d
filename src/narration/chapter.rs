//! Chapter-level view over the scratch tape.
//!
//! [`ChapterRepresentation`] owns the verse slots of one chapter, the scratch
//! tape they point into, and the recovery file that mirrors verse state on
//! disk. It converts between three coordinate spaces:
//!
//! | Space            | Counts                                            |
//! |------------------|---------------------------------------------------|
//! | absolute         | every frame on the tape, dirty regions included   |
//! | chapter-relative | only active verses' current sectors, slot order   |
//! | verse-relative   | only one verse's sectors                          |
//!
//! # Locking
//!
//! * `mutation` serialises finalize / trim / restore so they never interleave.
//! * `state` guards the verse slots; it is held only for short critical
//!   sections and callers receive copies ([`active_verses`] is a snapshot and
//!   must not be kept across a mutation).
//! * `connections` and `subscribers` each have their own lock.
//!
//! [`active_verses`]: ChapterRepresentation::active_verses

use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, Weak};

use thiserror::Error;

use crate::audio::{Marker, ScratchTape, TapeError, TapeFormat};
use crate::config::NarrationConfig;

use super::connection::{release_cursor, AudioFileReader, ChapterConnection, ReaderCursor};
use super::{NarrationHistory, Sector, VerseNode};

// ---------------------------------------------------------------------------
// NarrationError
// ---------------------------------------------------------------------------

/// Errors surfaced by chapter operations.
#[derive(Debug, Error)]
pub enum NarrationError {
    #[error(transparent)]
    Tape(#[from] TapeError),

    #[error("recovery file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not serialize verse state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("verse index {index} out of range ({len} slots)")]
    VerseOutOfRange { index: usize, len: usize },

    #[error("expected {expected} verse slots, got {got}")]
    VerseCountMismatch { expected: usize, got: usize },

    #[error("verse slot {0} has inconsistent placement or sectors")]
    InconsistentVerse(usize),

    #[error("no take is open for verse {0}")]
    NoOpenTake(usize),

    #[error("a take is already open for verse {0}")]
    TakeInProgress(usize),

    /// The original tape is untouched when this is returned.
    #[error("trim aborted, original tape kept: {0}")]
    Trim(String),
}

// ---------------------------------------------------------------------------
// ChapterInfo
// ---------------------------------------------------------------------------

/// What the chapter needs to know from the project: its book, its number,
/// and the ordered `(start, end)` verse boundaries of its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterInfo {
    pub book_slug: String,
    pub chapter_number: u32,
    pub verses: Vec<(u32, u32)>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TakeMode {
    /// New recording of the verse; earlier sectors become dirty.
    Replace,
    /// Continuation appended as an extra sector.
    Append,
}

#[derive(Debug, Clone, Copy)]
struct OpenTake {
    verse_index: usize,
    start: usize,
    mode: TakeMode,
}

#[derive(Debug)]
struct ChapterState {
    total_verses: Vec<VerseNode>,
    open_take: Option<OpenTake>,
}

type ConnectionRegistry = Vec<(u64, Weak<Mutex<ReaderCursor>>)>;

// ---------------------------------------------------------------------------
// ChapterRepresentation
// ---------------------------------------------------------------------------

/// Verse slots, scratch tape and recovery state for one chapter.
pub struct ChapterRepresentation {
    info: ChapterInfo,
    tape: ScratchTape,
    recovery_file: PathBuf,
    trim_buffer_size: usize,
    state: Mutex<ChapterState>,
    mutation: Mutex<()>,
    connections: Mutex<ConnectionRegistry>,
    next_connection_id: AtomicU64,
    subscribers: Mutex<Vec<mpsc::Sender<Vec<Marker>>>>,
}

impl std::fmt::Debug for ChapterRepresentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChapterRepresentation")
            .field("info", &self.info)
            .field("tape", &self.tape.path())
            .finish_non_exhaustive()
    }
}

impl ChapterRepresentation {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Open the chapter stored in `chapter_dir`, creating the tape and
    /// recovery file when they do not exist yet.
    ///
    /// Verse slots start unplaced; call
    /// [`load_from_serialized_verses`](Self::load_from_serialized_verses) to
    /// recover a previous session.
    pub fn new(
        info: ChapterInfo,
        chapter_dir: &Path,
        config: &NarrationConfig,
    ) -> Result<Arc<Self>, NarrationError> {
        std::fs::create_dir_all(chapter_dir)?;
        let tape = ScratchTape::open(chapter_dir.join(&config.files.tape_file), config.tape)?;

        let recovery_file = chapter_dir.join(&config.files.recovery_file);
        if !recovery_file.exists() {
            File::create(&recovery_file)?;
        }

        let total_verses = initialize_verses(&info);
        log::info!(
            "chapter {} of {}: {} verse slots",
            info.chapter_number,
            info.book_slug,
            total_verses.len()
        );

        Ok(Arc::new(Self {
            info,
            tape,
            recovery_file,
            trim_buffer_size: config.trim.buffer_size,
            state: Mutex::new(ChapterState {
                total_verses,
                open_take: None,
            }),
            mutation: Mutex::new(()),
            connections: Mutex::new(Vec::new()),
            next_connection_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }))
    }

    fn state(&self) -> MutexGuard<'_, ChapterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn info(&self) -> &ChapterInfo {
        &self.info
    }

    pub fn tape(&self) -> &ScratchTape {
        &self.tape
    }

    pub fn format(&self) -> TapeFormat {
        self.tape.format()
    }

    pub fn recovery_file(&self) -> &Path {
        &self.recovery_file
    }

    /// Copy of every verse slot, in slot order.
    pub fn total_verses(&self) -> Vec<VerseNode> {
        self.state().total_verses.clone()
    }

    /// Snapshot of the placed slots, in slot order.
    pub fn active_verses(&self) -> Vec<VerseNode> {
        active_of(&self.state().total_verses)
    }

    /// Frames of clean narration: the sum of active verse lengths.
    pub fn total_frames(&self) -> usize {
        self.state()
            .total_verses
            .iter()
            .filter(|v| v.placed)
            .map(VerseNode::len)
            .sum()
    }

    /// One entry per slot: placed and holding at least one frame.
    pub fn verses_with_recordings(&self) -> Vec<bool> {
        self.state()
            .total_verses
            .iter()
            .map(|v| v.placed && v.len() > 0)
            .collect()
    }

    /// Fraction of slots that are placed, `0.0` for a chapter with no slots.
    pub fn completion_progress(&self) -> f64 {
        let state = self.state();
        let total = state.total_verses.len();
        if total == 0 {
            return 0.0;
        }
        let active = state.total_verses.iter().filter(|v| v.placed).count();
        active as f64 / total as f64
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// Open a fresh take for `verse_index` at the current tape end. When it
    /// is finalized the verse's earlier sectors are superseded.
    ///
    /// Returns the absolute frame where the take starts.
    pub fn begin_verse(&self, verse_index: usize) -> Result<usize, NarrationError> {
        self.open_take(verse_index, TakeMode::Replace)
    }

    /// Open a continuation take that is appended to the verse as an extra
    /// sector instead of replacing it.
    pub fn resume_verse(&self, verse_index: usize) -> Result<usize, NarrationError> {
        self.open_take(verse_index, TakeMode::Append)
    }

    fn open_take(&self, verse_index: usize, mode: TakeMode) -> Result<usize, NarrationError> {
        let _guard = self.exclusive();
        let mut state = self.state();
        check_index(&state.total_verses, verse_index)?;
        if let Some(take) = state.open_take {
            return Err(NarrationError::TakeInProgress(take.verse_index));
        }

        let start = self.tape.total_frames();
        state.open_take = Some(OpenTake {
            verse_index,
            start,
            mode,
        });
        log::debug!("take opened for slot {verse_index} at frame {start} ({mode:?})");
        Ok(start)
    }

    /// Close the open take for `verse_index`, using the current tape length
    /// as its end, then notify `history`, persist and publish.
    ///
    /// `history` runs without any chapter lock held, so it may call back into
    /// the chapter. Returns the tape length in frames.
    pub fn finalize_verse(
        &self,
        verse_index: usize,
        history: Option<&mut dyn NarrationHistory>,
    ) -> Result<usize, NarrationError> {
        let guard = self.exclusive();
        let end = self.tape.total_frames();

        let snapshot = {
            let mut state = self.state();
            check_index(&state.total_verses, verse_index)?;
            let take = match state.open_take {
                Some(take) if take.verse_index == verse_index => take,
                _ => return Err(NarrationError::NoOpenTake(verse_index)),
            };
            state.open_take = None;

            let verse = &mut state.total_verses[verse_index];
            if end > take.start {
                let sector = Sector::new(take.start, end - 1);
                let appended = take.mode == TakeMode::Append && verse.append_sector(sector);
                if !appended {
                    verse.set_sectors(vec![sector]);
                }
                log::debug!(
                    "{} finalized: frames {}..={}",
                    verse.marker,
                    sector.start,
                    sector.end
                );
            } else {
                log::warn!("take for {} captured no audio; verse unchanged", verse.marker);
            }
            state.total_verses.clone()
        };
        drop(guard);

        if let Some(history) = history {
            history.finalize_verse(end, &snapshot);
        }

        self.on_verses_updated()?;
        Ok(end)
    }

    /// Replace every slot with `verses` (same slot count), e.g. when an undo
    /// history rolls back, then persist and publish.
    ///
    /// Nothing changes when any slot fails [`VerseNode::is_consistent`].
    pub fn restore_verses(&self, verses: Vec<VerseNode>) -> Result<(), NarrationError> {
        let _guard = self.exclusive();
        {
            let mut state = self.state();
            if verses.len() != state.total_verses.len() {
                return Err(NarrationError::VerseCountMismatch {
                    expected: state.total_verses.len(),
                    got: verses.len(),
                });
            }
            if let Some(index) = verses.iter().position(|v| !v.is_consistent()) {
                return Err(NarrationError::InconsistentVerse(index));
            }
            state.total_verses = verses;
        }
        self.update_verses()
    }

    // -----------------------------------------------------------------------
    // Update / persistence / publication
    // -----------------------------------------------------------------------

    /// Relocate active markers to chapter coordinates, rewrite the recovery
    /// file and publish the marker list.
    pub fn on_verses_updated(&self) -> Result<(), NarrationError> {
        let _guard = self.exclusive();
        self.update_verses()
    }

    fn update_verses(&self) -> Result<(), NarrationError> {
        let active = {
            let mut state = self.state();
            let mut location = 0;
            // verses are disjoint, so a verse's first frame sits exactly after
            // the lengths of all preceding active verses
            for verse in state.total_verses.iter_mut().filter(|v| v.placed) {
                verse.marker = verse.marker.with_location(location);
                location += verse.len();
            }
            active_of(&state.total_verses)
        };

        self.serialize_verses(&active)?;
        self.publish(active.into_iter().map(|v| v.marker).collect());
        Ok(())
    }

    fn serialize_verses(&self, active: &[VerseNode]) -> Result<(), NarrationError> {
        let json = serde_json::to_string_pretty(active)?;
        std::fs::write(&self.recovery_file, json)?;
        Ok(())
    }

    fn publish(&self, markers: Vec<Marker>) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(markers.clone()).is_ok());
    }

    /// Receive every marker list published after a finalize, trim, restore
    /// or recovery load. Updates arrive only after they are persisted.
    pub fn subscribe(&self) -> mpsc::Receiver<Vec<Marker>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Restore verse slots from the recovery file.
    ///
    /// A missing, empty or corrupt file means "no prior session": the slots
    /// are left as they are and `0` is returned. Otherwise every slot is
    /// cleared and refilled from the nodes whose marker matches it; nodes
    /// that break the sector invariants or point past the tape end are
    /// skipped. Returns the number of placed verses restored.
    pub fn load_from_serialized_verses(&self) -> usize {
        let _guard = self.exclusive();

        let json = match std::fs::read_to_string(&self.recovery_file) {
            Ok(json) if !json.trim().is_empty() => json,
            Ok(_) => {
                log::info!("no recovery state in {}", self.recovery_file.display());
                return 0;
            }
            Err(e) => {
                log::warn!("recovery file unreadable ({e}); starting empty");
                return 0;
            }
        };
        let nodes: Vec<VerseNode> = match serde_json::from_str(&json) {
            Ok(nodes) => nodes,
            Err(e) => {
                log::error!("corrupt recovery file {}: {e}", self.recovery_file.display());
                return 0;
            }
        };
        log::info!("loading {} audio markers from serialized data", nodes.len());

        let tape_frames = self.tape.total_frames();
        let active = {
            let mut state = self.state();
            state.open_take = None;
            state.total_verses.iter_mut().for_each(VerseNode::clear);

            for node in nodes {
                if !node.is_consistent() || (node.placed && node.last_frame() >= tape_frames) {
                    log::warn!("skipping invalid recovery entry for {}", node.marker);
                    continue;
                }
                let label = node.marker.formatted_label();
                match state
                    .total_verses
                    .iter_mut()
                    .find(|slot| slot.marker.formatted_label() == label)
                {
                    Some(slot) => *slot = node,
                    None => log::warn!("recovery entry {label} has no matching slot"),
                }
            }
            active_of(&state.total_verses)
        };

        let restored = active.len();
        self.publish(active.into_iter().map(|v| v.marker).collect());
        restored
    }

    // -----------------------------------------------------------------------
    // Coordinate mapping
    // -----------------------------------------------------------------------

    /// Map an absolute tape frame to chapter-relative coordinates. Frames in
    /// dirty regions or gaps map to `0`.
    pub fn audio_location_to_location_in_chapter(&self, absolute_frame: usize) -> usize {
        location_in_chapter(&self.active_verses(), absolute_frame)
    }

    /// Map a chapter-relative frame back to its absolute tape frame.
    ///
    /// With no active verses, `0` maps to `0` on an empty tape and to one
    /// frame past the tape end otherwise. Positions past the end of the
    /// chapter clamp to the last active frame.
    pub fn relative_chapter_to_absolute(&self, relative_frame: usize) -> usize {
        let verses = self.active_verses();
        chapter_to_absolute(&verses, self.tape.total_frames(), relative_frame)
    }

    /// Absolute `[first, last]` frames of the active verse carrying `marker`.
    pub fn get_range_of_marker(&self, marker: &Marker) -> Option<RangeInclusive<usize>> {
        let label = marker.formatted_label();
        self.state()
            .total_verses
            .iter()
            .filter(|v| v.placed)
            .find(|v| v.marker.formatted_label() == label)
            .map(|v| v.first_frame()..=v.last_frame())
    }

    // -----------------------------------------------------------------------
    // Compaction
    // -----------------------------------------------------------------------

    /// Rewrite the tape so it holds only active verses' current audio,
    /// contiguous and in slot order, then collapse every active verse to a
    /// single sector.
    ///
    /// Playback connections must be quiesced first. On failure the original
    /// tape and verse state are kept.
    pub fn trim(self: &Arc<Self>) -> Result<(), NarrationError> {
        let _guard = self.exclusive();
        if let Some(take) = self.state().open_take {
            return Err(NarrationError::TakeInProgress(take.verse_index));
        }
        log::info!("trimming chapter narration tape {}", self.tape.path().display());

        let staging = self.tape.staging_path();
        let replaced = self
            .write_compacted(&staging)
            .and_then(|()| self.tape.replace_with(&staging).map_err(NarrationError::from));
        if let Err(e) = replaced {
            let _ = std::fs::remove_file(&staging);
            log::error!("trim failed: {e}");
            return Err(e);
        }

        {
            let mut state = self.state();
            let mut start = 0;
            for verse in state.total_verses.iter_mut().filter(|v| v.placed) {
                let len = verse.len();
                if len == 0 {
                    log::warn!("{} is placed without audio; unplacing", verse.marker);
                    verse.clear();
                    continue;
                }
                verse.set_sectors(vec![Sector::new(start, start + len - 1)]);
                start += len;
            }
        }
        self.update_verses()
    }

    fn write_compacted(self: &Arc<Self>, staging: &Path) -> Result<(), NarrationError> {
        let frame_size = self.tape.frame_size_in_bytes();
        let expected = self.total_frames() * frame_size;
        let buffer_size = (self.trim_buffer_size / frame_size).max(1) * frame_size;

        let mut writer = BufWriter::new(File::create(staging)?);
        let reader = self.get_audio_file_reader(None, None);
        reader.open().map_err(|e| NarrationError::Trim(e.to_string()))?;
        reader.seek(0);

        let mut written = 0;
        let mut buffer = vec![0u8; buffer_size];
        while reader.has_remaining() {
            let read = reader
                .get_pcm_buffer(&mut buffer)
                .map_err(|e| NarrationError::Trim(e.to_string()))?;
            if read == 0 {
                break;
            }
            writer.write_all(&buffer[..read])?;
            written += read;
        }
        reader.release();

        let file = writer
            .into_inner()
            .map_err(|e| NarrationError::Trim(e.to_string()))?;
        file.sync_all()?;

        if written != expected {
            return Err(NarrationError::Trim(format!(
                "copied {written} of {expected} bytes"
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reader connections
    // -----------------------------------------------------------------------

    /// New independent reader over the chapter. `start` is an initial
    /// absolute frame; `end` is an absolute frame after which reading stops.
    ///
    /// `end` is only honoured while it lies inside an active verse at or
    /// after the cursor. An `end` in a dirty region, in a gap, or already
    /// behind the cursor leaves the reader unbounded.
    pub fn get_audio_file_reader(
        self: &Arc<Self>,
        start: Option<usize>,
        end: Option<usize>,
    ) -> ChapterConnection {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let connection = ChapterConnection::new(id, Arc::clone(self), start, end);
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, connection.cursor_handle()));
        connection
    }

    pub(crate) fn unregister_connection(&self, id: u64) {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(other, _)| *other != id);
    }

    /// Number of connections that have not been released.
    pub fn open_connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, cursor)| cursor.strong_count() > 0)
            .count()
    }

    /// Release every live connection. Safe to call repeatedly.
    pub fn close_connections(&self) {
        let live: Vec<(u64, Arc<Mutex<ReaderCursor>>)> = {
            let registry = self.connections.lock().unwrap_or_else(|e| e.into_inner());
            registry
                .iter()
                .filter_map(|(id, cursor)| cursor.upgrade().map(|c| (*id, c)))
                .collect()
        };
        for (id, cursor) in live {
            release_cursor(&cursor);
            self.unregister_connection(id);
        }
        // entries whose connection was dropped without release
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(_, cursor)| cursor.strong_count() > 0);
    }
}

// ---------------------------------------------------------------------------
// Helpers shared with connections
// ---------------------------------------------------------------------------

/// Verse slots for `info`: one per chunk, preceded by the chapter title and,
/// for chapter 1, the book title.
fn initialize_verses(info: &ChapterInfo) -> Vec<VerseNode> {
    let mut markers = Vec::with_capacity(info.verses.len() + 2);
    if info.chapter_number == 1 {
        markers.push(Marker::book(info.book_slug.clone(), 0));
    }
    markers.push(Marker::chapter(info.chapter_number, 0));
    markers.extend(
        info.verses
            .iter()
            .map(|&(start, end)| Marker::verse(start, end, 0)),
    );
    markers.into_iter().map(VerseNode::new).collect()
}

fn check_index(verses: &[VerseNode], index: usize) -> Result<(), NarrationError> {
    if index >= verses.len() {
        return Err(NarrationError::VerseOutOfRange {
            index,
            len: verses.len(),
        });
    }
    Ok(())
}

fn active_of(verses: &[VerseNode]) -> Vec<VerseNode> {
    verses.iter().filter(|v| v.placed).cloned().collect()
}

/// Chapter-relative position of `absolute_frame` within `verses` (active,
/// slot order), or `0` when no verse contains it.
pub(crate) fn location_in_chapter(verses: &[VerseNode], absolute_frame: usize) -> usize {
    let Some(index) = verses.iter().position(|v| v.contains(absolute_frame)) else {
        return 0;
    };
    let preceding: usize = verses[..index].iter().map(VerseNode::len).sum();
    preceding + verses[index].frames_to_position(absolute_frame)
}

/// Inverse of [`location_in_chapter`].
pub(crate) fn chapter_to_absolute(
    verses: &[VerseNode],
    tape_frames: usize,
    relative_frame: usize,
) -> usize {
    if relative_frame == 0 {
        return match verses.first() {
            Some(verse) => verse.first_frame(),
            None if tape_frames == 0 => 0,
            None => tape_frames + 1,
        };
    }

    // 1-based count of frames still to walk
    let mut remaining = relative_frame + 1;
    for sector in verses.iter().flat_map(|v| v.sectors()) {
        if sector.len() < remaining {
            remaining -= sector.len();
        } else {
            return sector.start + remaining - 1;
        }
    }

    log::debug!("relative frame {relative_frame} is past the chapter end; clamping");
    verses.last().map_or(tape_frames, VerseNode::last_frame)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
