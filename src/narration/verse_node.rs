//! Position of one verse on the scratch tape.
//!
//! A verse is recorded as one or more [`Sector`]s: inclusive frame ranges on
//! the tape, sorted and pairwise disjoint. Audio belonging to other verses
//! (or to superseded takes) may sit between two sectors of the same verse, so
//! every read or position query walks the sector list instead of assuming a
//! contiguous span.
//!
//! ```rust
//! use chapter_narration::audio::Marker;
//! use chapter_narration::narration::{Sector, VerseNode};
//!
//! let mut verse = VerseNode::new(Marker::verse(1, 1, 0));
//! verse.append_sector(Sector::new(0, 9));
//! verse.append_sector(Sector::new(20, 29));
//!
//! assert_eq!(verse.len(), 20);
//! assert_eq!(
//!     verse.sectors_from_offset(8, 5),
//!     vec![Sector::new(8, 9), Sector::new(20, 22)]
//! );
//! ```

use serde::{Deserialize, Serialize};

use crate::audio::Marker;

// ---------------------------------------------------------------------------
// Sector
// ---------------------------------------------------------------------------

/// Inclusive frame range `[start, end]` on the tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sector {
    pub start: usize,
    pub end: usize,
}

impl Sector {
    /// Build a sector; bounds are swapped if given in reverse.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// Number of frames covered (never zero).
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, frame: usize) -> bool {
        (self.start..=self.end).contains(&frame)
    }
}

// ---------------------------------------------------------------------------
// VerseNode
// ---------------------------------------------------------------------------

/// Mutable record of where one verse slot lives on the tape.
///
/// Invariant: `placed` holds exactly when `sectors` is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerseNode {
    pub placed: bool,
    pub marker: Marker,
    #[serde(default)]
    sectors: Vec<Sector>,
}

impl VerseNode {
    /// A new, unplaced slot.
    pub fn new(marker: Marker) -> Self {
        Self {
            placed: false,
            marker,
            sectors: Vec::new(),
        }
    }

    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    /// Total frames across all sectors.
    pub fn len(&self) -> usize {
        self.sectors.iter().map(Sector::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// First frame of the first sector, or `0` when there are none.
    pub fn first_frame(&self) -> usize {
        self.sectors.first().map_or(0, |s| s.start)
    }

    /// Last frame of the last sector, or `0` when there are none.
    pub fn last_frame(&self) -> usize {
        self.sectors.last().map_or(0, |s| s.end)
    }

    /// `true` when `frame` lies inside one of this verse's sectors.
    pub fn contains(&self, frame: usize) -> bool {
        self.sectors.iter().any(|s| s.contains(frame))
    }

    /// Offset of `absolute_frame` from the verse's first frame, counting only
    /// frames inside the verse's own sectors. Returns `0` for frames outside
    /// the verse.
    pub fn frames_to_position(&self, absolute_frame: usize) -> usize {
        let mut offset = 0;
        for sector in &self.sectors {
            if sector.contains(absolute_frame) {
                return offset + (absolute_frame - sector.start);
            }
            offset += sector.len();
        }
        0
    }

    /// Minimal ordered run of sectors, clipped at both ends, covering at most
    /// `frames_to_read` frames from `absolute_frame`.
    ///
    /// Empty when `absolute_frame` is outside the verse.
    pub fn sectors_from_offset(&self, absolute_frame: usize, frames_to_read: usize) -> Vec<Sector> {
        let mut out = Vec::new();
        let Some(index) = self.sectors.iter().position(|s| s.contains(absolute_frame)) else {
            return out;
        };

        let mut remaining = frames_to_read;
        for sector in &self.sectors[index..] {
            if remaining == 0 {
                break;
            }
            let from = absolute_frame.max(sector.start);
            let take = remaining.min(sector.end - from + 1);
            out.push(Sector::new(from, from + take - 1));
            remaining -= take;
        }
        out
    }

    /// The frame that follows `frame` in this verse's reading order, jumping
    /// the gap to the next sector when `frame` ends one.
    pub fn next_frame_after(&self, frame: usize) -> Option<usize> {
        let sector = self.sectors.iter().find(|s| s.contains(frame))?;
        if frame < sector.end {
            Some(frame + 1)
        } else {
            self.sector_after(sector).map(|s| s.start)
        }
    }

    fn sector_after(&self, sector: &Sector) -> Option<&Sector> {
        self.sectors.iter().find(|s| s.start > sector.end)
    }

    /// Append a sector past the current last frame and mark the verse placed.
    ///
    /// Overlapping or out-of-order sectors are rejected and `false` returned.
    pub fn append_sector(&mut self, sector: Sector) -> bool {
        if !self.sectors.is_empty() && sector.start <= self.last_frame() {
            log::warn!(
                "rejecting sector {}..={} for {}: overlaps existing audio",
                sector.start,
                sector.end,
                self.marker
            );
            return false;
        }
        self.sectors.push(sector);
        self.placed = true;
        true
    }

    /// Replace every sector; the verse is placed iff `sectors` is non-empty.
    pub(crate) fn set_sectors(&mut self, sectors: Vec<Sector>) {
        self.placed = !sectors.is_empty();
        self.sectors = sectors;
    }

    /// Drop all sectors and mark the slot unplaced.
    pub fn clear(&mut self) {
        self.sectors.clear();
        self.placed = false;
    }

    /// Same sectors, marker relocated to `location`.
    pub fn copy_marker(&self, location: usize) -> VerseNode {
        VerseNode {
            placed: self.placed,
            marker: self.marker.with_location(location),
            sectors: self.sectors.clone(),
        }
    }

    /// Checks the sector invariants; used to vet deserialized state.
    pub fn is_consistent(&self) -> bool {
        if self.placed == self.sectors.is_empty() {
            return false;
        }
        self.sectors.iter().all(|s| s.start <= s.end)
            && self.sectors.windows(2).all(|pair| pair[0].end < pair[1].start)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
