//! Point-in-time annotations placed on narration audio.
//!
//! A [`Marker`] is an immutable value: cloning produces an independent copy,
//! and relocating a marker ([`Marker::with_location`]) returns a new value.
//!
//! | Variant   | `label`     | `formatted_label`       |
//! |-----------|-------------|-------------------------|
//! | Verse     | `3` / `3-5` | `orature-vm-3-5`        |
//! | Chapter   | `1`         | `orature-chapter-1`     |
//! | Book      | `gen`       | `orature-book-gen`      |
//! | Chunk     | `2`         | `orature-chunk-2`       |
//! | Unknown   | anything    | same as `label`         |
//!
//! Markers serialize as a tagged union with an explicit `type` field:
//!
//! ```rust
//! use chapter_narration::audio::Marker;
//!
//! let marker = Marker::verse(3, 5, 0);
//! let json = serde_json::to_string(&marker).unwrap();
//! assert!(json.contains("\"type\":\"verse_marker\""));
//! assert_eq!(marker.formatted_label(), "orature-vm-3-5");
//! ```

use serde::{Deserialize, Serialize};

const VERSE_PREFIX: &str = "orature-vm-";
const CHAPTER_PREFIX: &str = "orature-chapter-";
const BOOK_PREFIX: &str = "orature-book-";
const CHUNK_PREFIX: &str = "orature-chunk-";

// ---------------------------------------------------------------------------
// AudioCue
// ---------------------------------------------------------------------------

/// A raw cue point as stored in audio file metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioCue {
    /// Frame position of the cue.
    pub location: usize,
    /// Namespaced label (e.g. `orature-vm-1`).
    pub label: String,
}

// ---------------------------------------------------------------------------
// Marker
// ---------------------------------------------------------------------------

/// A labelled position in narration audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Marker {
    /// A verse or verse range; `end >= start`.
    VerseMarker { start: u32, end: u32, location: usize },
    /// Chapter title anchor.
    ChapterMarker { number: u32, location: usize },
    /// Book title anchor, only present in the first chapter.
    BookMarker { slug: String, location: usize },
    /// A chunk boundary.
    ChunkMarker { chunk: u32, location: usize },
    /// A cue whose label did not match any known namespace.
    UnknownMarker { label: String, location: usize },
}

impl Marker {
    /// Verse marker for `start..=end`. A reversed range is normalised.
    pub fn verse(start: u32, end: u32, location: usize) -> Self {
        Marker::VerseMarker {
            start,
            end: end.max(start),
            location,
        }
    }

    pub fn chapter(number: u32, location: usize) -> Self {
        Marker::ChapterMarker { number, location }
    }

    pub fn book(slug: impl Into<String>, location: usize) -> Self {
        Marker::BookMarker {
            slug: slug.into(),
            location,
        }
    }

    pub fn chunk(chunk: u32, location: usize) -> Self {
        Marker::ChunkMarker { chunk, location }
    }

    pub fn unknown(label: impl Into<String>, location: usize) -> Self {
        Marker::UnknownMarker {
            label: label.into(),
            location,
        }
    }

    /// Bare identifier without namespacing, e.g. `"3"` or `"3-5"`.
    pub fn label(&self) -> String {
        match self {
            Marker::VerseMarker { start, end, .. } if start != end => format!("{start}-{end}"),
            Marker::VerseMarker { start, .. } => start.to_string(),
            Marker::ChapterMarker { number, .. } => number.to_string(),
            Marker::BookMarker { slug, .. } => slug.clone(),
            Marker::ChunkMarker { chunk, .. } => chunk.to_string(),
            Marker::UnknownMarker { label, .. } => label.clone(),
        }
    }

    /// Label with the variant's namespace prefix, e.g. `"orature-vm-3"`.
    pub fn formatted_label(&self) -> String {
        let prefix = match self {
            Marker::VerseMarker { .. } => VERSE_PREFIX,
            Marker::ChapterMarker { .. } => CHAPTER_PREFIX,
            Marker::BookMarker { .. } => BOOK_PREFIX,
            Marker::ChunkMarker { .. } => CHUNK_PREFIX,
            Marker::UnknownMarker { .. } => "",
        };
        format!("{prefix}{}", self.label())
    }

    pub fn location(&self) -> usize {
        match self {
            Marker::VerseMarker { location, .. }
            | Marker::ChapterMarker { location, .. }
            | Marker::BookMarker { location, .. }
            | Marker::ChunkMarker { location, .. }
            | Marker::UnknownMarker { location, .. } => *location,
        }
    }

    /// Copy of this marker moved to `location`.
    pub fn with_location(&self, location: usize) -> Self {
        let mut moved = self.clone();
        match &mut moved {
            Marker::VerseMarker { location: l, .. }
            | Marker::ChapterMarker { location: l, .. }
            | Marker::BookMarker { location: l, .. }
            | Marker::ChunkMarker { location: l, .. }
            | Marker::UnknownMarker { location: l, .. } => *l = location,
        }
        moved
    }

    pub fn to_cue(&self) -> AudioCue {
        AudioCue {
            location: self.location(),
            label: self.formatted_label(),
        }
    }

    /// Parse a namespaced cue back into a marker.
    ///
    /// Labels that carry a known prefix but an unparsable identifier, and
    /// labels with no known prefix, become [`Marker::UnknownMarker`].
    pub fn from_cue(cue: &AudioCue) -> Self {
        let location = cue.location;
        let label = cue.label.as_str();

        if let Some(rest) = label.strip_prefix(VERSE_PREFIX) {
            let parsed = match rest.split_once('-') {
                Some((s, e)) => s.parse().ok().zip(e.parse().ok()),
                None => rest.parse().ok().map(|v| (v, v)),
            };
            if let Some((start, end)) = parsed {
                if end >= start {
                    return Marker::verse(start, end, location);
                }
            }
        } else if let Some(rest) = label.strip_prefix(CHAPTER_PREFIX) {
            if let Ok(number) = rest.parse() {
                return Marker::chapter(number, location);
            }
        } else if let Some(rest) = label.strip_prefix(BOOK_PREFIX) {
            if !rest.is_empty() {
                return Marker::book(rest, location);
            }
        } else if let Some(rest) = label.strip_prefix(CHUNK_PREFIX) {
            if let Ok(chunk) = rest.parse() {
                return Marker::chunk(chunk, location);
            }
        }

        Marker::unknown(label, location)
    }
}

impl std::fmt::Display for Marker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.formatted_label())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Labels ------------------------------------------------------------

    #[test]
    fn single_verse_label() {
        let m = Marker::verse(3, 3, 0);
        assert_eq!(m.label(), "3");
        assert_eq!(m.formatted_label(), "orature-vm-3");
    }

    #[test]
    fn verse_range_label() {
        let m = Marker::verse(3, 5, 0);
        assert_eq!(m.label(), "3-5");
        assert_eq!(m.formatted_label(), "orature-vm-3-5");
    }

    #[test]
    fn reversed_verse_range_is_normalised() {
        assert_eq!(Marker::verse(7, 2, 0), Marker::verse(7, 7, 0));
    }

    #[test]
    fn namespaced_labels_per_variant() {
        assert_eq!(Marker::chapter(12, 0).formatted_label(), "orature-chapter-12");
        assert_eq!(Marker::book("gen", 0).formatted_label(), "orature-book-gen");
        assert_eq!(Marker::chunk(4, 0).formatted_label(), "orature-chunk-4");
        assert_eq!(Marker::unknown("cue-x", 0).formatted_label(), "cue-x");
    }

    // ---- Location ----------------------------------------------------------

    #[test]
    fn with_location_leaves_original_untouched() {
        let original = Marker::book("mat", 10);
        let moved = original.with_location(500);
        assert_eq!(original.location(), 10);
        assert_eq!(moved.location(), 500);
        assert_eq!(moved.label(), "mat");
    }

    // ---- Cues --------------------------------------------------------------

    #[test]
    fn cue_parses_back_into_variant() {
        for marker in [
            Marker::verse(1, 1, 10),
            Marker::verse(4, 6, 20),
            Marker::chapter(2, 30),
            Marker::book("rev", 40),
            Marker::chunk(9, 50),
        ] {
            assert_eq!(Marker::from_cue(&marker.to_cue()), marker);
        }
    }

    #[test]
    fn malformed_cue_becomes_unknown() {
        let cue = AudioCue {
            location: 5,
            label: "orature-vm-abc".into(),
        };
        assert_eq!(Marker::from_cue(&cue), Marker::unknown("orature-vm-abc", 5));

        let cue = AudioCue {
            location: 5,
            label: "orature-vm-9-2".into(),
        };
        assert!(matches!(Marker::from_cue(&cue), Marker::UnknownMarker { .. }));
    }

    // ---- Serialization -----------------------------------------------------

    #[test]
    fn json_carries_type_discriminant() {
        let json = serde_json::to_string(&Marker::chapter(1, 0)).unwrap();
        assert_eq!(json, r#"{"type":"chapter_marker","number":1,"location":0}"#);

        let decoded: Marker =
            serde_json::from_str(r#"{"type":"book_marker","slug":"gen","location":7}"#).unwrap();
        assert_eq!(decoded, Marker::book("gen", 7));
    }

    #[test]
    fn unknown_discriminant_is_rejected() {
        let result = serde_json::from_str::<Marker>(r#"{"type":"tempo_marker","location":0}"#);
        assert!(result.is_err());
    }
}
