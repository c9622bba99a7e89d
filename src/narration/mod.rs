//! Chapter narration engine.
//!
//! One chapter is recorded onto a single append-only scratch tape. Each verse
//! slot remembers which frames of the tape hold its current take
//! ([`VerseNode`]); [`ChapterRepresentation`] keeps those slots, maps between
//! tape and chapter coordinates, persists them for crash recovery and
//! compacts the tape on demand. Playback goes through independent
//! [`ChapterConnection`]s that read only clean audio.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use chapter_narration::config::NarrationConfig;
//! use chapter_narration::narration::{AudioFileReader, ChapterInfo, ChapterRepresentation};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let info = ChapterInfo {
//!     book_slug: "gen".into(),
//!     chapter_number: 1,
//!     verses: (1..=31).map(|v| (v, v)).collect(),
//! };
//! let chapter = ChapterRepresentation::new(info, "ch1".as_ref(), &NarrationConfig::default())?;
//! chapter.load_from_serialized_verses();
//!
//! chapter.begin_verse(2)?;
//! chapter.tape().append(&[0u8; 88_200])?; // one second of 16-bit mono
//! chapter.finalize_verse(2, None)?;
//!
//! let reader = chapter.get_audio_file_reader(None, None);
//! reader.open()?;
//! # Ok(())
//! # }
//! ```

pub mod chapter;
pub mod connection;
pub mod history;
pub mod verse_node;

pub use chapter::{ChapterInfo, ChapterRepresentation, NarrationError};
pub use connection::{AudioFileReader, ChapterConnection, ReaderError};
pub use history::NarrationHistory;
pub use verse_node::{Sector, VerseNode};
