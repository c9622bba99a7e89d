//! Audio storage primitives: the raw PCM scratch tape and the markers that
//! label positions on it.
//!
//! # Layout
//!
//! ```text
//! recorder ─► ScratchTape::append ─► chapter_narration.pcm (headerless PCM)
//!                                         ▲
//!             Marker { label, location } ─┘ (chapter-relative frames)
//! ```

pub mod marker;
pub mod tape;

pub use marker::{AudioCue, Marker};
pub use tape::{ScratchTape, TapeError, TapeFormat};
