//! Undo/redo observer hook.
//!
//! The chapter does not implement undo itself; it reports every finalized
//! take to a [`NarrationHistory`] so an external component can snapshot the
//! verse slots and restore them later through
//! [`ChapterRepresentation::restore_verses`](super::ChapterRepresentation::restore_verses).

use super::VerseNode;

/// Receives a notification each time a verse take is finalized.
///
/// The chapter calls the hook with no lock held, so an implementation may
/// call back into it (for example `restore_verses`).
pub trait NarrationHistory: Send {
    /// `end` is the tape length in frames after the take; `verses` is every
    /// slot of the chapter in slot order.
    fn finalize_verse(&mut self, end: usize, verses: &[VerseNode]);
}

// Compile-time assertion: the hook must be usable as a trait object.
const _: fn() = || {
    fn _assert_object_safe(_: &mut dyn NarrationHistory) {}
};
