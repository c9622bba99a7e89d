//! Chapter narration tape engine.
//!
//! Records verse-by-verse narration onto one scratch tape per chapter and
//! serves gap-free playback of the current takes.
//!
//! | Module        | Contents                                              |
//! |---------------|-------------------------------------------------------|
//! | [`audio`]     | PCM scratch tape, tape format, verse/chapter markers  |
//! | [`narration`] | verse slots, chapter coordinates, recovery, readers   |
//! | [`config`]    | `settings.toml` and platform directories              |

pub mod audio;
pub mod config;
pub mod narration;
