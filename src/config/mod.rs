//! Configuration for chapter narration.
//!
//! Provides `NarrationConfig` (tape format, file names, trim settings),
//! `NarrationPaths` for cross-platform directories, and TOML persistence via
//! `NarrationConfig::load` / `NarrationConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::NarrationPaths;
pub use settings::{FileNames, NarrationConfig, TrimConfig};
