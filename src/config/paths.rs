//! Cross-platform narration paths using the `dirs` crate.
//!
//! Layout:
//!
//! Config dir (settings):
//!   Windows: %APPDATA%\chapter-narration\
//!   macOS:   ~/Library/Application Support/chapter-narration/
//!   Linux:   ~/.config/chapter-narration/
//!
//! Data dir (one directory per recorded chapter):
//!   Linux:   ~/.local/share/chapter-narration/projects/<book>/<chapter>/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct NarrationPaths {
    /// Directory for `settings.toml`.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Root under which chapter directories are created.
    pub projects_dir: PathBuf,
}

impl NarrationPaths {
    const APP_NAME: &'static str = "chapter-narration";

    /// Falls back to the current directory if the platform cannot provide a
    /// standard path.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            config_dir,
            projects_dir: data_dir.join("projects"),
        }
    }

    /// Directory holding the tape and recovery file of one chapter.
    pub fn chapter_dir(&self, book_slug: &str, chapter_number: u32) -> PathBuf {
        self.projects_dir
            .join(book_slug)
            .join(format!("{chapter_number:03}"))
    }
}

impl Default for NarrationPaths {
    fn default() -> Self {
        Self::new()
    }
}
