//! Narration settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and handed to every
//! chapter a project opens.
//!
//! ```toml
//! [tape]
//! sample_rate = 44100
//! channels = 1
//! bits_per_sample = 16
//!
//! [files]
//! tape_file = "chapter_narration.pcm"
//! recovery_file = "active_verses.json"
//!
//! [trim]
//! buffer_size = 8192
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::NarrationPaths;
use crate::audio::TapeFormat;

// ---------------------------------------------------------------------------
// FileNames
// ---------------------------------------------------------------------------

/// Names of the per-chapter files inside a chapter directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileNames {
    /// Raw PCM scratch tape.
    pub tape_file: String,
    /// JSON mirror of the active verse nodes.
    pub recovery_file: String,
}

impl Default for FileNames {
    fn default() -> Self {
        Self {
            tape_file: "chapter_narration.pcm".into(),
            recovery_file: "active_verses.json".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// TrimConfig
// ---------------------------------------------------------------------------

/// Compaction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    /// Copy buffer in bytes; rounded down to whole frames (at least one).
    pub buffer_size: usize,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self { buffer_size: 8192 }
    }
}

// ---------------------------------------------------------------------------
// NarrationConfig (top-level)
// ---------------------------------------------------------------------------

/// Root configuration, persisted to `settings.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    pub tape: TapeFormat,
    pub files: FileNames,
    pub trim: TrimConfig,
}

impl NarrationConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(NarrationConfig::default())` when the file does not exist
    /// yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&NarrationPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.tape.validate()?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&NarrationPaths::new().settings_file)
    }

    /// `true` when no `settings.toml` exists yet.
    pub fn is_first_run() -> bool {
        !NarrationPaths::new().settings_file.exists()
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
