//! `chapter-narration`: inspect, recover and compact a recorded chapter.
//!
//! ```text
//! chapter-narration <chapter-dir|-> <book-slug> <chapter> <verse-count> [trim]
//! ```
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`NarrationConfig`] from disk; on first run write the defaults.
//! 3. Open the chapter (`-` resolves the directory under the platform data
//!    dir) and restore verse state from its recovery file.
//! 4. Print per-verse placement and the marker ranges on the tape.
//! 5. Optionally trim the tape.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chapter_narration::{
    config::{NarrationConfig, NarrationPaths},
    narration::{ChapterInfo, ChapterRepresentation},
};

const USAGE: &str = "usage: chapter-narration <chapter-dir|-> <book-slug> <chapter> <verse-count> [trim]";

/// Parsed command line.
struct Args {
    chapter_dir: Option<PathBuf>,
    info: ChapterInfo,
    trim: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let (Some(dir), Some(book_slug), Some(chapter), Some(count)) =
        (args.next(), args.next(), args.next(), args.next())
    else {
        bail!(USAGE);
    };
    let chapter_number: u32 = chapter
        .parse()
        .with_context(|| format!("invalid chapter number {chapter:?}"))?;
    let verse_count: u32 = count
        .parse()
        .with_context(|| format!("invalid verse count {count:?}"))?;

    let trim = match args.next().as_deref() {
        None => false,
        Some("trim") => true,
        Some(other) => bail!("unexpected argument {other:?}\n{USAGE}"),
    };

    Ok(Args {
        chapter_dir: (dir != "-").then(|| PathBuf::from(dir)),
        info: ChapterInfo {
            book_slug,
            chapter_number,
            verses: (1..=verse_count).map(|v| (v, v)).collect(),
        },
        trim,
    })
}

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 2. Config
    let config = NarrationConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        NarrationConfig::default()
    });
    if NarrationConfig::is_first_run() {
        match config.save() {
            Ok(()) => log::info!("wrote default settings.toml"),
            Err(e) => log::warn!("Failed to write default config: {e}"),
        }
    }

    // 3. Chapter
    let args = parse_args(std::env::args().skip(1))?;
    let chapter_dir = args.chapter_dir.unwrap_or_else(|| {
        NarrationPaths::new().chapter_dir(&args.info.book_slug, args.info.chapter_number)
    });
    let chapter = ChapterRepresentation::new(args.info, &chapter_dir, &config)
        .with_context(|| format!("cannot open chapter in {}", chapter_dir.display()))?;
    let restored = chapter.load_from_serialized_verses();
    log::info!("restored {restored} verse(s) from {}", chapter.recovery_file().display());

    // 4. Report
    let sample_rate = chapter.format().sample_rate as f64;
    for (verse, recorded) in chapter.total_verses().iter().zip(chapter.verses_with_recordings()) {
        match chapter.get_range_of_marker(&verse.marker).filter(|_| recorded) {
            Some(range) => println!(
                "{:<24} frames {:>10}..={:<10} {:>8.2}s  {} sector(s)",
                verse.marker.formatted_label(),
                range.start(),
                range.end(),
                verse.len() as f64 / sample_rate,
                verse.sectors().len(),
            ),
            None => println!("{:<24} (not recorded)", verse.marker.formatted_label()),
        }
    }
    println!(
        "{:.0}% complete, {} clean of {} tape frames",
        chapter.completion_progress() * 100.0,
        chapter.total_frames(),
        chapter.tape().total_frames(),
    );

    // 5. Trim
    if args.trim {
        chapter.close_connections();
        chapter.trim().context("trim failed")?;
        println!("trimmed tape to {} frames", chapter.tape().total_frames());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_full_command_line() {
        let parsed = args(&["ch3", "gen", "3", "4", "trim"]).unwrap();
        assert_eq!(parsed.chapter_dir, Some(PathBuf::from("ch3")));
        assert_eq!(parsed.info.chapter_number, 3);
        assert_eq!(parsed.info.verses, vec![(1, 1), (2, 2), (3, 3), (4, 4)]);
        assert!(parsed.trim);
    }

    #[test]
    fn dash_selects_default_directory() {
        let parsed = args(&["-", "exo", "1", "2"]).unwrap();
        assert!(parsed.chapter_dir.is_none());
        assert!(!parsed.trim);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(args(&["ch", "gen"]).is_err());
        assert!(args(&["ch", "gen", "x", "2"]).is_err());
        assert!(args(&["ch", "gen", "1", "2", "purge"]).is_err());
    }
}
