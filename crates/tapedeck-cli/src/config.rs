//! Configuration loading and merging.
//!
//! A TOML file supplies defaults; command-line flags override it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tapedeck_core::PlaybackConfig;

use crate::cli::Args;

/// Config file schema.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Directory scanned for playable tracks.
    pub music_dir: Option<PathBuf>,
    /// Output device substring match.
    pub device: Option<String>,
    /// Playback buffer high-watermark in seconds.
    pub buffer_seconds: Option<f32>,
    /// Initial volume (0-100).
    pub volume: Option<u8>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<FileConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Effective settings after merging file and flags.
#[derive(Debug)]
pub struct Settings {
    pub music_dir: PathBuf,
    pub playback: PlaybackConfig,
}

/// Merge `args` over `file`; `cwd` anchors the default and relative music directories.
pub fn resolve(args: &Args, file: FileConfig, cwd: &Path) -> Settings {
    let music_dir = args
        .music_dir
        .clone()
        .or(file.music_dir)
        .unwrap_or_else(|| PathBuf::from("music"));
    let music_dir = if music_dir.is_absolute() {
        music_dir
    } else {
        cwd.join(music_dir)
    };

    let defaults = PlaybackConfig::default();
    let playback = PlaybackConfig {
        device: args.device.clone().or(file.device),
        buffer_seconds: args
            .buffer_seconds
            .or(file.buffer_seconds)
            .unwrap_or(defaults.buffer_seconds),
        initial_volume: args
            .volume
            .or(file.volume)
            .unwrap_or(defaults.initial_volume)
            .min(100),
        ..defaults
    };

    Settings {
        music_dir,
        playback,
    }
}

/// Load the file named by `--config` (if any) and merge the flags over it.
pub fn load_settings(args: &Args) -> Result<Settings> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let cwd = std::env::current_dir().context("resolve working directory")?;
    Ok(resolve(args, file, &cwd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["tapedeck"];
        argv.extend_from_slice(extra);
        argv.push("list");
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn load_parses_all_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tapedeck.toml");
        std::fs::write(
            &path,
            "music_dir = \"/srv/music\"\ndevice = \"usb\"\nbuffer_seconds = 0.5\nvolume = 70\n",
        )
        .unwrap();

        let cfg = FileConfig::load(&path).unwrap();
        assert_eq!(
            cfg,
            FileConfig {
                music_dir: Some(PathBuf::from("/srv/music")),
                device: Some("usb".to_string()),
                buffer_seconds: Some(0.5),
                volume: Some(70),
            }
        );
    }

    #[test]
    fn load_reports_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileConfig::load(&dir.path().join("missing.toml")).is_err());

        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "volume = \"loud\"\n").unwrap();
        let err = FileConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parse config"));
    }

    #[test]
    fn defaults_use_music_under_cwd() {
        let s = resolve(&args(&[]), FileConfig::default(), Path::new("/home/me"));
        assert_eq!(s.music_dir, PathBuf::from("/home/me/music"));
        assert_eq!(s.playback.initial_volume, 100);
        assert_eq!(s.playback.buffer_seconds, 1.0);
        assert!(s.playback.device.is_none());
    }

    #[test]
    fn flags_override_file() {
        let file = FileConfig {
            music_dir: Some(PathBuf::from("tunes")),
            device: Some("hdmi".to_string()),
            buffer_seconds: Some(2.0),
            volume: Some(10),
        };
        let s = resolve(
            &args(&["--device", "usb", "--volume", "55"]),
            file,
            Path::new("/cwd"),
        );
        assert_eq!(s.music_dir, PathBuf::from("/cwd/tunes"));
        assert_eq!(s.playback.device.as_deref(), Some("usb"));
        assert_eq!(s.playback.initial_volume, 55);
        assert_eq!(s.playback.buffer_seconds, 2.0);
    }
}
