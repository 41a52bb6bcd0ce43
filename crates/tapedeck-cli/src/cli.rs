use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tapedeck", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML config file (music_dir, device, buffer_seconds, volume)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory whose tracks can be played by display name (default: ./music)
    #[arg(long)]
    pub music_dir: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Playback buffer high-watermark in seconds
    #[arg(long)]
    pub buffer_seconds: Option<f32>,

    /// Initial volume (0-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: Option<u8>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List output devices and exit
    Devices,

    /// List tracks in the music directory and exit
    List,

    /// Play tracks back to back, reading transport commands from stdin
    Play {
        /// Display names from the music directory, or file paths
        #[arg(required = true)]
        tracks: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_with_overrides() {
        let args = Args::try_parse_from([
            "tapedeck",
            "--device",
            "usb",
            "--volume",
            "40",
            "play",
            "Artist - Song",
            "b.mp3",
        ])
        .unwrap();
        assert_eq!(args.device.as_deref(), Some("usb"));
        assert_eq!(args.volume, Some(40));
        match args.cmd {
            Command::Play { tracks } => assert_eq!(tracks, vec!["Artist - Song", "b.mp3"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_range_volume_and_empty_play() {
        assert!(Args::try_parse_from(["tapedeck", "--volume", "101", "list"]).is_err());
        assert!(Args::try_parse_from(["tapedeck", "play"]).is_err());
    }
}
