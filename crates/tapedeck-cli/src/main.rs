//! tapedeck: a terminal MP3 player.
//!
//! ## Modes
//! - `devices`: list output devices.
//! - `list`: list the tracks of the music directory by display name.
//! - `play`: play tracks back to back; transport commands are read line by line from stdin.

mod cli;
mod commands;
mod config;

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::{Receiver, select};
use tracing_subscriber::EnvFilter;

use commands::{ControlCommand, format_clock, parse_command};
use tapedeck_core::{Catalog, DirectoryCatalog, PlayerEvent, Transport, TransportStatus};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,tapedeck=info,tapedeck_core=info")
        }))
        .with_writer(std::io::stderr)
        .init();

    let settings = config::load_settings(&args)?;

    match &args.cmd {
        cli::Command::Devices => {
            for (i, name) in tapedeck_core::device::list_devices()?.iter().enumerate() {
                println!("#{i}: {name}");
            }
        }
        cli::Command::List => {
            let catalog = DirectoryCatalog::scan(&settings.music_dir)?;
            for entry in catalog.list() {
                println!("{}", entry.name);
            }
        }
        cli::Command::Play { tracks } => {
            let catalog = match DirectoryCatalog::scan(&settings.music_dir) {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::warn!("music directory unavailable: {e:#}");
                    None
                }
            };
            let paths: Vec<PathBuf> = tracks
                .iter()
                .map(|t| resolve_track(catalog.as_ref(), t))
                .collect();
            run_player(Transport::new(settings.playback)?, &paths)?;
        }
    }
    Ok(())
}

/// Catalog display name first, then a literal path.
fn resolve_track(catalog: Option<&DirectoryCatalog>, arg: &str) -> PathBuf {
    catalog
        .and_then(|c| c.resolve(arg))
        .unwrap_or_else(|| PathBuf::from(arg))
}

fn run_player(transport: Transport, paths: &[PathBuf]) -> Result<()> {
    let events = transport.subscribe();
    let lines = spawn_stdin_reader();
    let (sig_tx, sig_rx) = crossbeam_channel::bounded::<()>(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = sig_tx.try_send(());
    }) {
        tracing::warn!("ctrl-c handler not installed: {e}");
    }

    let Some((first, rest)) = paths.split_first() else {
        return Ok(());
    };
    transport.play(first);
    for path in rest {
        transport.enqueue(path);
    }
    println!("{}", commands::HELP);

    let mut stdin_open = true;
    loop {
        let input = if stdin_open {
            lines.clone()
        } else {
            crossbeam_channel::never()
        };
        let exit = select! {
            recv(events) -> ev => match ev {
                Ok(ev) => {
                    print_event(&ev);
                    !stdin_open && exhausted(&transport.status())
                }
                Err(_) => true,
            },
            recv(input) -> line => match line {
                Ok(line) => match parse_command(&line) {
                    Ok(Some(ControlCommand::Quit)) => true,
                    Ok(Some(cmd)) => {
                        apply(&transport, cmd);
                        false
                    }
                    Ok(None) => false,
                    Err(e) => {
                        println!("{e}");
                        false
                    }
                },
                Err(_) => {
                    stdin_open = false;
                    exhausted(&transport.status())
                }
            },
            recv(sig_rx) -> _ => {
                tracing::info!("interrupted");
                true
            }
        };
        if exit {
            break;
        }
    }

    transport.stop();
    Ok(())
}

/// Nothing playing and nothing queued.
fn exhausted(status: &TransportStatus) -> bool {
    status.now_playing.is_none() && status.queued == 0
}

fn apply(transport: &Transport, cmd: ControlCommand) {
    match cmd {
        ControlCommand::Pause => transport.pause(),
        ControlCommand::Stop => transport.stop(),
        ControlCommand::Next => transport.next(),
        ControlCommand::Seek(percent) => transport.seek_to(percent),
        ControlCommand::Skip(secs) => transport.seek_by(secs),
        ControlCommand::Volume(v) => {
            transport.change_volume(v);
            println!("volume {}", transport.volume());
        }
        ControlCommand::Status => print_status(&transport.status()),
        ControlCommand::Queue => {
            let queued = transport.queued();
            if queued.is_empty() {
                println!("queue empty");
            }
            for (i, path) in queued.iter().enumerate() {
                println!("{:>2}. {}", i + 1, tapedeck_core::tag::display_name(path));
            }
        }
        ControlCommand::Clear => {
            let dropped = transport.clear_queue();
            println!("cleared {dropped} queued track(s)");
        }
        ControlCommand::Quit => {}
    }
}

fn print_status(status: &TransportStatus) {
    let title = status
        .now_playing
        .as_deref()
        .map(tapedeck_core::tag::display_name)
        .unwrap_or_else(|| "-".to_string());
    println!(
        "[{}] {} {} / {} ({:.0}%) vol {} queued {}",
        status.state.as_str(),
        title,
        format_clock(status.elapsed),
        format_clock(status.duration),
        status.progress * 100.0,
        status.volume,
        status.queued
    );
}

fn print_event(ev: &PlayerEvent) {
    match ev {
        PlayerEvent::TrackStarted { path, duration } => println!(
            "> {} [{}]",
            tapedeck_core::tag::display_name(path),
            format_clock(*duration)
        ),
        PlayerEvent::TrackFinished { path } => {
            println!("finished {}", tapedeck_core::tag::display_name(path))
        }
        PlayerEvent::TrackFailed { path, reason } => {
            println!("failed {}: {reason}", path.display())
        }
    }
}

/// Forward stdin lines to a channel; the sender drops on EOF.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_track_prefers_catalog_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("song.mp3"), b"\xFF\xFB\x90\x00").unwrap();
        let catalog = DirectoryCatalog::scan(dir.path()).unwrap();

        assert_eq!(
            resolve_track(Some(&catalog), "song.mp3"),
            catalog.root().join("song.mp3")
        );
        assert_eq!(
            resolve_track(Some(&catalog), "elsewhere/x.mp3"),
            PathBuf::from("elsewhere/x.mp3")
        );
        assert_eq!(resolve_track(None, "song.mp3"), PathBuf::from("song.mp3"));
    }
}
