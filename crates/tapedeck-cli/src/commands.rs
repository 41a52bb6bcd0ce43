//! Line commands read from stdin while playing.

use std::time::Duration;

use anyhow::{Result, anyhow, bail};

#[derive(Clone, Debug, PartialEq)]
pub enum ControlCommand {
    Pause,
    Stop,
    Next,
    /// Absolute seek, percent of the track.
    Seek(f64),
    /// Relative seek in seconds (negative rewinds).
    Skip(f64),
    Volume(i32),
    Status,
    Queue,
    /// Drop pending tracks, keep the current one.
    Clear,
    Quit,
}

pub const HELP: &str =
    "commands: pause | stop | next | seek <percent> | ff <secs> | rw <secs> | vol <0-100> | status | queue | clear | quit";

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<ControlCommand>> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();
    if parts.next().is_some() {
        bail!("too many arguments\n{HELP}");
    }

    let cmd = match (word.to_ascii_lowercase().as_str(), arg) {
        ("pause" | "p", None) => ControlCommand::Pause,
        ("stop", None) => ControlCommand::Stop,
        ("next" | "n", None) => ControlCommand::Next,
        ("status" | "s", None) => ControlCommand::Status,
        ("queue" | "q", None) => ControlCommand::Queue,
        ("clear", None) => ControlCommand::Clear,
        ("quit" | "exit", None) => ControlCommand::Quit,
        ("seek", Some(v)) => ControlCommand::Seek(number(v)?),
        ("ff", Some(v)) => ControlCommand::Skip(number(v)?),
        ("rw", Some(v)) => ControlCommand::Skip(-number(v)?),
        ("vol" | "volume", Some(v)) => ControlCommand::Volume(
            v.parse::<i32>()
                .map_err(|_| anyhow!("invalid volume: {v}"))?,
        ),
        _ => bail!("unknown command: {}\n{HELP}", line.trim()),
    };
    Ok(Some(cmd))
}

fn number(v: &str) -> Result<f64> {
    match v.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(anyhow!("invalid number: {v}")),
    }
}

/// `mm:ss`, minutes unbounded.
pub fn format_clock(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_arguments() {
        assert_eq!(parse_command("pause").unwrap(), Some(ControlCommand::Pause));
        assert_eq!(parse_command("  NEXT ").unwrap(), Some(ControlCommand::Next));
        assert_eq!(parse_command("seek 42.5").unwrap(), Some(ControlCommand::Seek(42.5)));
        assert_eq!(parse_command("ff 10").unwrap(), Some(ControlCommand::Skip(10.0)));
        assert_eq!(parse_command("rw 5").unwrap(), Some(ControlCommand::Skip(-5.0)));
        assert_eq!(parse_command("vol 120").unwrap(), Some(ControlCommand::Volume(120)));
        assert_eq!(parse_command("clear").unwrap(), Some(ControlCommand::Clear));
        assert_eq!(parse_command("quit").unwrap(), Some(ControlCommand::Quit));
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_command("seek").is_err());
        assert!(parse_command("seek abc").is_err());
        assert!(parse_command("seek inf").is_err());
        assert!(parse_command("vol 1.5").is_err());
        assert!(parse_command("pause now").is_err());
        assert!(parse_command("dance").is_err());
        assert!(parse_command("ff 1 2").is_err());
    }

    #[test]
    fn clock_formats_minutes_and_seconds() {
        assert_eq!(format_clock(Duration::ZERO), "00:00");
        assert_eq!(format_clock(Duration::from_millis(61_900)), "01:01");
        assert_eq!(format_clock(Duration::from_secs(3_725)), "62:05");
    }
}
