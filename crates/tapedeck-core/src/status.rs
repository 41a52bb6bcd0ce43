use std::path::PathBuf;
use std::time::Duration;

/// Coarse transport state. The output device is open exactly in `Playing` and `Paused`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Playing,
    Paused,
    /// A cancelled session is still tearing down.
    Stopping,
}

impl TransportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportState::Idle => "idle",
            TransportState::Playing => "playing",
            TransportState::Paused => "paused",
            TransportState::Stopping => "stopping",
        }
    }
}

/// Point-in-time view of the transport for polling UIs.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportStatus {
    pub state: TransportState,
    /// Track the timeline belongs to.
    pub now_playing: Option<PathBuf>,
    pub elapsed: Duration,
    /// Zero when nothing is loaded.
    pub duration: Duration,
    /// `elapsed / duration` clamped to `[0, 1]`.
    pub progress: f64,
    pub paused: bool,
    pub volume: u8,
    pub queued: usize,
}

/// `elapsed / duration` clamped to `[0, 1]`; zero duration means no progress.
pub fn progress_of(elapsed: Duration, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 0.0;
    }
    (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_clamped_and_zero_without_duration() {
        assert_eq!(progress_of(Duration::from_secs(3), Duration::ZERO), 0.0);
        assert_eq!(progress_of(Duration::from_secs(1), Duration::from_secs(4)), 0.25);
        assert_eq!(progress_of(Duration::from_secs(9), Duration::from_secs(4)), 1.0);
    }

    #[test]
    fn state_labels() {
        assert_eq!(TransportState::Paused.as_str(), "paused");
        assert_eq!(TransportState::Stopping.as_str(), "stopping");
    }
}
