use std::time::Duration;

/// Playback tuning parameters shared by the decode thread and the output callback.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// High-watermark of the playback buffer, in seconds of audio.
    pub buffer_seconds: f32,
    /// Sleep slice used while the playback buffer is saturated.
    pub fill_poll: Duration,
    /// Sleep slice used while waiting for the final drain before teardown.
    pub drain_poll: Duration,
    /// Output device substring match (case-insensitive). `None` uses the host default.
    pub device: Option<String>,
    /// Requested device buffer size in frames, when the device advertises a range.
    pub device_buffer_frames: u32,
    /// Volume (0..=100) applied until the first `change_volume` call.
    pub initial_volume: u8,
}

impl Default for PlaybackConfig {
    /// Defaults tuned for low-latency seeking on common devices.
    fn default() -> Self {
        Self {
            buffer_seconds: 1.0,
            fill_poll: Duration::from_millis(5),
            drain_poll: Duration::from_millis(10),
            device: None,
            device_buffer_frames: 4096,
            initial_volume: 100,
        }
    }
}
