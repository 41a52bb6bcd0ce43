//! Transport controller: the public play/pause/stop/seek/volume surface.
//!
//! All methods are safe to call from any thread. Decoding happens on one background thread
//! (see `worker`); the output device pulls from the playback buffer on its own thread.

mod seek;
mod shared;
mod worker;


use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;

use crate::config::PlaybackConfig;
use crate::device::CpalOutput;
use crate::duration::compute_duration;
use crate::frame::{FrameDecoder, Mp3FrameDecoder};
use crate::output::OutputBackend;
use crate::status::{TransportState, TransportStatus, progress_of};

use self::seek::relative_fraction;
use self::shared::Shared;

/// Builds a fresh frame decoder (one for the decode thread, one per duration scan).
pub type DecoderFactory = Arc<dyn Fn() -> Result<Box<dyn FrameDecoder>> + Send + Sync>;

/// Lifecycle notifications, delivered on channels from [`Transport::subscribe`].
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    TrackStarted { path: PathBuf, duration: Duration },
    /// Natural end of stream.
    TrackFinished { path: PathBuf },
    /// The track could not be read or the device could not be opened.
    TrackFailed { path: PathBuf, reason: String },
}

/// Streaming MP3 transport.
pub struct Transport {
    shared: Arc<Shared>,
    decoders: DecoderFactory,
    worker: Option<JoinHandle<()>>,
}

impl Transport {
    /// Transport on the host audio device with the Symphonia MP3 decoder.
    pub fn new(config: PlaybackConfig) -> Result<Self> {
        let backend = CpalOutput::new(config.device.clone(), Some(config.device_buffer_frames));
        let decoders: DecoderFactory = Arc::new(|| {
            Mp3FrameDecoder::new().map(|d| Box::new(d) as Box<dyn FrameDecoder>)
        });
        Self::with_backend(config, Arc::new(backend), decoders)
    }

    /// Transport with an explicit output backend and decoder.
    pub fn with_backend(
        config: PlaybackConfig,
        backend: Arc<dyn OutputBackend>,
        decoders: DecoderFactory,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::new(config));
        let decoder = decoders().context("create frame decoder")?;
        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("tapedeck-decode".to_string())
            .spawn(move || worker::run(worker_shared, backend, decoder))
            .context("spawn decode thread")?;
        Ok(Self {
            shared,
            decoders,
            worker: Some(worker),
        })
    }

    /// Stop whatever is playing and play `path` next, ahead of anything queued.
    ///
    /// Returns once the previous session is torn down. The duration is known on return.
    pub fn play(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        let duration = self.measure_duration(&path);
        let epoch = self.shared.preempt_with(path.clone(), duration);
        tracing::info!(path = ?path, duration_secs = duration.as_secs_f64(), "play");
        self.shared.reset_timeline(epoch, Some(path), duration);
        self.shared.clear_seek();
        self.shared.set_paused(false);
        self.shared.wake_all();
        self.shared.wait_for_teardown(epoch);
    }

    /// Append `path` to the queue; starts playback if idle.
    pub fn enqueue(&self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        tracing::debug!(path = ?path, "enqueue");
        self.shared.push_back(path);
    }

    /// Skip to the next queued track without a finished notification.
    pub fn next(&self) {
        let epoch = self.shared.cancel(false);
        self.shared.clear_seek();
        self.shared.set_paused(false);
        self.shared.wake_all();
        self.shared.wait_for_teardown(epoch);
        if self.shared.queue_len() == 0 && self.shared.live_session().is_none() {
            self.shared.reset_timeline(epoch, None, Duration::ZERO);
        }
    }

    /// Halt playback, drop the queue and reset the timeline. Idempotent.
    pub fn stop(&self) {
        let epoch = self.shared.cancel(true);
        self.shared.reset_timeline(epoch, None, Duration::ZERO);
        self.shared.clear_seek();
        self.shared.set_paused(false);
        self.shared.wake_all();
        self.shared.wait_for_teardown(epoch);
    }

    /// Toggle pause. No-op when nothing is loaded.
    pub fn pause(&self) {
        if self.shared.timeline().track.is_none() {
            return;
        }
        let paused = self.shared.toggle_paused();
        tracing::info!(paused, "pause toggled");
    }

    /// Jump to `percent` (0..=100) of the current track, landing on the next frame boundary.
    pub fn seek_to(&self, percent: f64) {
        if self.shared.timeline().track.is_none() {
            return;
        }
        let fraction = if percent.is_finite() {
            (percent / 100.0).clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.shared.request_seek(fraction);
    }

    /// Seek relative to the current position; the target is clamped to the track.
    pub fn seek_by(&self, delta_secs: f64) {
        let timeline = self.shared.timeline();
        if timeline.track.is_none() {
            return;
        }
        let fraction = relative_fraction(self.elapsed(), delta_secs, timeline.duration);
        self.shared.request_seek(fraction);
    }

    /// Set the volume, clamped to `0..=100`.
    pub fn change_volume(&self, volume: i32) {
        let v = volume.clamp(0, 100) as u8;
        self.shared.set_volume(v);
    }

    pub fn volume(&self) -> u8 {
        self.shared.volume()
    }

    pub fn paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Audible position: decoded position minus what is still buffered.
    pub fn elapsed(&self) -> Duration {
        let timeline = self.shared.timeline();
        if timeline.track.is_none() {
            return Duration::ZERO;
        }
        let audible = timeline
            .position
            .saturating_sub(self.shared.buffer.buffered_duration());
        if timeline.duration.is_zero() {
            audible
        } else {
            audible.min(timeline.duration)
        }
    }

    /// Total duration of the current track; zero when nothing is loaded.
    pub fn duration(&self) -> Duration {
        self.shared.timeline().duration
    }

    /// `elapsed / duration` clamped to `[0, 1]`.
    pub fn progress(&self) -> f64 {
        progress_of(self.elapsed(), self.duration())
    }

    pub fn now_playing(&self) -> Option<PathBuf> {
        self.shared.timeline().track
    }

    pub fn queued(&self) -> Vec<PathBuf> {
        self.shared.queued()
    }

    /// Drop pending tracks; returns how many were removed.
    pub fn clear_queue(&self) -> usize {
        self.shared.clear_queue()
    }

    pub fn state(&self) -> TransportState {
        match self.shared.live_session() {
            Some(epoch) if epoch != self.shared.current_epoch() => TransportState::Stopping,
            Some(_) if self.shared.device_open() => {
                if self.shared.is_paused() {
                    TransportState::Paused
                } else {
                    TransportState::Playing
                }
            }
            _ => TransportState::Idle,
        }
    }

    pub fn status(&self) -> TransportStatus {
        let elapsed = self.elapsed();
        let timeline = self.shared.timeline();
        TransportStatus {
            state: self.state(),
            now_playing: timeline.track,
            elapsed,
            duration: timeline.duration,
            progress: progress_of(elapsed, timeline.duration),
            paused: self.paused(),
            volume: self.volume(),
            queued: self.shared.queue_len(),
        }
    }

    /// Register the natural end-of-stream observer, replacing any previous one.
    ///
    /// Runs on the decode thread after the session is torn down, so it may call `play`.
    pub fn on_track_finished(&self, callback: impl FnMut(&Path) + Send + 'static) {
        self.shared.set_finished_callback(Box::new(callback));
    }

    /// Receive lifecycle events on a channel.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.shared.subscribe(tx);
        rx
    }

    fn measure_duration(&self, path: &Path) -> Duration {
        let result = (self.decoders)().and_then(|mut decoder| compute_duration(path, &mut *decoder));
        match result {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(path = ?path, "duration scan failed: {e:#}");
                Duration::ZERO
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shared.shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
