//! Decode thread.
//!
//! One long-lived thread pops tracks from the queue and runs one session at a time:
//! load bytes, decode frame by frame into the playback buffer, open the device lazily on the
//! first decoded frame, drain, tear down. Pause, seek and cancellation are observed at the top
//! of every iteration and inside every wait.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::duration::scan_duration;
use crate::frame::{DecodedFrame, FrameDecoder};
use crate::output::{OutputBackend, OutputStream, RenderFn, StreamFormat};
use crate::tag;

use super::PlayerEvent;
use super::seek::resolve_seek;
use super::shared::{QueuedTrack, Shared};

/// How a session ended.
enum SessionEnd {
    /// Natural end of stream.
    Finished,
    /// Superseded by `play`/`stop`/`next` or shutdown.
    Cancelled,
}

/// Decode thread entry point.
pub(crate) fn run(
    shared: Arc<Shared>,
    backend: Arc<dyn OutputBackend>,
    mut decoder: Box<dyn FrameDecoder>,
) {
    while let Some((track, epoch)) = shared.next_track() {
        let path = track.path.clone();
        let result = Session::load(&shared, &*backend, &mut *decoder, track, epoch)
            .and_then(|mut session| {
                let end = session.run();
                session.teardown();
                end
            });
        decoder.reset();
        shared.buffer.release();
        shared.end_session();

        match result {
            Ok(SessionEnd::Finished) if shared.keep_playing(epoch) => {
                tracing::info!(path = ?path, "track finished");
                if shared.queue_len() == 0 {
                    shared.clear_timeline(epoch);
                }
                shared.emit(PlayerEvent::TrackFinished { path: path.clone() });
                shared.notify_finished(&path);
            }
            Ok(_) => {
                tracing::debug!(path = ?path, "session cancelled");
            }
            Err(e) => {
                tracing::warn!(path = ?path, "playback failed: {e:#}");
                if shared.queue_len() == 0 {
                    shared.clear_timeline(epoch);
                }
                shared.emit(PlayerEvent::TrackFailed {
                    path,
                    reason: format!("{e:#}"),
                });
            }
        }
    }
    tracing::debug!("decode thread exiting");
}

/// One live track: raw bytes, read cursor and the device opened for it.
struct Session<'a> {
    shared: &'a Arc<Shared>,
    backend: &'a dyn OutputBackend,
    decoder: &'a mut dyn FrameDecoder,
    epoch: u64,
    path: PathBuf,
    data: Vec<u8>,
    payload_start: usize,
    cursor: usize,
    duration: Duration,
    position: Duration,
    format: Option<StreamFormat>,
    stream: Option<Box<dyn OutputStream>>,
    skipped_bytes: usize,
}

impl<'a> Session<'a> {
    fn load(
        shared: &'a Arc<Shared>,
        backend: &'a dyn OutputBackend,
        decoder: &'a mut dyn FrameDecoder,
        track: QueuedTrack,
        epoch: u64,
    ) -> Result<Self> {
        let data = std::fs::read(&track.path).with_context(|| format!("read {:?}", track.path))?;
        let payload_start = tag::audio_payload_offset(&data);
        let duration = match track.duration {
            Some(d) => d,
            None => {
                let d = scan_duration(&data, decoder);
                decoder.reset();
                d
            }
        };

        if shared.start_timeline(epoch, &track.path, duration) {
            tracing::info!(
                path = ?track.path,
                bytes = data.len(),
                payload_start,
                duration_secs = duration.as_secs_f64(),
                "session start"
            );
            shared.emit(PlayerEvent::TrackStarted {
                path: track.path.clone(),
                duration,
            });
        }

        Ok(Self {
            shared,
            backend,
            decoder,
            epoch,
            path: track.path,
            data,
            payload_start,
            cursor: payload_start,
            duration,
            position: Duration::ZERO,
            format: None,
            stream: None,
            skipped_bytes: 0,
        })
    }

    fn keep_playing(&self) -> bool {
        self.shared.keep_playing(self.epoch)
    }

    fn run(&mut self) -> Result<SessionEnd> {
        loop {
            if !self.keep_playing() {
                return Ok(SessionEnd::Cancelled);
            }
            if self.shared.is_paused() {
                self.hold_while_paused()?;
                continue;
            }
            if let Some(fraction) = self.shared.take_seek() {
                self.seek(fraction);
                continue;
            }

            if self.cursor >= self.data.len() {
                if self.stream.is_none() || self.drain() {
                    return Ok(SessionEnd::Finished);
                }
                continue;
            }

            self.decode_step()?;

            let shared = self.shared;
            let epoch = self.epoch;
            shared.buffer.wait_for_room(shared.config.fill_poll, || {
                shared.keep_playing(epoch) && !shared.is_paused() && !shared.seek_pending()
            });
        }
    }

    /// Decode one frame at the cursor and queue its samples.
    fn decode_step(&mut self) -> Result<()> {
        let out = self.decoder.decode_frame(&self.data[self.cursor..]);
        if out.consumed == 0 {
            self.cursor += 1;
            self.skipped_bytes += 1;
            return Ok(());
        }
        self.cursor += out.consumed;

        let Some(frame) = out.frame else {
            return Ok(());
        };
        if frame.samples.is_empty() {
            return Ok(());
        }
        let format = StreamFormat {
            sample_rate: frame.sample_rate,
            channels: frame.channels,
        };
        match self.format {
            None => self.open_output(format)?,
            Some(current) if current != format => {
                tracing::debug!(
                    rate_hz = frame.sample_rate,
                    channels = frame.channels,
                    "dropping frame with mismatched format"
                );
                return Ok(());
            }
            Some(_) => {}
        }

        self.shared.buffer.push_frame(&frame.samples);
        self.position += frame_duration(&frame);
        self.shared.set_position(self.epoch, self.position);
        Ok(())
    }

    /// Size the buffer for the first frame's format and open the device.
    fn open_output(&mut self, format: StreamFormat) -> Result<()> {
        self.shared.buffer.configure(format.sample_rate, format.channels);
        let stream = self
            .backend
            .open(format, render_fn(Arc::clone(self.shared), self.epoch))
            .with_context(|| {
                format!(
                    "open output at {} Hz, {} channel(s)",
                    format.sample_rate, format.channels
                )
            })?;
        if self.shared.is_paused() {
            stream.pause()?;
        }
        self.stream = Some(stream);
        self.format = Some(format);
        self.shared.set_device_open(true);
        tracing::info!(
            path = ?self.path,
            rate_hz = format.sample_rate,
            channels = format.channels,
            "output opened"
        );
        Ok(())
    }

    /// Wait for the consumer to empty the buffer. `false` if interrupted by pause/seek/cancel.
    fn drain(&self) -> bool {
        let shared = self.shared;
        let epoch = self.epoch;
        shared.buffer.wait_until_drained(shared.config.drain_poll, || {
            shared.keep_playing(epoch) && !shared.is_paused() && !shared.seek_pending()
        }) && self.keep_playing()
    }

    /// Stop the device and park until resumed, servicing seeks meanwhile.
    fn hold_while_paused(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.pause()?;
        }
        tracing::debug!(path = ?self.path, "paused");
        loop {
            self.shared.wait_while_paused(self.epoch);
            if let Some(fraction) = self.shared.take_seek() {
                self.seek(fraction);
                continue;
            }
            if !self.shared.is_paused() || !self.keep_playing() {
                break;
            }
        }
        if self.keep_playing() {
            if let Some(stream) = &self.stream {
                stream.resume()?;
            }
            tracing::debug!(path = ?self.path, "resumed");
        }
        Ok(())
    }

    /// Reposition the cursor and drop everything decoded before the seek.
    fn seek(&mut self, fraction: f64) {
        let point = resolve_seek(
            &self.data,
            self.payload_start,
            fraction,
            self.duration,
            &*self.decoder,
        );
        self.cursor = point.cursor;
        self.position = point.elapsed;
        self.shared.buffer.clear();
        self.decoder.reset();
        self.shared.set_position(self.epoch, self.position);
        tracing::info!(
            path = ?self.path,
            fraction,
            cursor = point.cursor,
            elapsed_secs = point.elapsed.as_secs_f64(),
            "seek"
        );
    }

    /// Close the device before anything else is released.
    fn teardown(&mut self) {
        if self.stream.take().is_some() {
            self.shared.set_device_open(false);
            tracing::info!(path = ?self.path, "output closed");
        }
        if self.skipped_bytes > 0 {
            tracing::debug!(
                path = ?self.path,
                skipped_bytes = self.skipped_bytes,
                "skipped non-frame bytes"
            );
        }
    }
}

fn frame_duration(frame: &DecodedFrame) -> Duration {
    if frame.sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frame.frames() as f64 / f64::from(frame.sample_rate))
}

/// Output callback: copy from the playback buffer, scaled by the current volume.
///
/// Emits silence without draining while paused or once the session is cancelled.
fn render_fn(shared: Arc<Shared>, epoch: u64) -> RenderFn {
    Box::new(move |dst: &mut [f32]| {
        if shared.is_paused() || !shared.keep_playing(epoch) {
            dst.fill(0.0);
            return;
        }
        let gain = f32::from(shared.volume()) / 100.0;
        shared.buffer.fill(dst, gain);
    })
}
