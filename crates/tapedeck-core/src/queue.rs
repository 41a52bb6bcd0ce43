//! Bounded playback buffer between the decode thread and the output callback.
//!
//! - decode thread appends whole decoded frames (`push_frame`)
//! - the output callback copies out exactly what the device asked for (`fill`), padding with
//!   silence on underrun; it never waits
//! - the decode thread throttles itself against the high-watermark with short timed waits so
//!   it keeps observing stop/seek/pause requests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Compute a conservative capacity in **samples** for a `(rate, channels, seconds)` target.
///
/// - If `buffer_seconds` is non-finite or `<= 0.0`, one second is used.
/// - The returned value is `ceil(rate_hz * buffer_seconds) * channels` (saturating).
pub fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        1.0
    };

    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels)
}

/// Thread-safe sample queue with a time-based high-watermark.
///
/// Samples are interleaved. The format (rate/channels) is set once the first frame of a
/// session is decoded, via [`PlaybackBuffer::configure`].
pub struct PlaybackBuffer {
    inner: Mutex<BufferInner>,
    /// Signalled by the consumer after it drains samples.
    drained: Condvar,
    buffer_seconds: f32,
    low_watermark_ms: AtomicU64,
}

struct BufferInner {
    samples: VecDeque<f32>,
    sample_rate: u32,
    channels: usize,
    max_buffered_samples: usize,
}

impl PlaybackBuffer {
    pub fn new(buffer_seconds: f32) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                samples: VecDeque::new(),
                sample_rate: 0,
                channels: 1,
                max_buffered_samples: usize::MAX,
            }),
            drained: Condvar::new(),
            buffer_seconds,
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the stream format and size the high-watermark for it. Drops any buffered samples.
    pub fn configure(&self, sample_rate: u32, channels: u16) {
        let channels = usize::from(channels.max(1));
        let mut g = self.lock();
        g.samples.clear();
        g.sample_rate = sample_rate;
        g.channels = channels;
        g.max_buffered_samples = calc_max_buffered_samples(sample_rate, channels, self.buffer_seconds);
    }

    /// Append one decoded frame. Never blocks; callers throttle with [`wait_for_room`].
    ///
    /// [`wait_for_room`]: PlaybackBuffer::wait_for_room
    pub fn push_frame(&self, samples: &[f32]) {
        let mut g = self.lock();
        g.samples.extend(samples.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.lock().samples.is_empty()
    }

    /// Audio time still queued (not yet handed to the device).
    pub fn buffered_duration(&self) -> Duration {
        let g = self.lock();
        if g.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = g.samples.len() / g.channels;
        Duration::from_secs_f64(frames as f64 / f64::from(g.sample_rate))
    }

    /// Discard buffered samples (seek, preemption).
    pub fn clear(&self) {
        let mut g = self.lock();
        g.samples.clear();
        drop(g);
        self.drained.notify_all();
    }

    /// Wake any producer parked in a wait so it re-checks its cancel predicate.
    pub fn wake_waiters(&self) {
        let _g = self.lock();
        self.drained.notify_all();
    }

    /// Discard buffered samples and return the allocation (session teardown).
    pub fn release(&self) {
        let mut g = self.lock();
        g.samples = VecDeque::new();
        g.sample_rate = 0;
        g.max_buffered_samples = usize::MAX;
        drop(g);
        self.drained.notify_all();
    }

    /// Copy up to `dst.len()` samples into `dst`, scaled by `gain`; the remainder is silence.
    ///
    /// Returns the number of real samples written. Called from the realtime output callback:
    /// holds the lock only for the copy-out and never waits.
    pub fn fill(&self, dst: &mut [f32], gain: f32) -> usize {
        let mut g = self.lock();
        let take = dst.len().min(g.samples.len());
        for (out, s) in dst.iter_mut().zip(g.samples.drain(..take)) {
            *out = s * gain;
        }
        let queued = g.samples.len();
        let threshold = (g.max_buffered_samples / 8).max(g.channels * 16);
        drop(g);

        dst[take..].fill(0.0);
        if take > 0 {
            self.drained.notify_all();
            self.log_low_watermark(queued, threshold);
        }
        take
    }

    fn log_low_watermark(&self, queued: usize, threshold: usize) {
        if queued > 0 && queued < threshold {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_millis(0))
                .as_millis() as u64;
            let last = self.low_watermark_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last) > 1000 {
                self.low_watermark_ms.store(now, Ordering::Relaxed);
                tracing::info!(
                    queued_samples = queued,
                    threshold_samples = threshold,
                    "playback buffer low watermark"
                );
            }
        }
    }

    /// Wait while the buffer is above its high-watermark.
    ///
    /// Wakes at least every `poll` to re-check `keep_waiting`; returns `false` as soon as it
    /// says stop, `true` once there is room.
    pub fn wait_for_room(&self, poll: Duration, keep_waiting: impl Fn() -> bool) -> bool {
        let mut g = self.lock();
        loop {
            if g.samples.len() <= g.max_buffered_samples {
                return true;
            }
            if !keep_waiting() {
                return false;
            }
            let (ng, _timeout) = self
                .drained
                .wait_timeout(g, poll)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }

    /// Wait until the consumer has drained everything.
    ///
    /// Same polling contract as [`wait_for_room`](PlaybackBuffer::wait_for_room).
    pub fn wait_until_drained(&self, poll: Duration, keep_waiting: impl Fn() -> bool) -> bool {
        let mut g = self.lock();
        loop {
            if g.samples.is_empty() {
                return true;
            }
            if !keep_waiting() {
                return false;
            }
            let (ng, _timeout) = self
                .drained
                .wait_timeout(g, poll)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn calc_max_buffered_samples_fallbacks() {
        assert_eq!(calc_max_buffered_samples(44_100, 2, 1.0), 88_200);
        assert_eq!(calc_max_buffered_samples(44_100, 2, -1.0), 88_200);
        assert_eq!(calc_max_buffered_samples(44_100, 2, f32::NAN), 88_200);
        assert_eq!(calc_max_buffered_samples(48_000, 1, 0.5), 24_000);
    }

    #[test]
    fn fill_pads_with_silence_on_underrun() {
        let buf = PlaybackBuffer::new(1.0);
        buf.configure(8_000, 2);
        buf.push_frame(&[0.5, -0.5, 0.25, -0.25]);

        let mut dst = [9.0f32; 8];
        let written = buf.fill(&mut dst, 1.0);
        assert_eq!(written, 4);
        assert_eq!(dst, [0.5, -0.5, 0.25, -0.25, 0.0, 0.0, 0.0, 0.0]);
        assert!(buf.is_empty());
    }

    #[test]
    fn fill_takes_exactly_the_request_in_order_and_applies_gain() {
        let buf = PlaybackBuffer::new(1.0);
        buf.configure(8_000, 1);
        buf.push_frame(&[1.0, 2.0, 3.0]);
        buf.push_frame(&[4.0, 5.0]);

        let mut dst = [0.0f32; 2];
        assert_eq!(buf.fill(&mut dst, 0.5), 2);
        assert_eq!(dst, [0.5, 1.0]);
        assert_eq!(buf.buffered_duration(), Duration::from_secs_f64(3.0 / 8_000.0));

        let mut dst = [0.0f32; 3];
        assert_eq!(buf.fill(&mut dst, 1.0), 3);
        assert_eq!(dst, [3.0, 4.0, 5.0]);
    }

    #[test]
    fn producer_stalls_only_above_high_watermark() {
        let buf = PlaybackBuffer::new(1.0);
        buf.configure(4, 1);
        buf.push_frame(&[0.0; 4]);
        assert!(buf.wait_for_room(Duration::from_millis(1), || false));
        buf.push_frame(&[0.0; 2]);
        assert!(!buf.wait_for_room(Duration::from_millis(1), || false));
        assert_eq!(buf.buffered_duration(), Duration::from_secs_f64(1.5));
    }

    #[test]
    fn wait_for_room_returns_false_when_cancelled() {
        let buf = PlaybackBuffer::new(1.0);
        buf.configure(2, 1);
        buf.push_frame(&[0.0; 8]);
        let stop = AtomicBool::new(true);
        assert!(!buf.wait_for_room(Duration::from_millis(1), || !stop.load(Ordering::Relaxed)));
    }

    #[test]
    fn wait_for_room_wakes_when_consumer_drains() {
        let buf = Arc::new(PlaybackBuffer::new(1.0));
        buf.configure(2, 1);
        buf.push_frame(&[0.0; 8]);

        let consumer = buf.clone();
        let handle = thread::spawn(move || {
            let mut dst = [0.0f32; 8];
            thread::sleep(Duration::from_millis(10));
            consumer.fill(&mut dst, 1.0);
        });

        assert!(buf.wait_for_room(Duration::from_millis(5), || true));
        handle.join().unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn wait_until_drained_respects_cancel_and_completion() {
        let buf = PlaybackBuffer::new(1.0);
        buf.configure(8_000, 1);
        assert!(buf.wait_until_drained(Duration::from_millis(1), || false));
        buf.push_frame(&[1.0]);
        assert!(!buf.wait_until_drained(Duration::from_millis(1), || false));
    }

    #[test]
    fn release_resets_format_and_contents() {
        let buf = PlaybackBuffer::new(1.0);
        buf.configure(8_000, 2);
        buf.push_frame(&[1.0, 1.0]);
        buf.release();
        assert!(buf.is_empty());
        assert_eq!(buf.buffered_duration(), Duration::ZERO);
        buf.push_frame(&[0.0; 64]);
        assert!(buf.wait_for_room(Duration::from_millis(1), || false));
    }
}
