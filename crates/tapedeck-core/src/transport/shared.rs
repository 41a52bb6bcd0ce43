//! State shared by the control API, the decode thread and the output callback.
//!
//! Each field group has its own lock; none is held across decoding or I/O. Cancellation is by
//! epoch: every `play`/`stop`/`next` bumps the counter, and a session only keeps going while the
//! epoch it captured at start is still current.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::config::PlaybackConfig;
use crate::queue::PlaybackBuffer;

use super::PlayerEvent;

pub(crate) type FinishedCallback = Box<dyn FnMut(&Path) + Send + 'static>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A pending track. `duration` is known for `play()` requests, scanned at session start otherwise.
#[derive(Clone, Debug)]
pub(crate) struct QueuedTrack {
    pub path: PathBuf,
    pub duration: Option<Duration>,
    /// Epoch of the `play()` that placed it; `None` for enqueued tracks.
    pub requested_at: Option<u64>,
}

/// Position/duration pair owned by the session with matching `epoch`.
#[derive(Clone, Debug, Default)]
pub(crate) struct Timeline {
    pub epoch: u64,
    pub track: Option<PathBuf>,
    pub position: Duration,
    pub duration: Duration,
}

pub(crate) struct Shared {
    pub config: PlaybackConfig,
    pub buffer: Arc<PlaybackBuffer>,

    queue: Mutex<VecDeque<QueuedTrack>>,
    queue_cv: Condvar,

    epoch: AtomicU64,
    exit: AtomicBool,

    /// Epoch of the live session, if any.
    session: Mutex<Option<u64>>,
    session_cv: Condvar,
    device_open: AtomicBool,

    paused: AtomicBool,
    pause_lock: Mutex<()>,
    pause_cv: Condvar,

    seek_pending: AtomicBool,
    seek: Mutex<Option<f64>>,

    timeline: Mutex<Timeline>,
    volume: AtomicU8,

    finished: Mutex<Option<FinishedCallback>>,
    subscribers: Mutex<Vec<Sender<PlayerEvent>>>,
}

impl Shared {
    pub fn new(config: PlaybackConfig) -> Self {
        let buffer = Arc::new(PlaybackBuffer::new(config.buffer_seconds));
        let volume = config.initial_volume.min(100);
        Self {
            config,
            buffer,
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            epoch: AtomicU64::new(0),
            exit: AtomicBool::new(false),
            session: Mutex::new(None),
            session_cv: Condvar::new(),
            device_open: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            pause_lock: Mutex::new(()),
            pause_cv: Condvar::new(),
            seek_pending: AtomicBool::new(false),
            seek: Mutex::new(None),
            timeline: Mutex::new(Timeline::default()),
            volume: AtomicU8::new(volume),
            finished: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether the session started at `epoch` should keep going.
    pub fn keep_playing(&self, epoch: u64) -> bool {
        !self.exit.load(Ordering::SeqCst) && self.current_epoch() == epoch
    }

    pub fn is_exiting(&self) -> bool {
        self.exit.load(Ordering::SeqCst)
    }

    /// Cancel everything and make the decode thread return.
    pub fn shutdown(&self) {
        self.exit.store(true, Ordering::SeqCst);
        self.bump_epoch();
        self.wake_all();
    }

    /// Wake every wait the decode thread might be parked in.
    pub fn wake_all(&self) {
        {
            let _q = lock(&self.queue);
            self.queue_cv.notify_all();
        }
        {
            let _p = lock(&self.pause_lock);
            self.pause_cv.notify_all();
        }
        self.buffer.wake_waiters();
    }

    /// Cancel the current session and put `path` at the front. Returns the new epoch.
    ///
    /// An earlier `play()` the decode thread has not picked up yet is superseded too.
    pub fn preempt_with(&self, path: PathBuf, duration: Duration) -> u64 {
        let mut q = lock(&self.queue);
        let epoch = self.bump_epoch();
        q.retain(|t| t.requested_at.is_none());
        q.push_front(QueuedTrack {
            path,
            duration: Some(duration),
            requested_at: Some(epoch),
        });
        epoch
    }

    pub fn push_back(&self, path: PathBuf) {
        let mut q = lock(&self.queue);
        q.push_back(QueuedTrack {
            path,
            duration: None,
            requested_at: None,
        });
        self.queue_cv.notify_all();
    }

    /// Cancel the current session, optionally dropping everything still queued.
    pub fn cancel(&self, clear_queue: bool) -> u64 {
        let mut q = lock(&self.queue);
        if clear_queue {
            q.clear();
        }
        self.bump_epoch()
    }

    pub fn clear_queue(&self) -> usize {
        let mut q = lock(&self.queue);
        let n = q.len();
        q.clear();
        n
    }

    pub fn queued(&self) -> Vec<PathBuf> {
        lock(&self.queue).iter().map(|t| t.path.clone()).collect()
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Block until a track is queued, then mark its session live.
    ///
    /// Returns `None` once the transport is shutting down.
    pub fn next_track(&self) -> Option<(QueuedTrack, u64)> {
        let mut q = lock(&self.queue);
        loop {
            if self.is_exiting() {
                return None;
            }
            if let Some(track) = q.pop_front() {
                let epoch = self.current_epoch();
                *lock(&self.session) = Some(epoch);
                return Some((track, epoch));
            }
            q = self.queue_cv.wait(q).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn end_session(&self) {
        self.device_open.store(false, Ordering::SeqCst);
        let mut s = lock(&self.session);
        *s = None;
        self.session_cv.notify_all();
    }

    /// Wait until no session older than `epoch` is live.
    pub fn wait_for_teardown(&self, epoch: u64) {
        let mut s = lock(&self.session);
        while matches!(*s, Some(live) if live < epoch) && !self.is_exiting() {
            s = self
                .session_cv
                .wait_timeout(s, Duration::from_millis(50))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Epoch of the live session, if any.
    pub fn live_session(&self) -> Option<u64> {
        *lock(&self.session)
    }

    pub fn set_device_open(&self, open: bool) {
        self.device_open.store(open, Ordering::SeqCst);
    }

    pub fn device_open(&self) -> bool {
        self.device_open.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        let _p = lock(&self.pause_lock);
        self.pause_cv.notify_all();
    }

    /// Flip the pause flag; returns the new value.
    pub fn toggle_paused(&self) -> bool {
        let _p = lock(&self.pause_lock);
        let now = !self.paused.load(Ordering::SeqCst);
        self.paused.store(now, Ordering::SeqCst);
        self.pause_cv.notify_all();
        now
    }

    /// Park the decode thread while paused. Returns on resume, cancellation or a seek request.
    pub fn wait_while_paused(&self, epoch: u64) {
        let mut g = lock(&self.pause_lock);
        while self.is_paused() && self.keep_playing(epoch) && !self.seek_pending() {
            g = self.pause_cv.wait(g).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn request_seek(&self, fraction: f64) {
        *lock(&self.seek) = Some(fraction);
        self.seek_pending.store(true, Ordering::SeqCst);
        let _p = lock(&self.pause_lock);
        self.pause_cv.notify_all();
    }

    pub fn seek_pending(&self) -> bool {
        self.seek_pending.load(Ordering::SeqCst)
    }

    pub fn take_seek(&self) -> Option<f64> {
        let mut s = lock(&self.seek);
        self.seek_pending.store(false, Ordering::SeqCst);
        s.take()
    }

    pub fn clear_seek(&self) {
        let _ = self.take_seek();
    }

    pub fn timeline(&self) -> Timeline {
        lock(&self.timeline).clone()
    }

    /// Replace the timeline unconditionally (control thread, after bumping the epoch).
    pub fn reset_timeline(&self, epoch: u64, track: Option<PathBuf>, duration: Duration) {
        let mut t = lock(&self.timeline);
        if t.epoch > epoch {
            return;
        }
        *t = Timeline {
            epoch,
            track,
            position: Duration::ZERO,
            duration,
        };
    }

    /// Session start: claim the timeline if `epoch` is still current.
    pub fn start_timeline(&self, epoch: u64, track: &Path, duration: Duration) -> bool {
        let mut t = lock(&self.timeline);
        if !self.keep_playing(epoch) {
            return false;
        }
        *t = Timeline {
            epoch,
            track: Some(track.to_path_buf()),
            position: Duration::ZERO,
            duration,
        };
        true
    }

    /// Move the decoded position of the session owning the timeline.
    pub fn set_position(&self, epoch: u64, position: Duration) {
        let mut t = lock(&self.timeline);
        if t.epoch == epoch && self.keep_playing(epoch) {
            t.position = position;
        }
    }

    /// Clear the timeline if it still belongs to `epoch`.
    pub fn clear_timeline(&self, epoch: u64) {
        let mut t = lock(&self.timeline);
        if t.epoch == epoch && self.current_epoch() == epoch {
            *t = Timeline {
                epoch,
                ..Timeline::default()
            };
        }
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn set_volume(&self, volume: u8) {
        self.volume.store(volume.min(100), Ordering::Relaxed);
    }

    pub fn set_finished_callback(&self, cb: FinishedCallback) {
        *lock(&self.finished) = Some(cb);
    }

    /// Invoke the finished observer without holding its lock, so it may re-register or `play()`.
    pub fn notify_finished(&self, path: &Path) {
        let taken = lock(&self.finished).take();
        if let Some(mut cb) = taken {
            cb(path);
            let mut slot = lock(&self.finished);
            if slot.is_none() {
                *slot = Some(cb);
            }
        }
    }

    pub fn subscribe(&self, tx: Sender<PlayerEvent>) {
        lock(&self.subscribers).push(tx);
    }

    /// Send to every subscriber, dropping the ones that hung up.
    pub fn emit(&self, event: PlayerEvent) {
        let mut subs = lock(&self.subscribers);
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
