//! Seek resolution inside an in-memory MPEG stream.
//!
//! Frames are not byte-addressable, so a seek maps the requested fraction onto the audio
//! payload (tag excluded), then scans forward to the next frame-sync marker, or back to the
//! last one when the target is inside the final frame. The reported elapsed time is derived
//! from the byte offset actually landed on.

use std::time::Duration;

use crate::frame::FrameDecoder;

/// Where a seek landed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct SeekPoint {
    pub cursor: usize,
    pub elapsed: Duration,
}

/// Resolve `fraction` (clamped to `[0, 1]`) of the payload starting at `payload_start`.
///
/// With no frame start at or after the target, lands on the last frame start before it so
/// the tail still plays. A payload with no frame at all lands at end of stream.
pub(crate) fn resolve_seek(
    data: &[u8],
    payload_start: usize,
    fraction: f64,
    duration: Duration,
    decoder: &dyn FrameDecoder,
) -> SeekPoint {
    let payload_start = payload_start.min(data.len());
    let payload_len = data.len() - payload_start;
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let offset = ((payload_len as f64 * fraction) as usize).min(payload_len);
    let target = payload_start + offset;

    let is_start = |i: &usize| decoder.is_frame_start(&data[*i..]);
    let found = (target..data.len())
        .find(is_start)
        .or_else(|| (payload_start..target).rev().find(is_start));
    match found {
        Some(cursor) => {
            let ratio = (cursor - payload_start) as f64 / payload_len as f64;
            SeekPoint {
                cursor,
                elapsed: duration.mul_f64(ratio.clamp(0.0, 1.0)),
            }
        }
        None => SeekPoint {
            cursor: data.len(),
            elapsed: duration,
        },
    }
}

/// Convert a relative seek into a payload fraction, clamping the target to `[0, duration]`.
pub(crate) fn relative_fraction(elapsed: Duration, delta_secs: f64, duration: Duration) -> f64 {
    if duration.is_zero() || !delta_secs.is_finite() {
        return 0.0;
    }
    let total = duration.as_secs_f64();
    let target = (elapsed.as_secs_f64() + delta_secs).clamp(0.0, total);
    target / total
}
