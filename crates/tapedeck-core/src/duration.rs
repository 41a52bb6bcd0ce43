//! Whole-file duration scan.
//!
//! Walks every frame of the audio payload once and sums decoded-sample counts. This is
//! O(file size) and deliberately independent of playback progress.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::frame::FrameDecoder;
use crate::tag;

/// Duration of the file at `path`, scanning with `decoder`.
pub fn compute_duration(path: &Path, decoder: &mut dyn FrameDecoder) -> Result<Duration> {
    let data = std::fs::read(path).with_context(|| format!("read {:?}", path))?;
    Ok(scan_duration(&data, decoder))
}

/// Duration of an in-memory stream (tag region skipped).
///
/// Total samples per channel divided by the sample rate of the first frame. Bytes that do not
/// start a frame are skipped one at a time. A stream with no frames has zero duration.
pub fn scan_duration(data: &[u8], decoder: &mut dyn FrameDecoder) -> Duration {
    let mut cursor = tag::audio_payload_offset(data);
    let mut total_samples: u64 = 0;
    let mut sample_rate: u32 = 0;
    let mut skipped: usize = 0;

    while cursor < data.len() {
        let scan = decoder.scan_frame(&data[cursor..]);
        if scan.consumed == 0 {
            cursor += 1;
            skipped += 1;
            continue;
        }
        if scan.samples_per_channel > 0 {
            if sample_rate == 0 {
                sample_rate = scan.sample_rate;
            }
            total_samples += u64::from(scan.samples_per_channel);
        }
        cursor += scan.consumed;
    }

    if skipped > 0 {
        tracing::debug!(skipped_bytes = skipped, "duration scan skipped non-frame bytes");
    }
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(total_samples as f64 / f64::from(sample_rate))
}
