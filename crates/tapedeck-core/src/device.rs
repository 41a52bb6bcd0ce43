//! CPAL output backend.
//!
//! Thin wrappers around CPAL for:
//! - listing available output devices
//! - selecting either the default device or a device by substring match
//! - opening a stream at the exact source rate and driving the render callback from it

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::output::{OutputBackend, OutputStream, RenderFn, StreamFormat};

/// Output backend that opens streams on a CPAL host device.
#[derive(Clone, Debug, Default)]
pub struct CpalOutput {
    device: Option<String>,
    buffer_frames: Option<u32>,
}

impl CpalOutput {
    /// `device` is a case-insensitive substring of the device name; `None` means host default.
    pub fn new(device: Option<String>, buffer_frames: Option<u32>) -> Self {
        Self {
            device: device.and_then(|d| {
                let trimmed = d.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }),
            buffer_frames,
        }
    }
}

impl OutputBackend for CpalOutput {
    fn open(&self, format: StreamFormat, render: RenderFn) -> Result<Box<dyn OutputStream>> {
        let host = cpal::default_host();
        let device = pick_device(&host, self.device.as_deref())?;
        let supported = pick_output_config(&device, format)?;
        let mut stream_config: cpal::StreamConfig = supported.config();
        if let Some(buf) = pick_buffer_size(&supported, self.buffer_frames) {
            stream_config.buffer_size = buf;
        }
        tracing::info!(
            device = %device.description().map(|d| d.to_string()).unwrap_or_default(),
            rate_hz = stream_config.sample_rate,
            source_channels = format.channels,
            device_channels = stream_config.channels,
            sample_format = ?supported.sample_format(),
            buffer_size = ?stream_config.buffer_size,
            "output device open"
        );

        let stream = build_output_stream(
            &device,
            &stream_config,
            supported.sample_format(),
            usize::from(format.channels),
            render,
        )?;
        stream.play().context("start output stream")?;
        Ok(Box::new(CpalStream { stream }))
    }
}

struct CpalStream {
    stream: cpal::Stream,
}

impl OutputStream for CpalStream {
    fn pause(&self) -> Result<()> {
        self.stream.pause().context("pause output stream")
    }

    fn resume(&self) -> Result<()> {
        self.stream.play().context("resume output stream")
    }
}

/// Pick a CPAL output device.
///
/// - If `needle` is `Some`, chooses the first output device whose name contains the substring
///   (case-insensitive).
/// - Otherwise, returns the host default output device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Pick a supported output config that plays `format.sample_rate` without resampling.
///
/// Among ranges containing the rate, prefer the source channel count, then stereo, then the
/// richest sample format. Errors if no range contains the rate.
pub fn pick_output_config(
    device: &cpal::Device,
    format: StreamFormat,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }

    let mut best: Option<((u8, u8), cpal::SupportedStreamConfigRange)> = None;
    for range in ranges {
        if format.sample_rate < range.min_sample_rate() || format.sample_rate > range.max_sample_rate() {
            continue;
        }
        let rank = (
            channel_rank(range.channels(), format.channels),
            sample_format_rank(range.sample_format()),
        );
        if best.as_ref().is_none_or(|(b, _)| rank < *b) {
            best = Some((rank, range));
        }
    }

    best.map(|(_, range)| range.with_sample_rate(format.sample_rate))
        .ok_or_else(|| anyhow!("No output config supports {} Hz", format.sample_rate))
}

/// Choose a fixed buffer size near `wanted` if the device advertises a range.
///
/// Returns `None` when the device only supports its default buffer size.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    wanted: Option<u32>,
) -> Option<cpal::BufferSize> {
    let wanted = wanted?;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(wanted.clamp(*min, (*max).max(*min))))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn channel_rank(device_channels: u16, source_channels: u16) -> u8 {
    if device_channels == source_channels {
        0
    } else if device_channels == 2 {
        1
    } else {
        2
    }
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Output device names for the current host.
pub fn list_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.output_devices().context("No output devices")?;
    let mut out = Vec::new();
    for d in devices {
        out.push(d.description()?.to_string());
    }
    Ok(out)
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

/// Build a CPAL output stream whose callback pulls from `render`.
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    src_channels: usize,
    render: RenderFn,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, src_channels, render),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, src_channels, render),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, src_channels, render),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, src_channels, render),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
///
/// Each callback renders exactly as many source frames as the device asked for into a scratch
/// buffer, then maps channels and converts to the device sample type.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    src_channels: usize,
    mut render: RenderFn,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let dst_channels = usize::from(config.channels).max(1);
    let src_channels = src_channels.max(1);
    let mut scratch: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / dst_channels;
            scratch.resize(frames * src_channels, 0.0);
            render(&mut scratch);

            for (src, dst) in scratch
                .chunks_exact(src_channels)
                .zip(data.chunks_exact_mut(dst_channels))
            {
                for (ch, out) in dst.iter_mut().enumerate() {
                    *out = <T as cpal::Sample>::from_sample::<f32>(map_channel(src, dst_channels, ch));
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Output sample for `dst_ch` of one interleaved source frame.
///
/// - mono -> stereo: duplicate channel 0
/// - stereo -> mono: average L/R
/// - other layouts: best-effort "clamp to available channels"
fn map_channel(src: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    match (src.len(), dst_channels) {
        (2, 1) => 0.5 * (src[0] + src[1]),
        (0, _) => 0.0,
        (n, _) => src[dst_ch.min(n - 1)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_device_name_is_case_insensitive() {
        assert!(matches_device_name("USB DAC", "dac"));
        assert!(matches_device_name("usb dac", "USB"));
        assert!(!matches_device_name("USB DAC", "speaker"));
        assert!(!matches_device_name("USB DAC", ""));
    }

    #[test]
    fn cpal_output_drops_blank_device_names() {
        assert!(CpalOutput::new(Some("  ".to_string()), None).device.is_none());
        assert_eq!(
            CpalOutput::new(Some(" USB DAC ".to_string()), None).device.as_deref(),
            Some("USB DAC")
        );
    }

    #[test]
    fn channel_rank_prefers_exact_then_stereo() {
        assert!(channel_rank(1, 1) < channel_rank(2, 1));
        assert!(channel_rank(2, 1) < channel_rank(6, 1));
        assert_eq!(channel_rank(2, 2), 0);
    }

    #[test]
    fn sample_format_rank_prefers_float() {
        assert!(sample_format_rank(cpal::SampleFormat::F32) < sample_format_rank(cpal::SampleFormat::I16));
        assert!(sample_format_rank(cpal::SampleFormat::I16) < sample_format_rank(cpal::SampleFormat::U16));
    }

    #[test]
    fn map_channel_handles_common_layouts() {
        assert_eq!(map_channel(&[0.3], 2, 0), 0.3);
        assert_eq!(map_channel(&[0.3], 2, 1), 0.3);
        assert_eq!(map_channel(&[0.2, 0.4], 1, 0), 0.5 * (0.2 + 0.4));
        assert_eq!(map_channel(&[0.2, 0.4], 2, 1), 0.4);
        assert_eq!(map_channel(&[0.2, 0.4], 4, 3), 0.4);
    }
}
