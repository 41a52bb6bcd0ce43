//! Frame-level MPEG audio decoding.
//!
//! The transport walks a raw byte buffer itself (so it can reposition the cursor on seek),
//! and hands the bytes at the cursor to a [`FrameDecoder`]. A decoder reports how many bytes
//! it consumed; `0` means there is no frame at this position and the caller skips one byte.
//!
//! [`Mp3FrameDecoder`] wraps Symphonia's MP3 codec, feeding it one packet per frame.

use anyhow::Result;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::formats::Packet;

/// Length of an MPEG audio frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

const BITRATES_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L3: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// Parsed MPEG-1/2/2.5 Layer III frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub channels: u16,
}

impl FrameHeader {
    /// Parse a Layer III header at the start of `bytes`.
    ///
    /// Returns `None` for anything that is not a usable frame-sync marker: missing sync bits,
    /// reserved version, non-Layer-III, free-format or invalid bitrate, reserved sample rate.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let b = bytes.get(..FRAME_HEADER_LEN)?;
        if b[0] != 0xFF || b[1] & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (b[1] >> 3) & 0x03 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None,
        };
        if (b[1] >> 1) & 0x03 != 0b01 {
            return None;
        }

        let bitrate_idx = (b[2] >> 4) as usize;
        if bitrate_idx == 0 || bitrate_idx == 15 {
            return None;
        }
        let bitrate_kbps = match version {
            MpegVersion::Mpeg1 => BITRATES_V1_L3[bitrate_idx],
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => BITRATES_V2_L3[bitrate_idx],
        };

        let rate_idx = ((b[2] >> 2) & 0x03) as usize;
        let rates: [u32; 3] = match version {
            MpegVersion::Mpeg1 => [44_100, 48_000, 32_000],
            MpegVersion::Mpeg2 => [22_050, 24_000, 16_000],
            MpegVersion::Mpeg25 => [11_025, 12_000, 8_000],
        };
        let sample_rate = *rates.get(rate_idx)?;

        let padding = (b[2] >> 1) & 0x01 == 1;
        let channels = if b[3] >> 6 == 0b11 { 1 } else { 2 };

        Some(Self {
            version,
            bitrate_kbps,
            sample_rate,
            padding,
            channels,
        })
    }

    /// Decoded samples per channel carried by one frame.
    pub fn samples_per_frame(&self) -> u32 {
        match self.version {
            MpegVersion::Mpeg1 => 1152,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 576,
        }
    }

    /// Total frame length in bytes, header included.
    pub fn frame_len(&self) -> usize {
        let coeff = match self.version {
            MpegVersion::Mpeg1 => 144,
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => 72,
        };
        let pad = usize::from(self.padding);
        (coeff * self.bitrate_kbps as usize * 1000) / self.sample_rate as usize + pad
    }
}

/// One decoded frame of interleaved `f32` samples.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl DecodedFrame {
    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }
}

/// Result of one decode attempt at the cursor.
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    /// Bytes to advance the cursor by. `0` means "no frame here".
    pub consumed: usize,
    /// Decoded audio, if the frame produced any.
    pub frame: Option<DecodedFrame>,
}

/// Result of a header-only scan at the cursor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    pub consumed: usize,
    pub sample_rate: u32,
    pub samples_per_channel: u32,
}

/// Frame decode primitive driven by the transport and the duration scan.
pub trait FrameDecoder: Send {
    /// Decode the frame starting at `data[0]`.
    fn decode_frame(&mut self, data: &[u8]) -> DecodeOutcome;

    /// Measure the frame at `data[0]` without producing samples.
    fn scan_frame(&mut self, data: &[u8]) -> ScanOutcome {
        match FrameHeader::parse(data) {
            Some(h) if h.frame_len() <= data.len() => ScanOutcome {
                consumed: h.frame_len(),
                sample_rate: h.sample_rate,
                samples_per_channel: h.samples_per_frame(),
            },
            _ => ScanOutcome::default(),
        }
    }

    /// Whether a frame-sync marker starts at `data[0]`.
    fn is_frame_start(&self, data: &[u8]) -> bool {
        FrameHeader::parse(data).is_some()
    }

    /// Drop inter-frame state (bit reservoir etc.) after the cursor jumps.
    fn reset(&mut self) {}
}

/// Symphonia-backed MP3 frame decoder.
pub struct Mp3FrameDecoder {
    decoder: Box<dyn Decoder>,
}

impl Mp3FrameDecoder {
    pub fn new() -> Result<Self> {
        let mut params = CodecParameters::new();
        params.for_codec(CODEC_TYPE_MP3);
        let decoder = symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;
        Ok(Self { decoder })
    }
}

impl FrameDecoder for Mp3FrameDecoder {
    fn decode_frame(&mut self, data: &[u8]) -> DecodeOutcome {
        let Some(header) = FrameHeader::parse(data) else {
            return DecodeOutcome::default();
        };
        let len = header.frame_len();
        if len <= FRAME_HEADER_LEN || len > data.len() {
            return DecodeOutcome::default();
        }

        let packet = Packet::new_from_slice(0, 0, u64::from(header.samples_per_frame()), &data[..len]);
        let decoded = match self.decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!("mp3 frame rejected by codec: {e}");
                return DecodeOutcome {
                    consumed: len,
                    frame: None,
                };
            }
        };
        if decoded.frames() == 0 {
            return DecodeOutcome {
                consumed: len,
                frame: None,
            };
        }

        let spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        DecodeOutcome {
            consumed: len,
            frame: Some(DecodedFrame {
                sample_rate: spec.rate,
                channels: spec.channels.count() as u16,
                samples: sample_buf.samples().to_vec(),
            }),
        }
    }

    fn reset(&mut self) {
        self.decoder.reset();
    }
}

/// Build a header for tests and synthetic streams: MPEG-1 Layer III, no CRC.
#[cfg(test)]
pub(crate) fn mpeg1_header(bitrate_idx: u8, rate_idx: u8, mono: bool) -> [u8; 4] {
    [
        0xFF,
        0xFB,
        (bitrate_idx << 4) | (rate_idx << 2),
        if mono { 0xC0 } else { 0x00 },
    ]
}

/// A silent MPEG-1 Layer III frame (128 kbps, 44.1 kHz): header followed by zeroed side info
/// and main data.
#[cfg(test)]
pub(crate) fn silent_frame(mono: bool) -> Vec<u8> {
    let header = mpeg1_header(9, 0, mono);
    let len = FrameHeader::parse(&header).map(|h| h.frame_len()).unwrap_or(0);
    let mut frame = vec![0u8; len];
    frame[..4].copy_from_slice(&header);
    frame
}
