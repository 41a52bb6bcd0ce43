//! Output sink abstraction.
//!
//! The transport opens a stream lazily, once the first frame of a session tells it the sample
//! rate and channel count. The backend then calls the render callback on its own realtime
//! thread whenever the device wants more audio; the callback must satisfy the whole request.

use anyhow::Result;

/// Interleaved `f32` format of the audio the transport will render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Pull callback: fill the whole slice with interleaved samples in the stream format.
pub type RenderFn = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Factory for output streams (an audio host, or a test harness).
pub trait OutputBackend: Send + Sync {
    /// Open and start a stream. Dropping the returned handle closes the device.
    fn open(&self, format: StreamFormat, render: RenderFn) -> Result<Box<dyn OutputStream>>;
}

/// An open output stream.
pub trait OutputStream {
    fn pause(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
}
