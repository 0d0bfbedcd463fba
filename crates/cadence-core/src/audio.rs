//! Core audio types and the decoder collaborator trait.

/// Audio error types.
#[derive(Debug, Clone)]
pub enum AudioError {
    /// Decoder initialization failed
    DecoderInit(String),
    /// Decoding failed
    DecodeFailed(String),
    /// No audio output device available
    NoOutputDevice(String),
    /// Building or starting the output stream failed
    OutputStream(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DecoderInit(s) => write!(f, "Decoder init failed: {s}"),
            Self::DecodeFailed(s) => write!(f, "Decode failed: {s}"),
            Self::NoOutputDevice(s) => write!(f, "No output device: {s}"),
            Self::OutputStream(s) => write!(f, "Output stream failed: {s}"),
        }
    }
}

impl std::error::Error for AudioError {}

/// Sample value encoding of decoded PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit
    I16,
    /// 32-bit float, nominal range -1.0..=1.0
    F32,
}

/// Channel layout of decoded PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    /// Channels interleaved sample by sample
    Interleaved,
    /// One contiguous run per channel, plane-major
    Planar,
}

/// Decoded sample storage.
#[derive(Debug, Clone)]
pub enum SampleBuffer {
    /// Signed 16-bit samples
    I16(Vec<i16>),
    /// Float samples
    F32(Vec<f32>),
}

impl SampleBuffer {
    /// Total sample count across all channels.
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::I16(v) => v.len(),
            SampleBuffer::F32(v) => v.len(),
        }
    }

    /// Returns true if the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The encoding of the stored samples.
    pub fn format(&self) -> SampleFormat {
        match self {
            SampleBuffer::I16(_) => SampleFormat::I16,
            SampleBuffer::F32(_) => SampleFormat::F32,
        }
    }
}

/// A block of decoded PCM in the decoder's native format.
#[derive(Debug, Clone)]
pub struct AudioPcm {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Channel layout of `samples`
    pub layout: SampleLayout,
    /// The samples themselves
    pub samples: SampleBuffer,
}

impl AudioPcm {
    /// Number of per-channel frames in this block.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

/// One incremental step of decoding a compressed audio buffer.
#[derive(Debug)]
pub struct AudioDecodeStep {
    /// Bytes of compressed input consumed by this step
    pub consumed: usize,
    /// Decoded PCM, if this step completed a frame
    pub pcm: Option<AudioPcm>,
}

/// External audio decoder collaborator.
///
/// The render driver feeds it the unconsumed remainder of the current
/// compressed packet; the decoder reports how many bytes it ate and,
/// when a frame completes, the decoded PCM in its native format. A step
/// that consumes nothing and produces nothing makes the driver discard
/// the packet rather than loop forever.
pub trait AudioDecoder: Send {
    /// Decodes from the front of `data`.
    fn decode(&mut self, data: &[u8]) -> Result<AudioDecodeStep, AudioError>;
}

/// Fixed output format negotiated with the audio output subsystem.
///
/// The render driver always delivers interleaved signed 16-bit PCM in this
/// rate and channel count, converting from whatever the decoder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioOutputFormat {
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Output channel count
    pub channels: u16,
}

impl AudioOutputFormat {
    /// Bytes of s16 PCM per second of playback.
    pub fn bytes_per_second(&self) -> f64 {
        self.sample_rate as f64 * self.channels as f64 * 2.0
    }
}

impl Default for AudioOutputFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}
