//! Core video types and collaborator traits.
//!
//! The engine never decodes or draws anything itself: a [`VideoDecoder`]
//! turns compressed packets into images and a [`FramePresenter`] puts them on
//! a surface. Both are supplied by the embedding application.

use std::sync::Arc;

use crate::packet::Packet;

/// Video error types.
#[derive(Debug, Clone)]
pub enum VideoError {
    /// Decoder initialization failed
    DecoderInit(String),
    /// Frame decoding error
    DecodeFailed(String),
    /// Unsupported codec or pixel format
    UnsupportedFormat(String),
}

impl std::fmt::Display for VideoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoError::DecoderInit(msg) => write!(f, "Decoder initialization failed: {msg}"),
            VideoError::DecodeFailed(msg) => write!(f, "Frame decode failed: {msg}"),
            VideoError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {msg}"),
        }
    }
}

impl std::error::Error for VideoError {}

/// Pixel format of a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUV 4:2:0 planar (most common decoder output)
    Yuv420p,
    /// Y plane + interleaved UV (common for hardware decoders)
    Nv12,
    /// RGBA 32-bit
    Rgba8,
}

/// A decoded image buffer.
///
/// The pixel data is reference counted so a frame can be handed to the
/// presenter while its queue slot is reused; cloning is cheap.
#[derive(Clone)]
pub struct FrameImage {
    /// Pixel format of `data`
    pub format: PixelFormat,
    /// Raw pixel bytes, plane-major for planar formats
    pub data: Arc<[u8]>,
}

impl FrameImage {
    /// Creates an image from raw pixel bytes.
    pub fn new(format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            format,
            data: data.into(),
        }
    }
}

impl std::fmt::Debug for FrameImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameImage")
            .field("format", &self.format)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// A decoded video frame ready for presentation.
#[derive(Debug, Clone)]
pub struct Picture {
    /// The decoded image
    pub image: FrameImage,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Presentation timestamp in seconds, stream-absolute
    pub pts: f64,
}

impl Picture {
    /// Returns the frame dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Raw decoder output for a single frame.
#[derive(Debug, Clone)]
pub struct DecodedVideo {
    /// The decoded image
    pub image: FrameImage,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame timestamp in stream ticks, if the bitstream carried one
    pub pts: Option<i64>,
    /// Repeated-picture hint: extra half-frame periods this frame should be
    /// held on screen (interlaced pulldown)
    pub repeat: u32,
}

/// External video decoder collaborator.
///
/// One compressed packet yields zero or one frames; a packet that only fills
/// internal decoder state returns `Ok(None)`. Recoverable decode errors are
/// reported as [`VideoError::DecodeFailed`] and the caller skips the packet.
pub trait VideoDecoder: Send {
    /// Decodes one packet.
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedVideo>, VideoError>;
}

/// External rendering collaborator.
///
/// `present` is called from the refresh scheduler thread and is assumed to
/// complete synchronously within the scheduler's frame budget.
pub trait FramePresenter: Send {
    /// Draws one frame to the target surface.
    fn present(&mut self, picture: &Picture);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_image_clone_shares_data() {
        let image = FrameImage::new(PixelFormat::Rgba8, vec![0u8; 64]);
        let copy = image.clone();
        assert!(Arc::ptr_eq(&image.data, &copy.data));
    }

    #[test]
    fn debug_does_not_dump_pixels() {
        let image = FrameImage::new(PixelFormat::Nv12, vec![7u8; 1024]);
        let printed = format!("{image:?}");
        assert!(printed.contains("data_len"));
        assert!(!printed.contains("7, 7, 7"));
    }
}
