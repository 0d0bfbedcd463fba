//! cadence-core: audio/video synchronization engine.
//!
//! A software media player has three independently clocked activities: a
//! pull-driven audio callback, a push-driven video decode loop, and a
//! self-paced display refresh loop. This crate is the machinery that keeps
//! them perceptually synchronized using only wall-clock deltas and stream
//! timestamps:
//!
//! - [`PacketQueue`] — bounded-wait FIFO of compressed packets, one per stream
//! - [`PictureQueue`] — ring buffer of decoded frames between decode and display
//! - [`ClockSet`] — per-stream clock estimation plus a selectable master clock
//! - [`VideoDecodeThread`] / [`RefreshThread`] — the decode and presentation loops
//! - [`AudioRenderDriver`] — fills the audio output's buffers on demand
//! - [`PlaybackSession`] — owns all of the above and the playback state machine
//!
//! Decoding and rendering are external collaborators behind the
//! [`VideoDecoder`], [`AudioDecoder`], and [`FramePresenter`] traits; this
//! crate decides *when*, never *how*.
//!
//! # Example
//!
//! ```ignore
//! use cadence_core::{PlaybackSession, SessionConfig};
//!
//! let mut session = PlaybackSession::new(SessionConfig::default());
//! session.start_video(my_decoder);
//! session.start_refresh(my_presenter);
//! let driver = session.audio_driver(my_audio_decoder);
//! // hand `driver` to the audio output subsystem; feed packets into
//! // session.audio_packets() / session.video_packets()
//! ```
//!
//! # Feature flags
//!
//! - `cpal-output`: reference output adapter pumping the render driver from a
//!   cpal callback.

pub mod audio;
pub mod audio_driver;
pub mod clock;
pub mod decode;
pub mod packet;
pub mod picture;
pub mod refresh;
pub mod session;
pub mod sync_metrics;
pub mod video;

#[cfg(feature = "cpal-output")]
pub mod output;

pub use audio::{
    AudioDecodeStep, AudioDecoder, AudioError, AudioOutputFormat, AudioPcm, SampleBuffer,
    SampleFormat, SampleLayout,
};
pub use audio_driver::{AudioDriverHandle, AudioRenderDriver};
pub use clock::{AudioClock, ClockSet, ExternalClock, SyncMode, VideoClock};
pub use decode::VideoDecodeThread;
pub use packet::{Dequeue, Packet, PacketQueue, QueueClosed, TimeBase};
pub use picture::{PictureQueue, DEFAULT_PICTURE_QUEUE_SIZE};
pub use refresh::{RefreshThread, RefreshTiming, AV_NOSYNC_THRESHOLD, AV_SYNC_THRESHOLD};
pub use session::{PlaybackSession, PlaybackState, SessionConfig};
pub use sync_metrics::{SyncMetrics, SyncSnapshot, SYNC_DRIFT_THRESHOLD_MS};
pub use video::{
    DecodedVideo, FrameImage, FramePresenter, Picture, PixelFormat, VideoDecoder, VideoError,
};

#[cfg(feature = "cpal-output")]
pub use output::CpalOutput;
