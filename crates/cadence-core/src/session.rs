//! Playback session: ownership root and state machine.
//!
//! No globals: a [`PlaybackSession`] exclusively owns the two packet queues,
//! the picture queue, and the clock set, and hands `Arc` handles to each
//! loop at startup. Everything a loop touches is reachable from here.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::audio::{AudioDecoder, AudioOutputFormat};
use crate::audio_driver::AudioRenderDriver;
use crate::clock::{ClockSet, SyncMode};
use crate::decode::VideoDecodeThread;
use crate::packet::PacketQueue;
use crate::picture::{PictureQueue, DEFAULT_PICTURE_QUEUE_SIZE};
use crate::refresh::RefreshThread;
use crate::sync_metrics::SyncMetrics;
use crate::video::{FramePresenter, VideoDecoder};

/// Playback state observed by all loops.
///
/// `Stopped` is terminal: no transition leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackState {
    /// Loops run normally
    Playing = 0,
    /// Loops idle without consuming or presenting
    Paused = 1,
    /// Loops exit and release their resources
    Stopped = 2,
}

/// Atomic cell holding the shared [`PlaybackState`].
pub struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: PlaybackState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Current state.
    pub fn get(&self) -> PlaybackState {
        match self.0.load(Ordering::Acquire) {
            0 => PlaybackState::Playing,
            1 => PlaybackState::Paused,
            _ => PlaybackState::Stopped,
        }
    }

    /// Transitions to `state` unless already stopped. Returns the state that
    /// was actually in effect before the call.
    pub(crate) fn set(&self, state: PlaybackState) -> PlaybackState {
        let result = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current == PlaybackState::Stopped as u8 {
                    None
                } else {
                    Some(state as u8)
                }
            });
        match result {
            Ok(previous) => match previous {
                0 => PlaybackState::Playing,
                1 => PlaybackState::Paused,
                _ => PlaybackState::Stopped,
            },
            Err(_) => PlaybackState::Stopped,
        }
    }
}

/// Session construction parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Master clock election
    pub sync_mode: SyncMode,
    /// Picture queue slot count
    pub picture_capacity: usize,
    /// Fixed output format delivered by the audio render driver
    pub audio_output: AudioOutputFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::default(),
            picture_capacity: DEFAULT_PICTURE_QUEUE_SIZE,
            audio_output: AudioOutputFormat::default(),
        }
    }
}

/// A playback session.
///
/// Owns all shared state, spawns the video decode and refresh threads, and
/// constructs the audio render driver for the output subsystem to pull from.
/// Dropping the session stops and joins everything.
pub struct PlaybackSession {
    audio_packets: Arc<PacketQueue>,
    video_packets: Arc<PacketQueue>,
    pictures: Arc<PictureQueue>,
    clocks: Arc<ClockSet>,
    state: Arc<StateCell>,
    metrics: SyncMetrics,
    audio_output: AudioOutputFormat,
    video_thread: Option<VideoDecodeThread>,
    refresh_thread: Option<RefreshThread>,
}

impl PlaybackSession {
    /// Creates a session in the `Playing` state with empty queues.
    pub fn new(config: SessionConfig) -> Self {
        let clocks = Arc::new(ClockSet::new(config.sync_mode));
        clocks.audio().set_format(&config.audio_output);
        Self {
            audio_packets: Arc::new(PacketQueue::new()),
            video_packets: Arc::new(PacketQueue::new()),
            pictures: Arc::new(PictureQueue::new(config.picture_capacity)),
            clocks,
            state: Arc::new(StateCell::new(PlaybackState::Playing)),
            metrics: SyncMetrics::new(),
            audio_output: config.audio_output,
            video_thread: None,
            refresh_thread: None,
        }
    }

    /// The compressed audio packet queue; the demuxer side pushes into it.
    pub fn audio_packets(&self) -> &Arc<PacketQueue> {
        &self.audio_packets
    }

    /// The compressed video packet queue; the demuxer side pushes into it.
    pub fn video_packets(&self) -> &Arc<PacketQueue> {
        &self.video_packets
    }

    /// The decoded picture queue.
    pub fn pictures(&self) -> &Arc<PictureQueue> {
        &self.pictures
    }

    /// The clock set.
    pub fn clocks(&self) -> &Arc<ClockSet> {
        &self.clocks
    }

    /// Sync quality instrumentation, recorded at every presentation.
    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// Current playback state.
    pub fn state(&self) -> PlaybackState {
        self.state.get()
    }

    /// The fixed format the audio render driver delivers.
    pub fn audio_output_format(&self) -> AudioOutputFormat {
        self.audio_output
    }

    /// Spawns the video decode thread around the given decoder.
    ///
    /// A second call is ignored; one decode loop per session.
    pub fn start_video<D: VideoDecoder + 'static>(&mut self, decoder: D) {
        if self.video_thread.is_some() {
            tracing::warn!("video decode thread already running");
            return;
        }
        self.video_thread = Some(VideoDecodeThread::spawn(
            decoder,
            Arc::clone(&self.video_packets),
            Arc::clone(&self.pictures),
            Arc::clone(&self.state),
        ));
    }

    /// Spawns the refresh scheduler thread around the given presenter.
    pub fn start_refresh<P: FramePresenter + 'static>(&mut self, presenter: P) {
        if self.refresh_thread.is_some() {
            tracing::warn!("refresh scheduler already running");
            return;
        }
        self.refresh_thread = Some(RefreshThread::spawn(
            presenter,
            Arc::clone(&self.pictures),
            Arc::clone(&self.clocks),
            Arc::clone(&self.state),
            self.metrics.clone(),
        ));
    }

    /// Builds the audio render driver for the output subsystem to pull from.
    pub fn audio_driver<D: AudioDecoder>(&self, decoder: D) -> AudioRenderDriver<D> {
        AudioRenderDriver::new(
            decoder,
            self.audio_output,
            Arc::clone(&self.audio_packets),
            Arc::clone(&self.clocks),
            Arc::clone(&self.state),
        )
    }

    /// Pauses playback. All loops observe the transition within one
    /// scheduling quantum and idle in place; nothing is released.
    pub fn pause(&self) {
        if self.state.set(PlaybackState::Paused) != PlaybackState::Stopped {
            self.clocks.external().pause(self.clocks.now());
            tracing::debug!("playback paused");
        }
    }

    /// Resumes playback exactly where it left off.
    pub fn resume(&self) {
        if self.state.set(PlaybackState::Playing) != PlaybackState::Stopped {
            self.clocks.external().resume(self.clocks.now());
            tracing::debug!("playback resumed");
        }
    }

    /// Stops playback. Terminal and idempotent: queues are aborted rather
    /// than drained, and every blocked loop unblocks within one quantum.
    pub fn stop(&self) {
        self.state.set(PlaybackState::Stopped);
        self.audio_packets.abort();
        self.video_packets.abort();
        self.pictures.stop();
        tracing::debug!("playback stopped");
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.stop();
        // Thread owners join in their own Drop, after stop() has unblocked them.
        self.video_thread.take();
        self.refresh_thread.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_is_terminal() {
        let cell = StateCell::new(PlaybackState::Playing);
        assert_eq!(cell.set(PlaybackState::Paused), PlaybackState::Playing);
        assert_eq!(cell.get(), PlaybackState::Paused);
        cell.set(PlaybackState::Stopped);
        assert_eq!(cell.set(PlaybackState::Playing), PlaybackState::Stopped);
        assert_eq!(cell.get(), PlaybackState::Stopped);
    }

    #[test]
    fn stop_aborts_queues() {
        let session = PlaybackSession::new(SessionConfig::default());
        session.stop();
        assert_eq!(session.state(), PlaybackState::Stopped);
        assert!(session.video_packets().is_aborted());
        assert!(session.audio_packets().is_aborted());
        assert!(session.pictures().is_stopped());
        // Idempotent.
        session.stop();
        assert_eq!(session.state(), PlaybackState::Stopped);
    }

    #[test]
    fn pause_after_stop_is_refused() {
        let session = PlaybackSession::new(SessionConfig::default());
        session.stop();
        session.pause();
        assert_eq!(session.state(), PlaybackState::Stopped);
        session.resume();
        assert_eq!(session.state(), PlaybackState::Stopped);
    }
}
