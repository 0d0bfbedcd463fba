//! Playback clock model.
//!
//! Each stream estimates its own position from decode progress plus wall-clock
//! extrapolation, and one of them (or an external wall clock) is elected
//! master. All positions are `f64` seconds on the stream timeline; "unknown"
//! is a real state, distinct from zero, reported until the owning stream has
//! decoded at least one frame with a known timestamp.
//!
//! Writers and readers are different threads: the audio clock is written by
//! the render driver, the video clock by the refresh scheduler. Updates are
//! (position, wall-time) pairs guarded by a mutex so readers always observe a
//! consistent pair; a slightly stale pair only shifts the extrapolation base
//! and is harmless.

use std::time::Instant;

use parking_lot::Mutex;

use crate::audio::AudioOutputFormat;

/// Which clock the refresh scheduler measures drift against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Audio hardware timing is the least jittery reference.
    #[default]
    AudioMaster,
    /// Video self-paces; drift is zero by definition.
    VideoMaster,
    /// An externally supplied wall clock.
    ExternalMaster,
}

#[derive(Debug, Default)]
struct AudioState {
    /// Position of the newest decoded sample handed to the output stage
    clock: f64,
    /// Becomes true on the first packet with a known timestamp
    started: bool,
    bytes_per_sec: f64,
    /// Size of the buffer most recently handed to the output subsystem
    last_buffer_bytes: f64,
    /// Session time at which that buffer was handed over
    last_buffer_at: f64,
}

/// Audible-position estimate for the audio stream.
///
/// The decoded position runs ahead of what the listener hears by however much
/// PCM the output stage still holds, so reads subtract an estimate of that
/// backlog: the last enqueued buffer minus what real elapsed time says has
/// drained since. The estimate is deliberately left unclamped; once the
/// output runs past the last buffer it goes negative and the reported
/// position simply keeps advancing at the byte rate.
pub struct AudioClock {
    state: Mutex<AudioState>,
}

impl AudioClock {
    fn new() -> Self {
        Self {
            state: Mutex::new(AudioState::default()),
        }
    }

    /// Sets the output byte rate used to convert buffered bytes to seconds.
    pub fn set_format(&self, format: &AudioOutputFormat) {
        self.state.lock().bytes_per_sec = format.bytes_per_second();
    }

    /// Snaps the decoded position to a packet timestamp.
    pub fn set_position(&self, seconds: f64) {
        let mut state = self.state.lock();
        state.clock = seconds;
        state.started = true;
    }

    /// Advances the decoded position by a span of produced PCM.
    pub fn advance_bytes(&self, bytes: usize) {
        let mut state = self.state.lock();
        if state.bytes_per_sec > 0.0 {
            state.clock += bytes as f64 / state.bytes_per_sec;
        }
    }

    /// Records a buffer handed to the output subsystem at session time `now`.
    pub fn record_buffer(&self, bytes: usize, now: f64) {
        let mut state = self.state.lock();
        state.last_buffer_bytes = bytes as f64;
        state.last_buffer_at = now;
    }

    /// Estimated audible position at session time `now`.
    pub fn position(&self, now: f64) -> Option<f64> {
        let state = self.state.lock();
        if !state.started {
            return None;
        }
        if state.bytes_per_sec <= 0.0 {
            return Some(state.clock);
        }
        let drained = (now - state.last_buffer_at) * state.bytes_per_sec;
        let buffered = state.last_buffer_bytes - drained;
        Some(state.clock - buffered / state.bytes_per_sec)
    }
}

/// Stopwatch extrapolation from the last displayed frame.
pub struct VideoClock {
    /// (pts of the current frame, session time it became current)
    current: Mutex<Option<(f64, f64)>>,
}

impl VideoClock {
    fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// Marks a frame as the one currently on screen.
    pub fn set_current(&self, pts: f64, now: f64) {
        *self.current.lock() = Some((pts, now));
    }

    /// Extrapolated position at session time `now`.
    ///
    /// Only valid between display events; that is exactly how the refresh
    /// scheduler uses it.
    pub fn position(&self, now: f64) -> Option<f64> {
        self.current.lock().map(|(pts, at)| pts + (now - at))
    }
}

#[derive(Debug)]
struct ExternalState {
    base: f64,
    anchored_at: f64,
    running: bool,
}

/// Pausable wall clock, anchored at session start.
pub struct ExternalClock {
    state: Mutex<ExternalState>,
}

impl ExternalClock {
    fn new() -> Self {
        Self {
            state: Mutex::new(ExternalState {
                base: 0.0,
                anchored_at: 0.0,
                running: true,
            }),
        }
    }

    /// Position at session time `now`.
    pub fn position(&self, now: f64) -> f64 {
        let state = self.state.lock();
        if state.running {
            state.base + (now - state.anchored_at)
        } else {
            state.base
        }
    }

    /// Freezes the clock at its current position.
    pub fn pause(&self, now: f64) {
        let mut state = self.state.lock();
        if state.running {
            state.base += now - state.anchored_at;
            state.running = false;
        }
    }

    /// Resumes advancing from the frozen position.
    pub fn resume(&self, now: f64) {
        let mut state = self.state.lock();
        if !state.running {
            state.anchored_at = now;
            state.running = true;
        }
    }
}

/// The per-stream clocks plus the elected master.
///
/// All session times are seconds since a single epoch `Instant` captured at
/// construction, so every loop measures wall-clock deltas on the same
/// monotonic timeline.
pub struct ClockSet {
    epoch: Instant,
    mode: SyncMode,
    audio: AudioClock,
    video: VideoClock,
    external: ExternalClock,
}

impl ClockSet {
    /// Creates the clock set with the given master election.
    pub fn new(mode: SyncMode) -> Self {
        Self {
            epoch: Instant::now(),
            mode,
            audio: AudioClock::new(),
            video: VideoClock::new(),
            external: ExternalClock::new(),
        }
    }

    /// Seconds elapsed since the session epoch.
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// The configured master election.
    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// The audio stream clock.
    pub fn audio(&self) -> &AudioClock {
        &self.audio
    }

    /// The video stream clock.
    pub fn video(&self) -> &VideoClock {
        &self.video
    }

    /// The external wall clock.
    pub fn external(&self) -> &ExternalClock {
        &self.external
    }

    /// Master clock position at session time `now`, or `None` while the
    /// elected stream has not decoded a timestamped frame yet.
    pub fn master_position(&self, now: f64) -> Option<f64> {
        match self.mode {
            SyncMode::AudioMaster => self.audio.position(now),
            SyncMode::VideoMaster => self.video.position(now),
            SyncMode::ExternalMaster => Some(self.external.position(now)),
        }
    }

    /// The reference position the refresh scheduler corrects against.
    ///
    /// Under [`SyncMode::VideoMaster`] this is `None`: video cannot drift
    /// from itself, so no correction is applied.
    pub fn sync_reference(&self, now: f64) -> Option<f64> {
        match self.mode {
            SyncMode::VideoMaster => None,
            _ => self.master_position(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_clock_unknown_until_first_timestamp() {
        let clocks = ClockSet::new(SyncMode::AudioMaster);
        assert_eq!(clocks.master_position(0.0), None);
        clocks.audio().advance_bytes(4096);
        assert_eq!(clocks.master_position(0.0), None);
        clocks.audio().set_position(1.25);
        assert!(clocks.master_position(0.0).is_some());
    }

    #[test]
    fn audio_clock_subtracts_buffered_duration() {
        let clock = AudioClock::new();
        clock.set_format(&AudioOutputFormat {
            sample_rate: 48_000,
            channels: 2,
        });
        // 192_000 bytes/sec.
        clock.set_position(10.0);
        // Half a second of PCM handed over at t=100.0.
        clock.record_buffer(96_000, 100.0);

        // Immediately after the handover the whole buffer is unplayed.
        let pos = clock.position(100.0).unwrap();
        assert!((pos - 9.5).abs() < 1e-9);

        // A quarter second later, a quarter second has drained.
        let pos = clock.position(100.25).unwrap();
        assert!((pos - 9.75).abs() < 1e-9);

        // Past the buffer the estimate keeps advancing (unclamped).
        let pos = clock.position(100.75).unwrap();
        assert!((pos - 10.25).abs() < 1e-9);
    }

    #[test]
    fn audio_clock_advances_by_decoded_bytes() {
        let clock = AudioClock::new();
        clock.set_format(&AudioOutputFormat {
            sample_rate: 44_100,
            channels: 2,
        });
        clock.set_position(0.0);
        clock.advance_bytes(176_400); // exactly one second
        let pos = clock.position(0.0).unwrap();
        assert!((pos - 1.0).abs() < 1e-9);
    }

    #[test]
    fn video_clock_extrapolates_elapsed_time() {
        let clock = VideoClock::new();
        assert_eq!(clock.position(5.0), None);
        clock.set_current(2.0, 5.0);
        assert!((clock.position(5.0).unwrap() - 2.0).abs() < 1e-9);
        assert!((clock.position(5.5).unwrap() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn master_is_monotonic_between_updates() {
        let clock = AudioClock::new();
        clock.set_format(&AudioOutputFormat::default());
        clock.set_position(0.0);
        clock.record_buffer(9600, 0.0);

        let mut last = f64::NEG_INFINITY;
        for step in 0..50 {
            let now = step as f64 * 0.01;
            let pos = clock.position(now).unwrap();
            assert!(pos >= last, "clock went backwards at step {step}");
            last = pos;
        }
    }

    #[test]
    fn external_clock_pauses_and_resumes() {
        let clock = ExternalClock::new();
        assert!((clock.position(3.0) - 3.0).abs() < 1e-9);
        clock.pause(3.0);
        assert!((clock.position(10.0) - 3.0).abs() < 1e-9);
        clock.resume(10.0);
        assert!((clock.position(11.0) - 4.0).abs() < 1e-9);
        // Redundant transitions are no-ops.
        clock.resume(12.0);
        assert!((clock.position(12.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn video_master_reports_no_sync_reference() {
        let clocks = ClockSet::new(SyncMode::VideoMaster);
        clocks.video().set_current(1.0, 0.0);
        assert!(clocks.master_position(0.0).is_some());
        assert_eq!(clocks.sync_reference(0.0), None);
    }

    #[test]
    fn external_master_is_always_known() {
        let clocks = ClockSet::new(SyncMode::ExternalMaster);
        assert!(clocks.master_position(clocks.now()).is_some());
    }
}
