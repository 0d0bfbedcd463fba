//! Adaptive refresh scheduler.
//!
//! A self-repacing loop: after presenting a frame it computes how long to
//! wait before the next refresh and sleeps that long. The wait is derived
//! from the gap between consecutive frame timestamps, then corrected against
//! the master clock — a late frame is shown immediately (skip), an early one
//! holds the previous frame twice as long (repeat).

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clock::ClockSet;
use crate::picture::PictureQueue;
use crate::session::{PlaybackState, StateCell};
use crate::sync_metrics::SyncMetrics;
use crate::video::FramePresenter;

/// Floor for the drift threshold; frame gaps shorter than this do not make
/// the scheduler more trigger-happy.
pub const AV_SYNC_THRESHOLD: f64 = 0.1;

/// Drift beyond this is a desync event too large to correct smoothly; it is
/// logged and left alone.
pub const AV_NOSYNC_THRESHOLD: f64 = 10.0;

/// Minimum scheduled delay: never refresh faster than 100 Hz, even under
/// pathological timestamps.
pub const MIN_REFRESH_DELAY: f64 = 0.010;

/// Retry delay while the picture queue is empty.
const EMPTY_RETRY: Duration = Duration::from_millis(1);

/// Sleep quantum while paused, and the granularity at which longer sleeps
/// re-check the playback state.
const IDLE_QUANTUM: Duration = Duration::from_millis(10);

/// Fallback frame gap before the first two frames establish a real one.
const INITIAL_FRAME_DELAY: f64 = 0.040;

/// The drift-correction arithmetic, kept free of threads and clocks so the
/// boundary behavior is directly testable.
#[derive(Debug)]
pub struct RefreshTiming {
    last_pts: f64,
    last_delay: f64,
    /// Absolute target time (session seconds) for the current frame
    frame_timer: f64,
}

impl RefreshTiming {
    /// Creates the timing state anchored at session time `now`.
    pub fn new(now: f64) -> Self {
        Self {
            last_pts: 0.0,
            last_delay: INITIAL_FRAME_DELAY,
            frame_timer: now,
        }
    }

    /// Computes how long to wait before presenting the frame at `pts`.
    ///
    /// `reference` is the master clock position, or `None` when no correction
    /// applies (video-master mode, or master not started yet). Returns the
    /// actual delay in seconds, floored at [`MIN_REFRESH_DELAY`].
    pub fn next_delay(&mut self, pts: f64, reference: Option<f64>, now: f64) -> f64 {
        let mut delay = pts - self.last_pts;
        if delay <= 0.0 || delay >= 1.0 {
            // Missing or implausible timestamp gap: reuse the previous one.
            delay = self.last_delay;
        }
        self.last_delay = delay;
        self.last_pts = pts;

        if let Some(reference) = reference {
            let diff = pts - reference;
            let sync_threshold = if delay > AV_SYNC_THRESHOLD {
                delay
            } else {
                AV_SYNC_THRESHOLD
            };
            if diff.abs() < AV_NOSYNC_THRESHOLD {
                if diff <= -sync_threshold {
                    tracing::trace!("frame late by {:.3}s, skipping delay", -diff);
                    delay = 0.0;
                } else if diff >= sync_threshold {
                    tracing::trace!("frame early by {diff:.3}s, repeating");
                    delay *= 2.0;
                }
            } else {
                tracing::warn!(
                    "A/V desync beyond correction: diff={diff:.3}s pts={pts:.3}s ref={reference:.3}s"
                );
            }
        }

        self.frame_timer += delay;
        let actual = self.frame_timer - now;
        if actual < MIN_REFRESH_DELAY {
            MIN_REFRESH_DELAY
        } else {
            actual
        }
    }
}

/// Owner handle for the refresh scheduler thread.
pub struct RefreshThread {
    handle: Option<JoinHandle<()>>,
}

impl RefreshThread {
    pub(crate) fn spawn<P: FramePresenter + 'static>(
        presenter: P,
        pictures: Arc<PictureQueue>,
        clocks: Arc<ClockSet>,
        state: Arc<StateCell>,
        metrics: SyncMetrics,
    ) -> Self {
        let handle = thread::spawn(move || refresh_loop(presenter, pictures, clocks, state, metrics));
        Self {
            handle: Some(handle),
        }
    }
}

impl Drop for RefreshThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Sleeps up to `seconds`, returning early once Stop is observed.
fn sleep_observing_stop(seconds: f64, state: &StateCell) {
    let mut remaining = Duration::from_secs_f64(seconds.max(0.0));
    while !remaining.is_zero() {
        if state.get() == PlaybackState::Stopped {
            return;
        }
        let chunk = remaining.min(IDLE_QUANTUM);
        thread::sleep(chunk);
        remaining -= chunk;
    }
}

fn refresh_loop<P: FramePresenter>(
    mut presenter: P,
    pictures: Arc<PictureQueue>,
    clocks: Arc<ClockSet>,
    state: Arc<StateCell>,
    metrics: SyncMetrics,
) {
    let mut timing = RefreshTiming::new(clocks.now());

    loop {
        match state.get() {
            PlaybackState::Stopped => break,
            PlaybackState::Paused => {
                thread::sleep(IDLE_QUANTUM);
                continue;
            }
            PlaybackState::Playing => {}
        }
        if pictures.is_stopped() {
            break;
        }

        // Starved: come back soon without presenting.
        let Some(picture) = pictures.peek() else {
            thread::sleep(EMPTY_RETRY);
            continue;
        };

        let now = clocks.now();
        // The frame becomes "current" for clock extrapolation the moment it
        // is chosen, before any drift math reads the video position.
        clocks.video().set_current(picture.pts, now);

        let reference = clocks.sync_reference(now);
        let actual_delay = timing.next_delay(picture.pts, reference, now);
        if let Some(reference) = reference {
            metrics.record(picture.pts, reference);
        }

        presenter.present(&picture);
        pictures.advance();

        sleep_observing_stop(actual_delay, &state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Timing state with an established 0.2s frame gap, mid-stream.
    fn timing_at(pts: f64, delay: f64, now: f64) -> RefreshTiming {
        RefreshTiming {
            last_pts: pts,
            last_delay: delay,
            frame_timer: now,
        }
    }

    #[test]
    fn late_frame_skips_delay() {
        let mut timing = timing_at(1.0, 0.2, 10.0);
        // Next frame at 1.2s while master is at 1.45s: 0.25s late.
        let actual = timing.next_delay(1.2, Some(1.45), 10.0);
        // Delay collapsed to 0; only the floor remains.
        assert_eq!(actual, MIN_REFRESH_DELAY);
        assert_eq!(timing.frame_timer, 10.0);
    }

    #[test]
    fn early_frame_doubles_delay() {
        let mut timing = timing_at(1.0, 0.2, 10.0);
        // Master at 0.95s: frame is 0.25s early, past the 0.2s threshold.
        let actual = timing.next_delay(1.2, Some(0.95), 10.0);
        assert!((actual - 0.4).abs() < 1e-9);
    }

    #[test]
    fn in_threshold_drift_leaves_delay_unchanged() {
        let mut timing = timing_at(1.0, 0.2, 10.0);
        // 0.05s of drift is within the 0.2s threshold.
        let actual = timing.next_delay(1.2, Some(1.15), 10.0);
        assert!((actual - 0.2).abs() < 1e-9);
    }

    #[test]
    fn threshold_floor_applies_to_short_gaps() {
        // 30fps gap (0.033s) is below the 0.1s floor, so a 0.05s drift must
        // not trigger a correction.
        let mut timing = timing_at(1.0, 0.033, 10.0);
        let actual = timing.next_delay(1.033, Some(0.983), 10.0);
        assert!((actual - 0.033).abs() < 1e-9);
    }

    #[test]
    fn invalid_gap_reuses_previous_delay() {
        let mut timing = timing_at(1.0, 0.2, 10.0);
        // Non-positive gap: previous delay is substituted exactly.
        let actual = timing.next_delay(0.99, None, 10.0);
        assert!((actual - 0.2).abs() < 1e-9);
        assert_eq!(timing.last_delay, 0.2);

        // Implausibly large gap likewise.
        let mut timing = timing_at(1.0, 0.2, 10.0);
        let actual = timing.next_delay(2.5, None, 10.0);
        assert!((actual - 0.2).abs() < 1e-9);
    }

    #[test]
    fn delay_never_below_floor() {
        let mut timing = timing_at(1.0, 0.012, 10.0);
        // Scheduler already behind wall clock by a lot.
        let actual = timing.next_delay(1.012, Some(1.012), 10.5);
        assert_eq!(actual, MIN_REFRESH_DELAY);
    }

    #[test]
    fn huge_desync_is_left_uncorrected() {
        let mut timing = timing_at(1.0, 0.2, 10.0);
        // 20s of drift: beyond the no-sync ceiling, delay stays as-is.
        let actual = timing.next_delay(1.2, Some(21.2), 10.0);
        assert!((actual - 0.2).abs() < 1e-9);
    }

    #[test]
    fn steady_stream_converges_to_frame_gap() {
        // 30fps frames against a master that tracks them perfectly, with the
        // loop presenting exactly on schedule.
        let mut timing = RefreshTiming::new(0.0);
        let mut now = 0.0;
        let mut last = 0.0;
        for i in 1..120 {
            let pts = i as f64 * 0.033;
            let actual = timing.next_delay(pts, Some(pts), now);
            now = timing.frame_timer;
            last = actual;
            assert!(actual >= MIN_REFRESH_DELAY);
        }
        assert!((last - 0.033).abs() < 1e-6, "delay was {last}");
    }
}
