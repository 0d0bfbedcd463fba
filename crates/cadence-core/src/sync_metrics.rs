//! A/V synchronization quality instrumentation.
//!
//! Tracks the signed drift between presented video timestamps and the master
//! clock. Updates are lock-free atomics so the refresh scheduler can record
//! every presentation without contention; any thread may take a snapshot.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Drift within this bound counts as in sync (±40ms is imperceptible; the
/// extra headroom absorbs scheduler jitter).
pub const SYNC_DRIFT_THRESHOLD_MS: i64 = 100;

/// Drift beyond this is clearly visible.
pub const SYNC_DRIFT_SEVERE_MS: i64 = 200;

struct MetricsInner {
    /// Most recent drift in microseconds (video − master, positive = video ahead)
    current_drift_us: AtomicI64,
    /// Largest positive drift seen
    max_drift_ahead_us: AtomicI64,
    /// Largest negative drift seen
    max_drift_behind_us: AtomicI64,
    /// Sum of absolute drift for the average
    total_drift_us: AtomicU64,
    /// Presentations recorded
    sample_count: AtomicU64,
    /// Presentations whose drift exceeded the threshold
    out_of_sync_count: AtomicU64,
}

/// Shared drift tracker.
#[derive(Clone)]
pub struct SyncMetrics {
    inner: Arc<MetricsInner>,
}

impl SyncMetrics {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                current_drift_us: AtomicI64::new(0),
                max_drift_ahead_us: AtomicI64::new(0),
                max_drift_behind_us: AtomicI64::new(0),
                total_drift_us: AtomicU64::new(0),
                sample_count: AtomicU64::new(0),
                out_of_sync_count: AtomicU64::new(0),
            }),
        }
    }

    /// Records one presentation: the frame's pts and the master position it
    /// was judged against, both in seconds.
    pub fn record(&self, video_pts: f64, master_position: f64) {
        let drift_us = ((video_pts - master_position) * 1_000_000.0) as i64;
        let inner = &self.inner;

        inner.current_drift_us.store(drift_us, Ordering::Relaxed);
        inner.max_drift_ahead_us.fetch_max(drift_us, Ordering::Relaxed);
        inner.max_drift_behind_us.fetch_min(drift_us, Ordering::Relaxed);
        inner
            .total_drift_us
            .fetch_add(drift_us.unsigned_abs(), Ordering::Relaxed);
        inner.sample_count.fetch_add(1, Ordering::Relaxed);
        if drift_us.abs() > SYNC_DRIFT_THRESHOLD_MS * 1000 {
            inner.out_of_sync_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns true if the most recent drift is within the threshold.
    pub fn is_in_sync(&self) -> bool {
        self.inner.current_drift_us.load(Ordering::Relaxed).abs()
            <= SYNC_DRIFT_THRESHOLD_MS * 1000
    }

    /// Clears all recorded values.
    pub fn reset(&self) {
        let inner = &self.inner;
        inner.current_drift_us.store(0, Ordering::Relaxed);
        inner.max_drift_ahead_us.store(0, Ordering::Relaxed);
        inner.max_drift_behind_us.store(0, Ordering::Relaxed);
        inner.total_drift_us.store(0, Ordering::Relaxed);
        inner.sample_count.store(0, Ordering::Relaxed);
        inner.out_of_sync_count.store(0, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of all counters.
    pub fn snapshot(&self) -> SyncSnapshot {
        let inner = &self.inner;
        SyncSnapshot {
            current_drift_us: inner.current_drift_us.load(Ordering::Relaxed),
            max_drift_ahead_us: inner.max_drift_ahead_us.load(Ordering::Relaxed),
            max_drift_behind_us: inner.max_drift_behind_us.load(Ordering::Relaxed),
            total_drift_us: inner.total_drift_us.load(Ordering::Relaxed),
            sample_count: inner.sample_count.load(Ordering::Relaxed),
            out_of_sync_count: inner.out_of_sync_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the drift counters.
#[derive(Debug, Clone, Copy)]
pub struct SyncSnapshot {
    /// Most recent drift in microseconds
    pub current_drift_us: i64,
    /// Largest positive drift seen
    pub max_drift_ahead_us: i64,
    /// Largest negative drift seen
    pub max_drift_behind_us: i64,
    /// Sum of absolute drift
    pub total_drift_us: u64,
    /// Presentations recorded
    pub sample_count: u64,
    /// Presentations beyond the threshold
    pub out_of_sync_count: u64,
}

impl SyncSnapshot {
    /// Most recent drift in milliseconds.
    pub fn current_drift_ms(&self) -> i64 {
        self.current_drift_us / 1000
    }

    /// Largest absolute drift in milliseconds.
    pub fn max_drift_ms(&self) -> i64 {
        self.max_drift_ahead_us
            .max(-self.max_drift_behind_us)
            .max(0)
            / 1000
    }

    /// Mean absolute drift in milliseconds.
    pub fn avg_drift_ms(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.total_drift_us as f64 / self.sample_count as f64 / 1000.0
    }

    /// Share of presentations beyond the threshold, in percent.
    pub fn out_of_sync_percentage(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.out_of_sync_count as f64 / self.sample_count as f64 * 100.0
    }

    /// One-word quality rating based on the peak drift.
    pub fn quality_summary(&self) -> &'static str {
        let peak = self.max_drift_ms();
        if peak < SYNC_DRIFT_THRESHOLD_MS {
            "Excellent"
        } else if peak < SYNC_DRIFT_SEVERE_MS {
            "Fair"
        } else {
            "Poor"
        }
    }
}

impl std::fmt::Display for SyncSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "A/V Sync: {:+}ms current, {}ms peak, {:.1}ms avg, {:.1}% out of sync over {} frames ({})",
            self.current_drift_ms(),
            self.max_drift_ms(),
            self.avg_drift_ms(),
            self.out_of_sync_percentage(),
            self.sample_count,
            self.quality_summary(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_sync() {
        let metrics = SyncMetrics::new();
        for i in 0..100 {
            let t = i as f64 * 0.033;
            metrics.record(t, t);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.current_drift_ms(), 0);
        assert_eq!(snap.max_drift_ms(), 0);
        assert_eq!(snap.out_of_sync_count, 0);
        assert!(metrics.is_in_sync());
        assert_eq!(snap.quality_summary(), "Excellent");
    }

    #[test]
    fn video_ahead_counts_out_of_sync() {
        let metrics = SyncMetrics::new();
        metrics.record(1.12, 1.0);
        let snap = metrics.snapshot();
        assert_eq!(snap.current_drift_ms(), 120);
        assert_eq!(snap.max_drift_ahead_us, 120_000);
        assert_eq!(snap.out_of_sync_count, 1);
        assert!(!metrics.is_in_sync());
    }

    #[test]
    fn video_behind_within_threshold() {
        let metrics = SyncMetrics::new();
        metrics.record(0.95, 1.0);
        let snap = metrics.snapshot();
        assert_eq!(snap.current_drift_ms(), -50);
        assert_eq!(snap.max_drift_behind_us, -50_000);
        assert_eq!(snap.out_of_sync_count, 0);
        assert!(metrics.is_in_sync());
    }

    #[test]
    fn reset_clears_counters() {
        let metrics = SyncMetrics::new();
        metrics.record(1.3, 1.0);
        assert!(metrics.snapshot().sample_count > 0);
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.sample_count, 0);
        assert_eq!(snap.max_drift_ms(), 0);
        assert_eq!(snap.current_drift_us, 0);
    }

    #[test]
    fn display_formats_drift() {
        let metrics = SyncMetrics::new();
        metrics.record(1.05, 1.0);
        let text = format!("{}", metrics.snapshot());
        assert!(text.contains("A/V Sync"));
        assert!(text.contains("+50ms"));
    }
}
