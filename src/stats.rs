//! Rolling sample statistics shared by the host stats aggregator
//! (`host_pipeline`) and the client decoder feed's FPS/jitter window
//! (spec §4.3, §4.6, §7).
//!
//! Grounded on the `SampleStats` struct that appeared, identically, in both
//! `vt_backend.rs` and `nv_backend.rs` — unified here into one module used
//! by both host and client code instead of kept duplicated.

use std::collections::VecDeque;

/// Mean/percentile tracker over either an unbounded sample set (host stats,
/// reset every second) or a fixed-capacity sliding window (client FPS/
/// jitter, spec §4.6: "a 120-sample sliding window").
#[derive(Debug, Clone)]
pub struct SampleStats {
    samples: VecDeque<f64>,
    capacity: Option<usize>,
}

impl SampleStats {
    pub fn unbounded() -> Self {
        Self {
            samples: VecDeque::new(),
            capacity: None,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn push_value(&mut self, value: f64) {
        self.samples.push_back(value);
        if let Some(capacity) = self.capacity {
            while self.samples.len() > capacity {
                self.samples.pop_front();
            }
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn percentile(&self, percentile: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let rank = ((percentile / 100.0) * n as f64)
            .ceil()
            .clamp(1.0, n as f64) as usize;
        sorted[rank - 1]
    }

    pub fn p95(&self) -> f64 {
        self.percentile(95.0)
    }

    pub fn p99(&self) -> f64 {
        self.percentile(99.0)
    }
}

/// Tracks frame-to-frame interval and jitter (deviation from the prior
/// interval) over a sliding window, feeding the client decoder feed's
/// output FPS/jitter stats (spec §4.6).
#[derive(Debug, Clone)]
pub struct FrameCadenceWindow {
    intervals: SampleStats,
    last_timestamp_ns: Option<u64>,
}

impl FrameCadenceWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            intervals: SampleStats::with_capacity(window_size),
            last_timestamp_ns: None,
        }
    }

    /// Record one output frame's presentation timestamp.
    pub fn record(&mut self, timestamp_ns: u64) {
        if let Some(previous) = self.last_timestamp_ns {
            let interval_ms = timestamp_ns.saturating_sub(previous) as f64 / 1_000_000.0;
            self.intervals.push_value(interval_ms);
        }
        self.last_timestamp_ns = Some(timestamp_ns);
    }

    /// Frames per second implied by the mean interval; 0.0 until at least
    /// two frames have been recorded.
    pub fn fps(&self) -> f64 {
        let mean_ms = self.intervals.mean();
        if mean_ms <= 0.0 { 0.0 } else { 1000.0 / mean_ms }
    }

    /// p99 interval minus mean interval, in milliseconds — the jitter
    /// figure surfaced alongside fps.
    pub fn jitter_p99_ms(&self) -> f64 {
        (self.intervals.p99() - self.intervals.mean()).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_evicts_oldest_sample() {
        let mut stats = SampleStats::with_capacity(3);
        for value in [1.0, 2.0, 3.0, 4.0] {
            stats.push_value(value);
        }
        assert_eq!(stats.len(), 3);
        assert_eq!(stats.mean(), 3.0); // (2+3+4)/3
    }

    #[test]
    fn unbounded_stats_track_percentiles() {
        let mut stats = SampleStats::unbounded();
        for value in 1..=100 {
            stats.push_value(value as f64);
        }
        assert_eq!(stats.p95(), 95.0);
        assert_eq!(stats.p99(), 99.0);
    }

    #[test]
    fn cadence_window_reports_fps_from_intervals() {
        let mut window = FrameCadenceWindow::new(120);
        let mut timestamp_ns = 0u64;
        for _ in 0..60 {
            window.record(timestamp_ns);
            timestamp_ns += 16_666_667; // ~60fps
        }
        let fps = window.fps();
        assert!((fps - 60.0).abs() < 1.0, "fps was {fps}");
    }
}
