//! Host pipeline: glues capture → encoder → server with an encode-queue
//! depth limit and a one-second stats window (spec §4.3).
//!
//! Grounded on the thread+`Drop`-join worker shape in
//! `pipeline_scheduler.rs`; the backpressure counter is `pipeline::
//! InFlightCredits` rather than a channel, matching spec §9's "counter-
//! gated backpressure (not channels)".

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::capture::CaptureSource;
use crate::contract::{BackendError, EncodedFrame, SurfaceHandle, VideoEncoder};
use crate::pipeline::InFlightCredits;
use crate::stats::SampleStats;

/// Cap on simultaneously in-flight encodes (spec §4.3: "If ≥ 2, skip this
/// frame").
pub const MAX_PENDING_ENCODES: usize = 2;
const MAX_CONSECUTIVE_ENCODE_FAILURES: u32 = 3;

/// One second of fps/bitrate/frame-age observability (spec §4.3 point 4,
/// §7 "one-per-second stats tuple").
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStatsSample {
    pub fps: f64,
    pub mbps: f64,
    pub avg_frame_age_ms: f64,
    pub dropped_frames: u64,
}

pub trait StatsObserver: Send {
    fn on_stats(&mut self, sample: PipelineStatsSample);
}

struct NoopStatsObserver;
impl StatsObserver for NoopStatsObserver {
    fn on_stats(&mut self, _sample: PipelineStatsSample) {}
}

struct StatsAggregator {
    window_start: Instant,
    frame_count: u64,
    byte_count: u64,
    frame_age_ms: SampleStats,
    dropped_frames: u64,
}

impl StatsAggregator {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            frame_count: 0,
            byte_count: 0,
            frame_age_ms: SampleStats::unbounded(),
            dropped_frames: 0,
        }
    }

    fn record_sent(&mut self, bytes: usize, age_ms: f64) {
        self.frame_count += 1;
        self.byte_count += bytes as u64;
        self.frame_age_ms.push_value(age_ms);
    }

    fn record_dropped(&mut self) {
        self.dropped_frames += 1;
    }

    /// Rolls the window if a full second has elapsed, returning the sample
    /// to report and resetting the accumulators.
    fn maybe_roll(&mut self) -> Option<PipelineStatsSample> {
        let elapsed = self.window_start.elapsed();
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        let seconds = elapsed.as_secs_f64().max(0.001);
        let sample = PipelineStatsSample {
            fps: self.frame_count as f64 / seconds,
            mbps: (self.byte_count as f64 * 8.0 / 1_000_000.0) / seconds,
            avg_frame_age_ms: self.frame_age_ms.mean(),
            dropped_frames: self.dropped_frames,
        };
        self.window_start = Instant::now();
        self.frame_count = 0;
        self.byte_count = 0;
        self.frame_age_ms.clear();
        self.dropped_frames = 0;
        Some(sample)
    }
}

/// Callback invoked with every encoded frame, forwarded to the server's
/// `send_frame` (spec §4.3 "Encoder-output callback").
pub trait FrameSink: Send {
    fn send_frame(&mut self, bytes: &[u8], capture_timestamp_ns: u64, is_keyframe: bool);
}

struct EncodeFailureTracker {
    consecutive: u32,
}

/// Owns the capture→encode→sink glue. One instance per session; the
/// capture-dispatch context calls `on_capture_frame` for every frame the
/// `CaptureSource` produces, implementing the per-callback contract in
/// spec §4.3.
pub struct HostPipeline {
    encoder: Mutex<Box<dyn VideoEncoder>>,
    credits: InFlightCredits,
    stats: Mutex<StatsAggregator>,
    observer: Mutex<Box<dyn StatsObserver>>,
    failures: Mutex<EncodeFailureTracker>,
    sink: Mutex<Box<dyn FrameSink>>,
}

impl HostPipeline {
    pub fn new(encoder: Box<dyn VideoEncoder>, sink: Box<dyn FrameSink>) -> Self {
        Self {
            encoder: Mutex::new(encoder),
            credits: InFlightCredits::new(MAX_PENDING_ENCODES),
            stats: Mutex::new(StatsAggregator::new()),
            observer: Mutex::new(Box::new(NoopStatsObserver)),
            failures: Mutex::new(EncodeFailureTracker { consecutive: 0 }),
            sink,
        }
    }

    pub fn set_stats_observer(&self, observer: Box<dyn StatsObserver>) {
        *self.observer.lock().unwrap() = observer;
    }

    /// Implements spec §4.3's per-capture-callback contract: update
    /// timestamp, check `pending_encodes`, submit or drop.
    pub fn on_capture_frame(&self, surface: SurfaceHandle, capture_timestamp_ns: u64) {
        if !self.credits.try_acquire() {
            debug!(pending = ?self.credits.snapshot(), "dropping frame at source: encoder behind");
            self.stats.lock().unwrap().record_dropped();
            return;
        }

        let result = {
            let mut encoder = self.encoder.lock().unwrap();
            let mut sink = self.sink.lock().unwrap();
            let mut stats = self.stats.lock().unwrap();
            encoder.encode(surface, capture_timestamp_ns, &mut |frame: EncodedFrame<'_>| {
                let age_ms = age_ms_since(capture_timestamp_ns);
                stats.record_sent(frame.bytes.len(), age_ms);
                sink.send_frame(frame.bytes, frame.capture_timestamp_ns, frame.is_keyframe);
            })
        };
        self.credits.release();

        self.after_encode_result(result);
        self.maybe_report_stats();
    }

    fn after_encode_result(&self, result: Result<(), BackendError>) {
        let mut failures = self.failures.lock().unwrap();
        match result {
            Ok(()) => failures.consecutive = 0,
            Err(err) => {
                failures.consecutive += 1;
                warn!(error = %err, consecutive = failures.consecutive, "encode failed; frame dropped");
                if failures.consecutive >= MAX_CONSECUTIVE_ENCODE_FAILURES {
                    warn!("three consecutive encode failures; pipeline restart required (spec §4.5)");
                }
            }
        }
    }

    fn maybe_report_stats(&self) {
        let sample = self.stats.lock().unwrap().maybe_roll();
        if let Some(sample) = sample {
            self.observer.lock().unwrap().on_stats(sample);
        }
    }

    pub fn update_settings(&self, settings: crate::contract::EncoderSettings) -> Result<(), BackendError> {
        self.encoder.lock().unwrap().update_settings(settings)
    }
}

fn age_ms_since(capture_timestamp_ns: u64) -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    now_ns.saturating_sub(capture_timestamp_ns) as f64 / 1_000_000.0
}

/// Spawns the capture-dispatch context that drives `HostPipeline` from a
/// `CaptureSource` (spec §5: "Capture dispatch context: single-threaded,
/// high-priority... never blocks").
pub struct PipelineRunner {
    stop: Arc<std::sync::atomic::AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PipelineRunner {
    pub fn spawn(capture: Arc<CaptureSource>, pipeline: Arc<HostPipeline>, fps: u32) -> Self {
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let frame_interval = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
        let worker = thread::Builder::new()
            .name("capture-dispatch".to_string())
            .spawn(move || {
                info!("capture dispatch context started");
                while !worker_stop.load(Ordering::SeqCst) {
                    match capture.poll_frame() {
                        Ok(Some(frame)) => {
                            pipeline.on_capture_frame(frame.surface, frame.capture_timestamp_ns);
                        }
                        Ok(None) => {}
                        Err(err) => warn!(error = %err, "capture poll failed"),
                    }
                    thread::sleep(frame_interval);
                }
            })
            .expect("spawning the capture dispatch thread");
        Self {
            stop,
            worker: Some(worker),
        }
    }
}

impl Drop for PipelineRunner {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{BackendError as CErr, EncoderSettings};

    struct StubEncoder {
        fail_next: bool,
    }

    impl VideoEncoder for StubEncoder {
        fn encode(
            &mut self,
            _surface: SurfaceHandle,
            capture_timestamp_ns: u64,
            on_frame: &mut dyn FnMut(EncodedFrame<'_>),
        ) -> Result<(), CErr> {
            if self.fail_next {
                return Err(CErr::Backend("stub failure".to_string()));
            }
            let bytes = [0u8; 4];
            on_frame(EncodedFrame {
                bytes: &bytes,
                capture_timestamp_ns,
                is_keyframe: true,
            });
            Ok(())
        }

        fn update_settings(&mut self, _settings: EncoderSettings) -> Result<(), CErr> {
            Ok(())
        }

        fn flush(&mut self, _on_frame: &mut dyn FnMut(EncodedFrame<'_>)) -> Result<(), CErr> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stub"
        }
    }

    struct RecordingSink {
        sent: Vec<usize>,
    }

    impl FrameSink for RecordingSink {
        fn send_frame(&mut self, bytes: &[u8], _capture_timestamp_ns: u64, _is_keyframe: bool) {
            self.sent.push(bytes.len());
        }
    }

    #[test]
    fn sends_frame_through_to_sink() {
        let pipeline = HostPipeline::new(
            Box::new(StubEncoder { fail_next: false }),
            Box::new(RecordingSink { sent: Vec::new() }),
        );
        pipeline.on_capture_frame(SurfaceHandle { slot: 0, generation: 1 }, 0);
        // Can't inspect the boxed sink directly after move; exercise via
        // credits instead, which must be fully released after the call.
        assert_eq!(pipeline.credits.snapshot().0, 0);
    }

    #[test]
    fn dropping_frame_when_credits_exhausted() {
        let pipeline = HostPipeline::new(
            Box::new(StubEncoder { fail_next: false }),
            Box::new(RecordingSink { sent: Vec::new() }),
        );
        assert!(pipeline.credits.try_acquire());
        assert!(pipeline.credits.try_acquire());
        pipeline.on_capture_frame(SurfaceHandle { slot: 0, generation: 1 }, 0);
        assert_eq!(pipeline.stats.lock().unwrap().dropped_frames, 1);
    }
}
