//! Client decoder feed (spec §4.6): direct input-buffer consumption,
//! drop-on-starvation (never queued), a 120-sample FPS/jitter window, and
//! resolution-change re-setup. The actual hardware decode step is an
//! out-of-scope OS media framework collaborator (spec §6.3); this module
//! models it as a `SurfaceDecoder` trait seam with no concrete OS
//! implementation, mirroring `server::InputSink`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{info, warn};

use crate::client::buffer_pool::{BufferPool, FrameBuffer};
use crate::stats::FrameCadenceWindow;

const FPS_JITTER_WINDOW: usize = 120;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("decoder rejected configuration with low-latency flags")]
    LowLatencyRejected,
    #[error("decoder rejected even the mandatory resolution: {0}")]
    ConfigureFailed(String),
}

/// Implemented by whatever OS media framework binding owns the real
/// hardware decode session (spec §4.6). The core only ever calls this
/// trait; no concrete implementation ships in this crate.
pub trait SurfaceDecoder: Send {
    /// Opens the decoder at `width, height`. `low_latency` requests
    /// low-latency flags; callers retry with `false` if this returns
    /// `Err(LowLatencyRejected)` (spec §4.6 Configuration).
    fn configure(&mut self, width: u32, height: u32, low_latency: bool) -> Result<(), DecoderError>;

    /// Pops an available input-buffer index, or `None` if the decoder has
    /// no free input buffer right now (spec §4.6 step 2: "the decoder
    /// itself is the backpressure signal").
    fn try_acquire_input_buffer(&mut self) -> Option<usize>;

    /// Copies `bytes` into the input buffer at `index` and submits it with
    /// the given presentation-microsecond timestamp.
    fn submit_input_buffer(&mut self, index: usize, bytes: &[u8], presentation_us: u64);

    fn release(&mut self);
}

pub trait DecoderStatsObserver: Send {
    fn on_stats(&mut self, fps: f64, jitter_p99_ms: f64);
}

struct NoopStatsObserver;
impl DecoderStatsObserver for NoopStatsObserver {
    fn on_stats(&mut self, _fps: f64, _jitter_p99_ms: f64) {}
}

/// Drives a `SurfaceDecoder` per spec §4.6's `decode(bytes, size,
/// timestamp)` contract, buffer-pool return included.
pub struct DecoderFeed<D: SurfaceDecoder> {
    decoder: Mutex<D>,
    pool: Arc<BufferPool>,
    running: std::sync::atomic::AtomicBool,
    dropped_count: AtomicU64,
    width: Mutex<u32>,
    height: Mutex<u32>,
    cadence: Mutex<FrameCadenceWindow>,
    observer: Mutex<Box<dyn DecoderStatsObserver>>,
}

impl<D: SurfaceDecoder> DecoderFeed<D> {
    pub fn new(decoder: D, pool: Arc<BufferPool>) -> Self {
        Self {
            decoder: Mutex::new(decoder),
            pool,
            running: std::sync::atomic::AtomicBool::new(false),
            dropped_count: AtomicU64::new(0),
            width: Mutex::new(0),
            height: Mutex::new(0),
            cadence: Mutex::new(FrameCadenceWindow::new(FPS_JITTER_WINDOW)),
            observer: Mutex::new(Box::new(NoopStatsObserver)),
        }
    }

    pub fn set_stats_observer(&self, observer: Box<dyn DecoderStatsObserver>) {
        *self.observer.lock().unwrap() = observer;
    }

    fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Configuration per spec §4.6: request low-latency flags first, retry
    /// without them, then fail only if even the mandatory resolution is
    /// rejected.
    pub fn configure(&self, width: u32, height: u32) -> Result<(), DecoderError> {
        let mut decoder = self.decoder.lock().unwrap();
        match decoder.configure(width, height, true) {
            Ok(()) => {}
            Err(DecoderError::LowLatencyRejected) => {
                warn!("decoder rejected low-latency flags; retrying without them");
                decoder.configure(width, height, false)?;
            }
            Err(err) => return Err(err),
        }
        drop(decoder);
        *self.width.lock().unwrap() = width;
        *self.height.lock().unwrap() = height;
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Resolution change: release and re-set-up (spec §4.6 "Resolution
    /// change").
    pub fn reconfigure(&self, width: u32, height: u32) -> Result<(), DecoderError> {
        let same = *self.width.lock().unwrap() == width && *self.height.lock().unwrap() == height;
        if same {
            return Ok(());
        }
        self.decoder.lock().unwrap().release();
        self.running.store(false, Ordering::SeqCst);
        self.configure(width, height)
    }

    /// Implements spec §4.6's `decode(bytes, size, timestamp)` contract.
    pub fn decode(&self, buffer: FrameBuffer, size: usize, timestamp_ns: u64) {
        if !self.running.load(Ordering::SeqCst) {
            self.pool().release(buffer);
            return;
        }

        let mut decoder = self.decoder.lock().unwrap();
        let Some(index) = decoder.try_acquire_input_buffer() else {
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
            drop(decoder);
            self.pool().release(buffer);
            return;
        };

        decoder.submit_input_buffer(index, &buffer.data[..size], timestamp_ns / 1_000);
        drop(decoder);
        self.pool().release(buffer);
    }

    /// Called from the decoder's output callback when a decoded picture
    /// becomes available (spec §4.6 Output callback), feeding the
    /// 120-sample FPS/jitter window.
    pub fn on_output_available(&self, presentation_timestamp_ns: u64) {
        let mut cadence = self.cadence.lock().unwrap();
        cadence.record(presentation_timestamp_ns);
        let fps = cadence.fps();
        let jitter = cadence.jitter_p99_ms();
        drop(cadence);
        self.observer.lock().unwrap().on_stats(fps, jitter);
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }
}

impl<D: SurfaceDecoder> Drop for DecoderFeed<D> {
    fn drop(&mut self) {
        self.decoder.lock().unwrap().release();
        info!(dropped = self.dropped_count(), "decoder feed torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubDecoder {
        free_buffers: Vec<usize>,
        submitted: Vec<(usize, usize, u64)>,
        reject_low_latency: bool,
    }

    impl SurfaceDecoder for StubDecoder {
        fn configure(&mut self, _w: u32, _h: u32, low_latency: bool) -> Result<(), DecoderError> {
            if low_latency && self.reject_low_latency {
                return Err(DecoderError::LowLatencyRejected);
            }
            Ok(())
        }

        fn try_acquire_input_buffer(&mut self) -> Option<usize> {
            self.free_buffers.pop()
        }

        fn submit_input_buffer(&mut self, index: usize, bytes: &[u8], presentation_us: u64) {
            self.submitted.push((index, bytes.len(), presentation_us));
        }

        fn release(&mut self) {
            self.free_buffers.clear();
        }
    }

    #[test]
    fn decode_drops_when_no_input_buffer_available() {
        let pool = Arc::new(BufferPool::new());
        let decoder = StubDecoder {
            free_buffers: vec![],
            submitted: Vec::new(),
            reject_low_latency: false,
        };
        let feed = DecoderFeed::new(decoder, Arc::clone(&pool));
        feed.configure(1920, 1080).unwrap();

        let buffer = pool.acquire(16);
        feed.decode(buffer, 16, 1_000_000);
        assert_eq!(feed.dropped_count(), 1);
    }

    #[test]
    fn configure_retries_without_low_latency_on_rejection() {
        let pool = Arc::new(BufferPool::new());
        let decoder = StubDecoder {
            free_buffers: vec![0],
            submitted: Vec::new(),
            reject_low_latency: true,
        };
        let feed = DecoderFeed::new(decoder, pool);
        assert!(feed.configure(1920, 1080).is_ok());
    }
}
