//! The stall watchdog: a timer thread that samples a last-frame timestamp
//! on a fixed tick and calls back into the owning `CaptureSource` (spec §9
//! "Stall watchdog is a timer that samples a last-frame timestamp...
//! Cancellation of the timer must be idempotent").
//!
//! Grounded on `pipeline_scheduler.rs`'s `thread::spawn` + `Drop`-join
//! worker shape, generalized from a work queue to a periodic tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct StallWatchdog {
    stopped: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl StallWatchdog {
    pub fn spawn<F>(tick: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let stopped = Arc::new(AtomicBool::new(false));
        let worker_stopped = Arc::clone(&stopped);
        let worker = thread::Builder::new()
            .name("capture-stall-watchdog".to_string())
            .spawn(move || {
                while !worker_stopped.load(Ordering::SeqCst) {
                    thread::sleep(tick);
                    if worker_stopped.load(Ordering::SeqCst) {
                        break;
                    }
                    on_tick();
                }
            })
            .expect("spawning the stall watchdog thread");
        Self {
            stopped,
            worker: Some(worker),
        }
    }

    /// Idempotent: calling `stop` more than once, or from the thread that
    /// is itself processing a tick, never blocks or panics (spec §9).
    pub fn stop(mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for StallWatchdog {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn ticks_at_least_once_before_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counting = Arc::clone(&count);
        let watchdog = StallWatchdog::spawn(Duration::from_millis(5), move || {
            counting.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(30));
        watchdog.stop();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
