//! Client input uplink (spec §4.7): a background single-threaded
//! submission context. Touches are never coalesced; pings fire on a
//! 1-second timer while the connection is up. An optional short-horizon
//! linear/quadratic extrapolator may project a forward position for
//! 1-pointer move samples without altering the wire format.
//!
//! Grounded on the worker-thread-with-`Drop` shutdown shape in
//! `pipeline_scheduler.rs`.

use std::io::Write;
use std::net::TcpStream;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::contract::{InputAction, InputSample, PingSample};
use crate::wire;

const PING_INTERVAL: Duration = Duration::from_secs(1);

enum UplinkTask {
    Input(InputSample),
    Shutdown,
}

/// A short-horizon linear/quadratic extrapolator over the last few
/// 1-pointer move samples (spec §4.7 "Optional prediction"). A pure
/// function: it never mutates what is sent on the wire format, only what
/// position is substituted into an outgoing `Move` sample.
#[derive(Debug, Default)]
pub struct MovePredictor {
    history: Vec<(f32, f32, Instant)>,
}

impl MovePredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one observed move sample and returns the forward-projected
    /// position, or the raw position until there is enough history.
    pub fn push_and_predict(&mut self, x: f32, y: f32, horizon: Duration) -> (f32, f32) {
        let now = Instant::now();
        self.history.push((x, y, now));
        if self.history.len() > 3 {
            self.history.remove(0);
        }

        match self.history.as_slice() {
            [(x0, y0, t0), (x1, y1, t1)] => {
                extrapolate_linear(*x0, *y0, *t0, *x1, *y1, *t1, now, horizon)
            }
            [(x0, y0, t0), (x1, y1, t1), (x2, y2, t2)] => {
                extrapolate_quadratic(*x0, *y0, *t0, *x1, *y1, *t1, *x2, *y2, *t2, now, horizon)
            }
            _ => (x, y),
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

fn extrapolate_linear(
    x0: f32,
    y0: f32,
    t0: Instant,
    x1: f32,
    y1: f32,
    t1: Instant,
    now: Instant,
    horizon: Duration,
) -> (f32, f32) {
    let dt = t1.saturating_duration_since(t0).as_secs_f32();
    if dt <= f32::EPSILON {
        return (x1, y1);
    }
    let target_dt = now.saturating_duration_since(t1).as_secs_f32() + horizon.as_secs_f32();
    let vx = (x1 - x0) / dt;
    let vy = (y1 - y0) / dt;
    (x1 + vx * target_dt, y1 + vy * target_dt)
}

#[allow(clippy::too_many_arguments)]
fn extrapolate_quadratic(
    x0: f32,
    y0: f32,
    t0: Instant,
    x1: f32,
    y1: f32,
    t1: Instant,
    x2: f32,
    y2: f32,
    t2: Instant,
    now: Instant,
    horizon: Duration,
) -> (f32, f32) {
    let dt1 = t1.saturating_duration_since(t0).as_secs_f32();
    let dt2 = t2.saturating_duration_since(t1).as_secs_f32();
    if dt1 <= f32::EPSILON || dt2 <= f32::EPSILON {
        return extrapolate_linear(x1, y1, t1, x2, y2, t2, now, horizon);
    }
    let v1x = (x1 - x0) / dt1;
    let v1y = (y1 - y0) / dt1;
    let v2x = (x2 - x1) / dt2;
    let v2y = (y2 - y1) / dt2;
    let ax = (v2x - v1x) / dt2;
    let ay = (v2y - v1y) / dt2;
    let target_dt = now.saturating_duration_since(t2).as_secs_f32() + horizon.as_secs_f32();
    (
        x2 + v2x * target_dt + 0.5 * ax * target_dt * target_dt,
        y2 + v2y * target_dt + 0.5 * ay * target_dt * target_dt,
    )
}

/// Owns the background submission thread. `submit` is non-blocking from
/// the caller's perspective (spec §5: input/ping context is its own
/// thread; callers on the UI/gesture-observing context never block on the
/// network).
pub struct InputUplink {
    tasks: Sender<UplinkTask>,
    worker: Option<JoinHandle<()>>,
}

impl InputUplink {
    pub fn spawn(mut stream: TcpStream) -> Self {
        let (tasks, rx) = mpsc::channel::<UplinkTask>();
        let worker = thread::Builder::new()
            .name("input-uplink".to_string())
            .spawn(move || {
                let mut last_ping = Instant::now();
                loop {
                    let wait = PING_INTERVAL
                        .checked_sub(last_ping.elapsed())
                        .unwrap_or(Duration::ZERO);
                    match rx.recv_timeout(wait) {
                        Ok(UplinkTask::Input(sample)) => {
                            if let Err(err) = wire::write_input_sample(&mut stream, &sample) {
                                warn!(error = %err, "failed to send input sample");
                                break;
                            }
                        }
                        Ok(UplinkTask::Shutdown) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }

                    if last_ping.elapsed() >= PING_INTERVAL {
                        let ping = PingSample {
                            client_send_timestamp: now_ns(),
                        };
                        if let Err(err) = wire::write_ping(&mut stream, ping) {
                            warn!(error = %err, "failed to send ping");
                            break;
                        }
                        let _ = stream.flush();
                        last_ping = Instant::now();
                    }
                }
            })
            .expect("spawning the input uplink thread");
        Self {
            tasks,
            worker: Some(worker),
        }
    }

    /// Submits one observed sample, uncoalesced (spec §4.7: "Coalescing is
    /// not applied to touches; each observed sample is serialized and
    /// sent").
    pub fn submit(&self, sample: InputSample) {
        let _ = self.tasks.send(UplinkTask::Input(sample));
    }

    pub fn submit_move(&self, x: f32, y: f32) {
        self.submit(InputSample {
            action: InputAction::Move,
            x,
            y,
            second_pointer: None,
        });
    }
}

impl Drop for InputUplink {
    fn drop(&mut self) {
        let _ = self.tasks.send(UplinkTask::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn now_ns() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_predictor_extrapolates_constant_velocity() {
        let mut predictor = MovePredictor::new();
        predictor.push_and_predict(0.0, 0.0, Duration::ZERO);
        thread::sleep(Duration::from_millis(10));
        let (x, y) = predictor.push_and_predict(1.0, 0.0, Duration::from_millis(10));
        // Moving right at a steady rate; prediction should continue rightward.
        assert!(x >= 1.0);
        assert_eq!(y, 0.0);
    }

    #[test]
    fn predictor_returns_raw_position_with_insufficient_history() {
        let mut predictor = MovePredictor::new();
        let (x, y) = predictor.push_and_predict(5.0, 5.0, Duration::from_millis(10));
        assert_eq!((x, y), (5.0, 5.0));
    }
}
