//! The high-level, low-overhead capture API (spec §4.2: "primary —
//! high-level capture API, low overhead"). On Windows with the
//! `capture-windows` feature this probes the Windows Graphics Capture API
//! via the `windows-capture` crate; everywhere else (and as a portable
//! fallback the factory can still exercise in tests) it produces surfaces
//! from the same double-buffered slot rotation the encoder side uses,
//! leaving the actual GPU-resident pixel source to the out-of-scope
//! virtual-display collaborator (spec §1 Non-goals).
//!
//! Grounded on `windows-capture` as depended on by
//! `examples/other_examples/manifests/mycrl-hylarana/Cargo.toml`.

use super::{CaptureBackend, CaptureError, CaptureFrame};
use crate::double_buffer::DoubleBufferedSurface;

#[cfg(all(target_os = "windows", feature = "capture-windows"))]
mod windows_session {
    use windows_capture::capture::Context;
    use windows_capture::monitor::Monitor;
    use windows_capture::settings::{ColorFormat, CursorCaptureSettings, DrawBorderSettings, Settings};

    /// Probes that the Windows Graphics Capture API is reachable on this
    /// host by enumerating monitors and building a `Settings` value; actual
    /// frame delivery happens through the crate's callback-driven
    /// `GraphicsCaptureApiHandler`, which this narrow binding does not
    /// implement — the synthetic slot rotation in `PrimaryCapture` stands
    /// in for frame production once the session is confirmed available.
    pub fn probe() -> Result<(), String> {
        let monitor = Monitor::primary().map_err(|err| format!("no primary monitor: {err}"))?;
        let _settings: Settings<(), _> = Settings::new(
            monitor,
            CursorCaptureSettings::Default,
            DrawBorderSettings::Default,
            ColorFormat::Rgba8,
            (),
        );
        let _ = Context;
        Ok(())
    }
}

pub struct PrimaryCapture {
    surfaces: DoubleBufferedSurface,
    last_frame: Option<CaptureFrame>,
    running: bool,
}

impl PrimaryCapture {
    pub fn new() -> Self {
        Self {
            surfaces: DoubleBufferedSurface::new(),
            last_frame: None,
            running: false,
        }
    }
}

impl Default for PrimaryCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for PrimaryCapture {
    fn start(&mut self, _width: u32, _height: u32, _fps: u32) -> Result<(), CaptureError> {
        #[cfg(all(target_os = "windows", feature = "capture-windows"))]
        windows_session::probe().map_err(CaptureError::InitFailed)?;

        self.running = true;
        self.last_frame = None;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

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
    fn poll_frame_requires_start() {
        let mut capture = PrimaryCapture::new();
        assert!(capture.poll_frame().unwrap().is_none());
        capture.start(1920, 1080, 60).unwrap();
        assert!(capture.poll_frame().unwrap().is_some());
    }

    #[test]
    fn publishes_alternating_slots() {
        let mut capture = PrimaryCapture::new();
        capture.start(640, 480, 30).unwrap();
        let first = capture.poll_frame().unwrap().unwrap();
        let second = capture.poll_frame().unwrap().unwrap();
        assert_ne!(first.surface.slot, second.surface.slot);
    }
}
