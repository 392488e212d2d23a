//! Shared data model and the polymorphic encoder contract (spec §3, §4.1).

use std::fmt;

/// A normalized display rotation. The host is the source of truth; the
/// client only ever rotates its presentation to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

/// `{width, height, rotation}` — the host's authoritative display geometry.
/// Sent to the client on connect and whenever rotation changes (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayConfig {
    pub width: i32,
    pub height: i32,
    pub rotation: Rotation,
}

impl DisplayConfig {
    pub fn new(width: i32, height: i32, rotation: Rotation) -> Self {
        Self {
            width,
            height,
            rotation,
        }
    }
}

/// A pointer action, as carried on the wire (spec §3, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Down = 0,
    Move = 1,
    Up = 2,
}

impl InputAction {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Down),
            1 => Some(Self::Move),
            2 => Some(Self::Up),
            _ => None,
        }
    }
}

/// `{action, pointer_count, (x,y), optional (x2,y2)}`, normalized to the
/// host display's logical extent (spec §3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSample {
    pub action: InputAction,
    pub x: f32,
    pub y: f32,
    pub second_pointer: Option<(f32, f32)>,
}

impl InputSample {
    pub fn pointer_count(&self) -> u8 {
        if self.second_pointer.is_some() { 2 } else { 1 }
    }
}

/// Opaque 8-byte ping payload, echoed verbatim by the server as Pong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingSample {
    pub client_send_timestamp: u64,
}

/// An Annex-B HEVC byte sequence delivered synchronously to the callback
/// registered on a `VideoEncoder` (spec §3, §4.1). The `bytes` view is only
/// guaranteed valid for the duration of the callback; callers that want to
/// retain data past that point must copy it.
pub struct EncodedFrame<'a> {
    pub bytes: &'a [u8],
    pub capture_timestamp_ns: u64,
    pub is_keyframe: bool,
}

impl fmt::Debug for EncodedFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedFrame")
            .field("len", &self.bytes.len())
            .field("capture_timestamp_ns", &self.capture_timestamp_ns)
            .field("is_keyframe", &self.is_keyframe)
            .finish()
    }
}

/// Live-reconfigurable encoder knobs (spec §4.1 `update_settings`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderSettings {
    pub bitrate_mbps: f32,
    pub quality: f32,
    pub gaming_boost: bool,
}

impl EncoderSettings {
    pub fn new(bitrate_mbps: f32, quality: f32, gaming_boost: bool) -> Self {
        Self {
            bitrate_mbps,
            quality: quality.clamp(0.0, 1.0),
            gaming_boost,
        }
    }

    /// Target average bits/sec implied by `bitrate_mbps` (spec §4.1: target
    /// = `bitrate_mbps * 10^6`, peak = `1.5x` target).
    pub fn target_bps(&self) -> u64 {
        (f64::from(self.bitrate_mbps) * 1_000_000.0) as u64
    }

    pub fn peak_bps(&self) -> u64 {
        (self.target_bps() as f64 * 1.5) as u64
    }

    /// VBV buffer sized to one second, per spec §4.1.
    pub fn vbv_buffer_bits(&self) -> u64 {
        self.target_bps()
    }
}

/// A GPU-resident pixel surface handed from the capture source to the
/// encoder (spec §4.2, §4.3). The core never inspects pixel contents; it
/// treats the handle opaquely and forwards it to whichever backend is
/// active. `generation` lets double-buffered callers detect whether a
/// surface handle refers to the buffer currently writable vs. in flight.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceHandle {
    pub slot: usize,
    pub generation: u64,
}

/// Semantic error kinds crossing the `VideoEncoder` boundary (spec §7).
/// Each subsystem module (`wire`, `capture`, `server`) defines its own
/// `thiserror` enum; `BackendError` is shared across all six encoder
/// backends since they otherwise have nothing in common.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid bitstream: {0}")]
    InvalidBitstream(String),
    #[error("temporary backpressure: {0}")]
    TemporaryBackpressure(String),
    #[error("device lost: {0}")]
    DeviceLost(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// The polymorphic encoder contract (spec §4.1). Every accepted `encode`
/// call eventually produces exactly one `EncodedFrame` through `on_frame`
/// since this system is all-intra (GOP=1); backends that must defer actual
/// hardware submission still deliver before `encode` returns.
pub trait VideoEncoder: Send {
    /// Submit one capture surface for encoding.
    fn encode(
        &mut self,
        surface: SurfaceHandle,
        capture_timestamp_ns: u64,
        on_frame: &mut dyn FnMut(EncodedFrame<'_>),
    ) -> Result<(), BackendError>;

    /// Apply live without recreating the session where the backend
    /// supports it (spec §4.1). Backends that cannot reconfigure live may
    /// rebuild their session transparently, but must not drop the
    /// connection or stop producing frames.
    fn update_settings(&mut self, settings: EncoderSettings) -> Result<(), BackendError>;

    /// Block until all pending output has been delivered via `on_frame`.
    fn flush(&mut self, on_frame: &mut dyn FnMut(EncodedFrame<'_>)) -> Result<(), BackendError>;

    /// Backend identifier for diagnostics (spec §4.1).
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_round_trips_through_degrees() {
        for deg in [0, 90, 180, 270] {
            assert_eq!(Rotation::from_degrees(deg).unwrap().degrees(), deg);
        }
        assert!(Rotation::from_degrees(45).is_none());
    }

    #[test]
    fn encoder_settings_compute_target_and_peak() {
        let settings = EncoderSettings::new(8.0, 0.5, false);
        assert_eq!(settings.target_bps(), 8_000_000);
        assert_eq!(settings.peak_bps(), 12_000_000);
        assert_eq!(settings.vbv_buffer_bits(), 8_000_000);
    }

    #[test]
    fn input_sample_pointer_count_reflects_second_pointer() {
        let one = InputSample {
            action: InputAction::Down,
            x: 0.1,
            y: 0.2,
            second_pointer: None,
        };
        assert_eq!(one.pointer_count(), 1);
        let two = InputSample {
            second_pointer: Some((0.3, 0.4)),
            ..one
        };
        assert_eq!(two.pointer_count(), 2);
    }
}
