//! AMD GPU backend: a runtime-loaded AMF driver DLL (`amfrt64.dll`) gates
//! availability, then the actual HEVC encode is driven through the Media
//! Foundation transform AMD's driver registers (spec §4.1 backend table).
//!
//! Grounded on `windows`-crate dynamic-library loading as used by the
//! Win32 RDP/media stacks in `examples/glamberson-IronRDP` and
//! `examples/other_examples/manifests/bybrooklyn-wavry/Cargo.toml`
//! (`windows = "0.61"`) for the driver probe, and on
//! `super::mf_common::MfEncodeSession` for the encode itself — AMD exposes
//! its hardware encoder to Media Foundation rather than a separate AMF-only
//! ABI surface this binding would otherwise have to reimplement.

use std::ffi::c_void;

use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows::core::{PCSTR, PCWSTR};

use super::BackendInitOpts;
use super::mf_common::{Kind, MfEncodeSession, synthetic_nv12_frame};
use crate::bitstream::{ParameterSetCache, StatefulBitstreamAssembler};
use crate::contract::{BackendError, EncodedFrame, EncoderSettings, SurfaceHandle, VideoEncoder};

/// `AMFInit`-style entry point signature, used only to confirm the AMD
/// runtime is actually installed before handing the real encode off to
/// Media Foundation.
type AmfInitFn = unsafe extern "system" fn(*mut c_void) -> i32;

struct DriverLibrary {
    module: HMODULE,
}

unsafe impl Send for DriverLibrary {}

impl DriverLibrary {
    fn load() -> Result<Self, BackendError> {
        let wide_name: Vec<u16> = "amfrt64.dll\0".encode_utf16().collect();
        let module = unsafe { LoadLibraryW(PCWSTR(wide_name.as_ptr())) }
            .map_err(|err| BackendError::UnsupportedConfig(format!("amfrt64.dll: {err}")))?;
        Ok(Self { module })
    }

    fn resolve(&self, symbol: &'static [u8]) -> Result<AmfInitFn, BackendError> {
        let addr = unsafe { GetProcAddress(self.module, PCSTR(symbol.as_ptr())) }
            .ok_or_else(|| BackendError::UnsupportedConfig(format!(
                "amfrt64.dll missing symbol {}",
                String::from_utf8_lossy(symbol)
            )))?;
        Ok(unsafe { std::mem::transmute::<unsafe extern "system" fn() -> isize, AmfInitFn>(addr) })
    }

    /// Confirms the AMF runtime is present and initializable. The encode
    /// path itself goes through `MfEncodeSession`, not this entry point;
    /// probing it is enough to decide whether this host even has an AMD
    /// encoder worth enumerating (spec §6.3 device-presence gating).
    fn probe(&self) -> Result<(), BackendError> {
        let init_fn = self.resolve(b"AMFInit\0")?;
        let status = unsafe { init_fn(std::ptr::null_mut()) };
        if status != 0 {
            return Err(BackendError::UnsupportedConfig(format!(
                "AMFInit returned {status}"
            )));
        }
        Ok(())
    }
}

pub struct AmdEncoder {
    _driver: DriverLibrary,
    mf: MfEncodeSession,
    width: u32,
    height: u32,
    fps: u32,
    assembler: StatefulBitstreamAssembler,
}

impl AmdEncoder {
    pub fn try_create(opts: &BackendInitOpts) -> Result<Self, BackendError> {
        let driver = DriverLibrary::load()?;
        driver.probe()?;
        let mf = MfEncodeSession::create(
            Kind::Hardware,
            opts.width,
            opts.height,
            opts.fps,
            opts.initial_settings,
        )?;
        Ok(Self {
            _driver: driver,
            mf,
            width: opts.width,
            height: opts.height,
            fps: opts.fps,
            assembler: StatefulBitstreamAssembler::new(),
        })
    }
}

impl VideoEncoder for AmdEncoder {
    fn encode(
        &mut self,
        surface: SurfaceHandle,
        capture_timestamp_ns: u64,
        on_frame: &mut dyn FnMut(EncodedFrame<'_>),
    ) -> Result<(), BackendError> {
        // No in-tree collaborator hands this backend real pixel content
        // (capture->encoder surface upload is the out-of-scope GPU device
        // collaborator's job, spec §6.3); stand in with deterministic NV12
        // keyed by the surface's generation.
        let nv12 = synthetic_nv12_frame(
            self.width as usize,
            self.height as usize,
            surface.generation as usize,
        );
        let timestamp_100ns = (capture_timestamp_ns / 100) as i64;
        let raw = self.mf.submit_and_drain(&nv12, timestamp_100ns)?;

        let (access_units, cache) = self.assembler.push_chunk(&raw)?;
        deliver(&access_units, &cache, capture_timestamp_ns, on_frame);
        Ok(())
    }

    fn update_settings(&mut self, settings: EncoderSettings) -> Result<(), BackendError> {
        self.mf = MfEncodeSession::create(Kind::Hardware, self.width, self.height, self.fps, settings)?;
        Ok(())
    }

    fn flush(&mut self, on_frame: &mut dyn FnMut(EncodedFrame<'_>)) -> Result<(), BackendError> {
        let raw = self.mf.drain()?;
        let (access_units, cache) = self.assembler.push_chunk(&raw)?;
        deliver(&access_units, &cache, 0, on_frame);
        let (access_units, cache) = self.assembler.flush()?;
        deliver(&access_units, &cache, 0, on_frame);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "amd"
    }
}

fn deliver(
    access_units: &[crate::bitstream::AccessUnit],
    cache: &ParameterSetCache,
    capture_timestamp_ns: u64,
    on_frame: &mut dyn FnMut(EncodedFrame<'_>),
) {
    for au in access_units {
        let bytes = au.to_annexb(cache);
        on_frame(EncodedFrame {
            bytes: &bytes,
            capture_timestamp_ns,
            is_keyframe: true,
        });
    }
}
