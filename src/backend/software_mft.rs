//! Platform-software backend: the CPU HEVC Media Foundation transform. Same
//! submit/drain model as `intel_mft`, asking `MfEncodeSession` for the
//! synchronous software transform instead of a hardware one; this is the
//! slow, last-resort path a host without any hardware encoder still
//! functions on (spec §4.1 backend table, "guarantees the system functions
//! even on hosts without hardware encode").

use std::time::Instant;

use super::BackendInitOpts;
use super::mf_common::{Kind, MfEncodeSession, synthetic_nv12_frame};
use crate::bitstream::{ParameterSetCache, StatefulBitstreamAssembler};
use crate::contract::{BackendError, EncodedFrame, EncoderSettings, SurfaceHandle, VideoEncoder};
use crate::stats::SampleStats;

pub struct SoftwareMftEncoder {
    mf: MfEncodeSession,
    width: u32,
    height: u32,
    fps: u32,
    assembler: StatefulBitstreamAssembler,
    encode_latency_ms: SampleStats,
}

impl SoftwareMftEncoder {
    pub fn try_create(opts: &BackendInitOpts) -> Result<Self, BackendError> {
        let mf = MfEncodeSession::create(
            Kind::Software,
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
            encode_latency_ms: SampleStats::with_capacity(120),
        })
    }

    /// Software encode latency is unbounded in principle (spec §5); this is
    /// tracked purely for diagnostics, not to gate anything in-process.
    pub fn encode_latency_p99_ms(&self) -> f64 {
        self.encode_latency_ms.p99()
    }
}

impl VideoEncoder for SoftwareMftEncoder {
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

        let start = Instant::now();
        let raw = self.mf.submit_and_drain(&nv12, timestamp_100ns)?;
        self.encode_latency_ms
            .push_value(start.elapsed().as_secs_f64() * 1_000.0);

        let (access_units, cache) = self.assembler.push_chunk(&raw)?;
        deliver(&access_units, &cache, capture_timestamp_ns, on_frame);
        Ok(())
    }

    fn update_settings(&mut self, settings: EncoderSettings) -> Result<(), BackendError> {
        self.mf = MfEncodeSession::create(Kind::Software, self.width, self.height, self.fps, settings)?;
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
        "software_mft"
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
