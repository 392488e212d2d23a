//! Annex-B HEVC NAL parsing, parameter-set tracking and keyframe framing
//! (spec §3, §4.1 "all-intra / Annex-B / parameter-set prepend" invariant).

use std::mem;

use crate::contract::BackendError;

/// HEVC `nal_unit_type` values this system cares about (ITU-T H.265 §7.4.2.2).
mod nal_type {
    pub const VPS: u8 = 32;
    pub const SPS: u8 = 33;
    pub const PPS: u8 = 34;
    pub const AUD: u8 = 35;
}

#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub nalus: Vec<Vec<u8>>,
    pub is_keyframe: bool,
}

impl AccessUnit {
    /// Serialize to Annex-B, prepending VPS/SPS/PPS ahead of the access
    /// unit's own NALs when it is a keyframe (spec §4.1 invariant: "every
    /// IDR access unit is preceded in the byte stream by its VPS, SPS and
    /// PPS, in that order"). Non-keyframe access units are serialized as-is
    /// since this system never emits one (GOP=1, all-intra) but the helper
    /// stays total rather than panicking if a backend ever does.
    pub fn to_annexb(&self, parameter_sets: &ParameterSetCache) -> Vec<u8> {
        let mut out = Vec::new();
        if self.is_keyframe {
            if let Some(sets) = parameter_sets.required() {
                for set in sets {
                    push_start_code_nal(&mut out, &set);
                }
            }
        }
        for nal in &self.nalus {
            push_start_code_nal(&mut out, nal);
        }
        out
    }
}

fn push_start_code_nal(out: &mut Vec<u8>, nal: &[u8]) {
    out.extend_from_slice(&[0, 0, 0, 1]);
    out.extend_from_slice(nal);
}

#[derive(Debug, Clone, Default)]
pub struct ParameterSetCache {
    vps: Option<Vec<u8>>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl ParameterSetCache {
    /// `Some` once all three parameter sets have been observed at least
    /// once; `None` beforehand (spec §4.1 edge case: encoder startup before
    /// the first IDR has no parameter sets to prepend).
    pub fn required(&self) -> Option<Vec<Vec<u8>>> {
        Some(vec![self.vps.clone()?, self.sps.clone()?, self.pps.clone()?])
    }

    fn observe(&mut self, nal: &[u8]) {
        if nal.is_empty() {
            return;
        }
        match (nal[0] >> 1) & 0x3f {
            nal_type::VPS => self.vps = Some(nal.to_vec()),
            nal_type::SPS => self.sps = Some(nal.to_vec()),
            nal_type::PPS => self.pps = Some(nal.to_vec()),
            _ => {}
        }
    }
}

/// Reassembles Annex-B access units out of arbitrarily-chunked byte ranges
/// (spec §4.1: the encoder may deliver a parameter set and its IDR slice as
/// separate `encode` outputs internally; this assembler is also used on the
/// client side of bench/test harnesses that feed the wire codec raw bytes).
#[derive(Debug, Default)]
pub struct StatefulBitstreamAssembler {
    pending: Vec<u8>,
    saw_aud: bool,
    current_nalus: Vec<Vec<u8>>,
    current_has_vcl: bool,
    current_has_key_vcl: bool,
    parameter_sets: ParameterSetCache,
}

impl StatefulBitstreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chunk(
        &mut self,
        chunk: &[u8],
    ) -> Result<(Vec<AccessUnit>, ParameterSetCache), BackendError> {
        if !chunk.is_empty() {
            self.pending.extend_from_slice(chunk);
        }
        let nalus = self.take_complete_nals(false);
        let access_units = self.process_nals(nalus);
        Ok((access_units, self.parameter_sets.clone()))
    }

    pub fn flush(&mut self) -> Result<(Vec<AccessUnit>, ParameterSetCache), BackendError> {
        let nalus = self.take_complete_nals(true);
        let mut access_units = self.process_nals(nalus);
        if self.current_has_vcl && !self.current_nalus.is_empty() {
            access_units.push(self.finish_current_access_unit());
        }
        Ok((access_units, self.parameter_sets.clone()))
    }

    fn process_nals(&mut self, nalus: Vec<Vec<u8>>) -> Vec<AccessUnit> {
        let mut out = Vec::new();

        for nal in nalus {
            self.parameter_sets.observe(&nal);

            if is_aud(&nal) {
                self.saw_aud = true;
                if self.current_has_vcl && !self.current_nalus.is_empty() {
                    out.push(self.finish_current_access_unit());
                } else {
                    self.current_nalus.clear();
                    self.current_has_vcl = false;
                    self.current_has_key_vcl = false;
                }
                continue;
            }

            if !self.saw_aud
                && is_vcl(&nal)
                && self.current_has_vcl
                && !self.current_nalus.is_empty()
            {
                out.push(self.finish_current_access_unit());
            }

            let nal_is_vcl = is_vcl(&nal);
            let nal_is_key = is_key_vcl(&nal);
            self.current_nalus.push(nal);
            if nal_is_vcl {
                self.current_has_vcl = true;
                self.current_has_key_vcl = self.current_has_key_vcl || nal_is_key;
            }
        }

        out
    }

    fn finish_current_access_unit(&mut self) -> AccessUnit {
        let au = AccessUnit {
            nalus: mem::take(&mut self.current_nalus),
            is_keyframe: self.current_has_key_vcl,
        };
        self.current_has_vcl = false;
        self.current_has_key_vcl = false;
        au
    }

    fn take_complete_nals(&mut self, finalize: bool) -> Vec<Vec<u8>> {
        if self.pending.is_empty() {
            return Vec::new();
        }

        let mut start_codes = find_start_codes(&self.pending);
        if start_codes.is_empty() {
            if finalize {
                self.pending.clear();
            }
            return Vec::new();
        }

        if start_codes[0].0 > 0 {
            let remainder = self.pending.split_off(start_codes[0].0);
            self.pending = remainder;
            start_codes = find_start_codes(&self.pending);
            if start_codes.is_empty() {
                return Vec::new();
            }
        }

        let mut nalus = Vec::new();
        for window in start_codes.windows(2) {
            let (start, start_len) = window[0];
            let end = window[1].0;
            let payload_start = start + start_len;
            if end > payload_start {
                nalus.push(self.pending[payload_start..end].to_vec());
            }
        }

        if finalize {
            if let Some((start, start_len)) = start_codes.last().copied() {
                let payload_start = start + start_len;
                if self.pending.len() > payload_start {
                    nalus.push(self.pending[payload_start..].to_vec());
                }
            }
            self.pending.clear();
        } else if let Some((start, _)) = start_codes.last().copied() {
            let remainder = self.pending.split_off(start);
            self.pending = remainder;
        }

        nalus
    }
}

fn find_start_codes(data: &[u8]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 3 <= data.len() {
        if i + 4 <= data.len()
            && data[i] == 0
            && data[i + 1] == 0
            && data[i + 2] == 0
            && data[i + 3] == 1
        {
            out.push((i, 4));
            i += 4;
            continue;
        }
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            out.push((i, 3));
            i += 3;
            continue;
        }
        i += 1;
    }
    out
}

fn is_aud(nal: &[u8]) -> bool {
    !nal.is_empty() && ((nal[0] >> 1) & 0x3f) == nal_type::AUD
}

fn is_vcl(nal: &[u8]) -> bool {
    !nal.is_empty() && ((nal[0] >> 1) & 0x3f) <= 31
}

/// HEVC IRAP types (BLA 16-18, IDR 19-20, CRA 21); this system's encoders
/// only ever emit IDR_W_RADL(19)/IDR_N_LP(20) since GOP length is 1, but the
/// wider IRAP range is the correct keyframe test for any Annex-B input.
fn is_key_vcl(nal: &[u8]) -> bool {
    !nal.is_empty() && matches!((nal[0] >> 1) & 0x3f, 16..=21)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hevc_sample_annexb() -> Vec<u8> {
        let mut out = Vec::new();
        let mut push_nal = |nal: &[u8]| {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        };

        push_nal(&[0x46, 0x01]); // AUD (type 35)
        push_nal(&[0x40, 0x01, 0x0c]); // VPS (type 32)
        push_nal(&[0x42, 0x01, 0x0c]); // SPS (type 33)
        push_nal(&[0x44, 0x01, 0xc0]); // PPS (type 34)
        push_nal(&[0x26, 0x01, 0xaf, 0x08]); // IDR_W_RADL (type 19)
        push_nal(&[0x46, 0x01]); // AUD
        push_nal(&[0x02, 0x01, 0x9a, 0x22]); // TRAIL_N-ish (type 1), not key

        out
    }

    #[test]
    fn chunked_parse_converges() {
        let data = hevc_sample_annexb();
        let mut assembler = StatefulBitstreamAssembler::new();
        let mut emitted = Vec::new();

        for chunk in data.chunks(3) {
            let (aus, _) = assembler.push_chunk(chunk).unwrap();
            emitted.extend(aus);
        }
        let (flush_aus, _) = assembler.flush().unwrap();
        emitted.extend(flush_aus);

        assert_eq!(emitted.len(), 2);
        assert!(emitted[0].is_keyframe);
        assert!(!emitted[1].is_keyframe);
    }

    #[test]
    fn extracts_required_parameter_sets() {
        let data = hevc_sample_annexb();
        let mut assembler = StatefulBitstreamAssembler::new();
        let _ = assembler.push_chunk(&data).unwrap();
        let (_, cache) = assembler.flush().unwrap();

        let params = cache.required().unwrap();
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn keyframe_access_unit_prepends_parameter_sets() {
        let data = hevc_sample_annexb();
        let mut assembler = StatefulBitstreamAssembler::new();
        let (_, _) = assembler.push_chunk(&data).unwrap();
        let (aus, cache) = assembler.flush().unwrap();

        let keyframe = aus.iter().find(|au| au.is_keyframe).unwrap();
        let bytes = keyframe.to_annexb(&cache);
        // VPS, SPS, PPS, IDR slice: four start-code-delimited NALs.
        assert_eq!(find_start_codes(&bytes).len(), 4);
    }

    #[test]
    fn non_keyframe_access_unit_has_no_parameter_sets() {
        let data = hevc_sample_annexb();
        let mut assembler = StatefulBitstreamAssembler::new();
        let _ = assembler.push_chunk(&data).unwrap();
        let (aus, cache) = assembler.flush().unwrap();

        let trailing = aus.iter().find(|au| !au.is_keyframe).unwrap();
        let bytes = trailing.to_annexb(&cache);
        assert_eq!(find_start_codes(&bytes).len(), 1);
    }
}
