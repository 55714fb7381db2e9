//! H.264/AVC helpers
//!
//! RTMP carries H.264 in AVCC form (length-prefixed NAL units) with the
//! parameter sets delivered once in an AVCDecoderConfigurationRecord:
//!
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```
//!
//! RTP packetizers and decoders want Annex-B (start-code delimited) access
//! units with SPS/PPS in front of every IDR, which [`avcc_to_annexb`] produces.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// NAL unit types we care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    Slice,
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    Other(u8),
}

impl NaluType {
    pub fn from_byte(b: u8) -> Self {
        match b & 0x1F {
            1 => NaluType::Slice,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::Aud,
            other => NaluType::Other(other),
        }
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// AVC decoder configuration (from the sequence header)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    /// 66=Baseline, 77=Main, 100=High, ...
    pub profile: u8,
    pub compatibility: u8,
    /// e.g. 31 = 3.1
    pub level: u8,
    /// Bytes per NAL length prefix, usually 4
    pub nalu_length_size: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
    /// Raw AVCDecoderConfigurationRecord bytes
    pub raw: Bytes,
}

impl AvcConfig {
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 7 {
            return Err(MediaError::InvalidAvcPacket.into());
        }

        let raw = data.clone();
        let mut data = data;

        if data.get_u8() != 1 {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = read_parameter_sets(&mut data, num_sps)?;

        // Some encoders end the record right after the SPS list
        let pps = if data.has_remaining() {
            let num_pps = data.get_u8() as usize;
            read_parameter_sets(&mut data, num_pps)?
        } else {
            Vec::new()
        };

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
            raw,
        })
    }

    pub fn has_parameter_sets(&self) -> bool {
        !self.sps.is_empty() && !self.pps.is_empty()
    }

    pub fn profile_name(&self) -> &'static str {
        match self.profile {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4",
            _ => "Unknown",
        }
    }

    /// `profile-level-id` for the SDP fmtp line, e.g. `42e01f`
    pub fn profile_level_id(&self) -> String {
        format!(
            "{:02x}{:02x}{:02x}",
            self.profile, self.compatibility, self.level
        )
    }

    /// SPS and PPS as Annex-B
    pub fn parameter_sets_annexb(&self) -> Bytes {
        let mut out = BytesMut::new();
        for nalu in self.sps.iter().chain(self.pps.iter()) {
            out.put_slice(&START_CODE);
            out.put_slice(nalu);
        }
        out.freeze()
    }
}

fn read_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if data.remaining() < 2 {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let len = data.get_u16() as usize;
        if data.remaining() < len {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        sets.push(data.copy_to_bytes(len));
    }
    Ok(sets)
}

/// Iterator over NAL units in AVCC format
pub struct NaluIterator<'a> {
    data: &'a [u8],
    offset: usize,
    nalu_length_size: usize,
}

impl<'a> NaluIterator<'a> {
    pub fn new(data: &'a [u8], nalu_length_size: u8) -> Self {
        Self {
            data,
            offset: 0,
            nalu_length_size: nalu_length_size.clamp(1, 4) as usize,
        }
    }
}

impl<'a> Iterator for NaluIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + self.nalu_length_size > self.data.len() {
            return None;
        }

        let mut len: usize = 0;
        for i in 0..self.nalu_length_size {
            len = (len << 8) | (self.data[self.offset + i] as usize);
        }
        self.offset += self.nalu_length_size;

        if self.offset + len > self.data.len() {
            return None;
        }

        let nalu = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Some(nalu)
    }
}

/// Whether the AVCC payload holds an IDR slice
pub fn contains_idr(data: &[u8], nalu_length_size: u8) -> bool {
    NaluIterator::new(data, nalu_length_size)
        .any(|n| !n.is_empty() && NaluType::from_byte(n[0]) == NaluType::Idr)
}

/// Convert an AVCC access unit to Annex-B
///
/// When `config` is given and the unit holds an IDR, in-band parameter sets
/// are dropped and the configured SPS/PPS are written first.
pub fn avcc_to_annexb(data: &[u8], nalu_length_size: u8, config: Option<&AvcConfig>) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len() + 64);

    let prepend = config.filter(|_| contains_idr(data, nalu_length_size));
    if let Some(config) = prepend {
        out.put_slice(&config.parameter_sets_annexb());
    }

    for nalu in NaluIterator::new(data, nalu_length_size) {
        if nalu.is_empty() {
            continue;
        }
        let kind = NaluType::from_byte(nalu[0]);
        if kind == NaluType::Aud || (prepend.is_some() && kind.is_parameter_set()) {
            continue;
        }
        out.put_slice(&START_CODE);
        out.put_slice(nalu);
    }
    out.freeze()
}
