//! Shared data model (spec §3).

use smallvec::SmallVec;
use std::time::Instant;

/// Immutable record produced by RTP header parsing, consumed by the reordering buffer and the
/// payload handlers. Grounded on teacher `network_audio/rtp.rs::RtpHeader` plus the CSRC list
/// and timestamp fields `casterplay-BassAES67::input/rtp.rs::RtpHeader` skips.
#[derive(Debug, Clone)]
pub struct RtpPacketData {
    pub sequence_number: u16,
    pub rtp_timestamp: u32,
    pub ssrc: u32,
    pub csrcs: SmallVec<[u32; 4]>,
    pub payload_type: u8,
    pub received_time: Instant,
    pub payload: Vec<u8>,
}

/// Codec identifier, as resolved from SDP, the default table, or the format probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Pcm,
    Pcmu,
    Pcma,
    Opus,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn host() -> Self {
        if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }
}

/// Opus multistream parameters, present only when `codec == Codec::Opus` and the stream is not
/// plain mono/stereo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpusMultistreamParams {
    pub streams: u8,
    pub coupled_streams: u8,
    pub mapping_family: u8,
    pub channel_mapping: Vec<u8>,
}

/// Per-SSRC stream properties, resolved once and stable until superseded or torn down
/// (spec §3 invariant: "once set from SDP it is stable until the announcement is superseded or
/// the SSRC is cleared").
#[derive(Debug, Clone)]
pub struct StreamProperties {
    pub codec: Codec,
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
    pub endianness: Endianness,
    pub port: u16,
    pub payload_type: u8,
    pub opus: Option<OpusMultistreamParams>,
    /// How confident the source of these properties is, in `[0, 1]`. `1.0` for properties taken
    /// directly from SDP or the default payload table; less than `1.0` only when derived by the
    /// statistical format probe (spec §4.4).
    pub confidence: f64,
}

impl StreamProperties {
    pub fn bytes_per_sample(&self) -> usize {
        (self.bit_depth as usize + 7) / 8
    }

    /// Channel mask derived purely from `channels`, per the default layout table (spec §6).
    pub fn default_channel_mask(&self) -> u16 {
        channel_mask_for(self.channels)
    }
}

/// Default WAVE_FORMAT_EXTENSIBLE channel mask for a channel count (spec §6).
pub fn channel_mask_for(channels: u8) -> u16 {
    match channels {
        1 => 0x0004, // FC
        2 => 0x0003, // FL | FR
        6 => 0x003F, // 5.1
        8 => 0x063F, // 7.1
        // Not one of the named defaults: fill the low `channels` bits as an approximation.
        n if n > 0 && n < 16 => (1u16 << n) - 1,
        _ => 0,
    }
}

/// Split a 16-bit channel mask into its low/high bytes (spec §3, §6).
pub fn split_channel_mask(mask: u16) -> (u8, u8) {
    ((mask & 0x00FF) as u8, (mask >> 8) as u8)
}

/// Reassemble `chlayout1/chlayout2` into a 16-bit mask (inverse of [`split_channel_mask`]).
pub fn join_channel_mask(chlayout1: u8, chlayout2: u8) -> u16 {
    (chlayout1 as u16) | ((chlayout2 as u16) << 8)
}

/// Output record emitted to downstream consumers (spec §3).
#[derive(Debug, Clone)]
pub struct TaggedAudioPacket {
    pub source_tag: String,
    pub ssrcs: SmallVec<[u32; 1]>,
    pub received_time: Instant,
    pub rtp_timestamp: u32,
    pub rtp_sequence_number: Option<u16>,
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
    pub chlayout1: u8,
    pub chlayout2: u8,
    pub audio_data: Vec<u8>,
    pub is_sentinel: bool,
}

impl TaggedAudioPacket {
    pub fn channel_mask(&self) -> u16 {
        join_channel_mask(self.chlayout1, self.chlayout2)
    }
}
