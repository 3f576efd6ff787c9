//! G.711 µ-law / A-law payload handler (spec §4.2).
//!
//! No direct teacher file covers G.711; the 256-entry decode tables are standard ITU-T G.711
//! formulas, computed once into module-level `once_cell::Lazy` tables following the teacher's
//! static-singleton idiom (`SAP_MULTICAST_ADDR` and friends in `network_audio/sap.rs`).

use super::PayloadHandler;
use crate::types::{Codec, RtpPacketData, StreamProperties, TaggedAudioPacket};
use anyhow::Result;
use once_cell::sync::Lazy;
use smallvec::smallvec;

const ULAW_BIAS: i16 = 0x84;

fn decode_ulaw_sample(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;
    let mut sample = ((mantissa as i16) << 3) + ULAW_BIAS;
    sample <<= exponent;
    sample -= ULAW_BIAS;
    if sign != 0 {
        -sample
    } else {
        sample
    }
}

fn decode_alaw_sample(byte: u8) -> i16 {
    let byte = byte ^ 0x55;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0F;
    let mut sample = ((mantissa as i16) << 4) + 8;
    if exponent != 0 {
        sample += 0x100;
        sample <<= exponent - 1;
    }
    if sign != 0 {
        -sample
    } else {
        sample
    }
}

static ULAW_TABLE: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [0i16; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = decode_ulaw_sample(i as u8);
    }
    table
});

static ALAW_TABLE: Lazy<[i16; 256]> = Lazy::new(|| {
    let mut table = [0i16; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = decode_alaw_sample(i as u8);
    }
    table
});

pub fn decode_ulaw(data: &[u8]) -> Vec<i16> {
    data.iter().map(|&b| ULAW_TABLE[b as usize]).collect()
}

pub fn decode_alaw(data: &[u8]) -> Vec<i16> {
    data.iter().map(|&b| ALAW_TABLE[b as usize]).collect()
}

pub struct G711Handler;

impl G711Handler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for G711Handler {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadHandler for G711Handler {
    fn supports(&self, codec: Codec) -> bool {
        matches!(codec, Codec::Pcmu | Codec::Pcma)
    }

    fn populate(&self, packet: RtpPacketData, props: &StreamProperties, source_tag: &str) -> Result<TaggedAudioPacket> {
        let samples = match props.codec {
            Codec::Pcmu => decode_ulaw(&packet.payload),
            _ => decode_alaw(&packet.payload),
        };
        let mut audio_data = Vec::with_capacity(samples.len() * 2);
        for sample in &samples {
            audio_data.extend_from_slice(&sample.to_le_bytes());
        }

        Ok(TaggedAudioPacket {
            source_tag: source_tag.to_string(),
            ssrcs: smallvec![packet.ssrc],
            received_time: packet.received_time,
            rtp_timestamp: packet.rtp_timestamp,
            rtp_sequence_number: Some(packet.sequence_number),
            sample_rate: props.sample_rate,
            channels: 1,
            bit_depth: 16,
            chlayout1: 0x04,
            chlayout2: 0x00,
            audio_data,
            is_sentinel: false,
        })
    }

    fn on_ssrc_cleared(&self, _ssrc: u32) {}

    fn on_all_cleared(&self) {}
}
