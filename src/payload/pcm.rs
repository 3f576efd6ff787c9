//! L16/raw-PCM payload handler (spec §4.2).
//!
//! Grounded on teacher `network_audio/rtp.rs::decode_l24_to_f32` for the byte-order handling
//! shape, generalized from a fixed 24-bit/f32 conversion to a pass-through byte-swap across the
//! bit depths the probe and SDP can resolve to (8/16/24/32).

use super::PayloadHandler;
use crate::types::{split_channel_mask, Codec, RtpPacketData, StreamProperties, TaggedAudioPacket};
use anyhow::{bail, Result};
use smallvec::smallvec;

pub struct PcmHandler;

impl PcmHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PcmHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadHandler for PcmHandler {
    fn supports(&self, codec: Codec) -> bool {
        matches!(codec, Codec::Pcm | Codec::Unknown)
    }

    fn populate(&self, packet: RtpPacketData, props: &StreamProperties, source_tag: &str) -> Result<TaggedAudioPacket> {
        let bytes_per_sample = props.bytes_per_sample();
        if bytes_per_sample == 0 {
            bail!("pcm handler: zero bytes per sample");
        }

        let mut audio_data = packet.payload;
        if props.endianness != crate::types::Endianness::host() && bytes_per_sample > 1 {
            for chunk in audio_data.chunks_exact_mut(bytes_per_sample) {
                chunk.reverse();
            }
        }

        let mask = props.default_channel_mask();
        let (chlayout1, chlayout2) = split_channel_mask(mask);

        Ok(TaggedAudioPacket {
            source_tag: source_tag.to_string(),
            ssrcs: smallvec![packet.ssrc],
            received_time: packet.received_time,
            rtp_timestamp: packet.rtp_timestamp,
            rtp_sequence_number: Some(packet.sequence_number),
            sample_rate: props.sample_rate,
            channels: props.channels,
            bit_depth: props.bit_depth,
            chlayout1,
            chlayout2,
            audio_data,
            is_sentinel: false,
        })
    }

    fn on_ssrc_cleared(&self, _ssrc: u32) {}

    fn on_all_cleared(&self) {}
}
