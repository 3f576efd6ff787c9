//! Opus payload handler (spec §4.2): mono/stereo via `audiopus`, multistream via [`super::opus_ffi`].
//!
//! Per-SSRC decoder cache keyed by `ssrc`, grounded on
//! `other_examples/.../songbird-src-driver-tasks-udp_rx.rs.rs::SsrcState` (one `OpusDecoder` per
//! SSRC, held in a `HashMap`). The destroy+recreate-on-tuple-change rule (spec invariant 2) is new
//! code layered on that shape, since songbird's decoder is created once at SSRC-first-sight and
//! never needs renegotiation.

use super::PayloadHandler;
use crate::payload::opus_ffi::MultistreamDecoder;
use crate::types::{Codec, RtpPacketData, StreamProperties, TaggedAudioPacket};
use anyhow::{bail, Result};
use audiopus::coder::Decoder as MonoStereoDecoder;
use audiopus::Channels;
use parking_lot::Mutex;
use smallvec::smallvec;
use std::collections::HashMap;

/// Opus' maximum frame duration, used to size decode buffers (spec §4.2).
const MAX_FRAME_MS: u32 = 120;

/// `(streams, coupled_streams)` for Vorbis channel order (mapping family 1), indexed by
/// `channels - 1`. Mirrors the table `opus_multistream_surround_encoder_create` consults
/// internally; an SDP announcement that gives `channel_mapping`/`mapping_family` but omits
/// `streams`/`coupled_streams` (e.g. 5.1 advertised as just `channels=6;mapping_family=1`) is
/// derived from here rather than left at the `(0, 0)` SDP default.
const VORBIS_MAPPING_STREAMS: [(u8, u8); 8] = [
    (1, 0), // 1.0
    (1, 1), // 2.0
    (2, 1), // 3.0
    (2, 2), // quad
    (3, 2), // 5.0
    (4, 2), // 5.1
    (4, 3), // 6.1
    (5, 3), // 7.1
];

fn derive_streams_from_mapping_family(mapping_family: u8, channels: u8) -> Option<(u8, u8)> {
    if mapping_family != 1 {
        return None;
    }
    VORBIS_MAPPING_STREAMS.get(channels.checked_sub(1)? as usize).copied()
}

/// Opus only defines five internal sample rates; anything else must be resampled upstream.
fn opus_sample_rate(hz: u32) -> Result<audiopus::SampleRate> {
    match hz {
        8000 => Ok(audiopus::SampleRate::Hz8000),
        12000 => Ok(audiopus::SampleRate::Hz12000),
        16000 => Ok(audiopus::SampleRate::Hz16000),
        24000 => Ok(audiopus::SampleRate::Hz24000),
        48000 => Ok(audiopus::SampleRate::Hz48000),
        other => bail!("unsupported opus sample rate {other}"),
    }
}

#[derive(PartialEq, Clone, Copy)]
struct DecoderKey {
    sample_rate: u32,
    channels: u8,
    streams: u8,
    coupled_streams: u8,
}

enum Decoder {
    MonoStereo(MonoStereoDecoder),
    Multistream(MultistreamDecoder),
}

struct SsrcDecoder {
    key: DecoderKey,
    decoder: Decoder,
}

pub struct OpusHandler {
    decoders: Mutex<HashMap<u32, SsrcDecoder>>,
}

impl OpusHandler {
    pub fn new() -> Self {
        Self { decoders: Mutex::new(HashMap::new()) }
    }

    fn desired_key(props: &StreamProperties) -> DecoderKey {
        match &props.opus {
            Some(ms) if props.channels > 2 || ms.streams > 0 => {
                let (streams, coupled_streams) = if ms.streams > 0 {
                    (ms.streams, ms.coupled_streams)
                } else {
                    derive_streams_from_mapping_family(ms.mapping_family, props.channels)
                        .unwrap_or((props.channels, 0))
                };
                DecoderKey { sample_rate: props.sample_rate, channels: props.channels, streams, coupled_streams }
            }
            _ => DecoderKey {
                sample_rate: props.sample_rate,
                channels: props.channels.min(2).max(1),
                streams: 0,
                coupled_streams: 0,
            },
        }
    }

    fn create_decoder(key: DecoderKey, props: &StreamProperties) -> Result<Decoder> {
        if key.streams > 0 {
            let mapping = props
                .opus
                .as_ref()
                .map(|ms| ms.channel_mapping.clone())
                .unwrap_or_else(|| (0..key.channels).collect());
            let decoder = MultistreamDecoder::new(key.sample_rate, key.channels, key.streams, key.coupled_streams, &mapping)?;
            Ok(Decoder::Multistream(decoder))
        } else {
            let channels = if key.channels <= 1 { Channels::Mono } else { Channels::Stereo };
            let decoder = MonoStereoDecoder::new(opus_sample_rate(key.sample_rate)?, channels)
                .map_err(|e| anyhow::anyhow!("failed to create opus decoder: {e:?}"))?;
            Ok(Decoder::MonoStereo(decoder))
        }
    }

    fn frame_capacity(sample_rate: u32, channels: u8) -> usize {
        let per_channel = (sample_rate as u64 * MAX_FRAME_MS as u64 / 1000) as usize;
        per_channel * channels.max(1) as usize
    }
}

impl Default for OpusHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadHandler for OpusHandler {
    fn supports(&self, codec: Codec) -> bool {
        matches!(codec, Codec::Opus)
    }

    fn populate(&self, packet: RtpPacketData, props: &StreamProperties, source_tag: &str) -> Result<TaggedAudioPacket> {
        let desired = Self::desired_key(props);
        let mut decoders = self.decoders.lock();

        let needs_recreate = match decoders.get(&packet.ssrc) {
            Some(existing) => existing.key != desired,
            None => true,
        };
        if needs_recreate {
            let decoder = Self::create_decoder(desired, props)?;
            decoders.insert(packet.ssrc, SsrcDecoder { key: desired, decoder });
        }
        let entry = decoders.get_mut(&packet.ssrc).expect("just inserted or already present");

        let samples: Vec<i16> = match &mut entry.decoder {
            Decoder::MonoStereo(decoder) => {
                let frame_cap = Self::frame_capacity(desired.sample_rate, desired.channels);
                let mut out = vec![0i16; frame_cap];
                let decoded = decoder
                    .decode(Some(&packet.payload), &mut out, false)
                    .map_err(|e| anyhow::anyhow!("opus decode failed: {e:?}"))?;
                out.truncate(decoded * desired.channels.max(1) as usize);
                out
            }
            Decoder::Multistream(decoder) => {
                let frame_cap = (desired.sample_rate as u64 * MAX_FRAME_MS as u64 / 1000) as usize;
                decoder.decode(&packet.payload, frame_cap)?
            }
        };
        if samples.is_empty() {
            bail!("opus handler: decoder produced no samples");
        }

        let mut audio_data = Vec::with_capacity(samples.len() * 2);
        for sample in &samples {
            audio_data.extend_from_slice(&sample.to_le_bytes());
        }

        let mask = props.default_channel_mask();
        let (chlayout1, chlayout2) = crate::types::split_channel_mask(mask);

        Ok(TaggedAudioPacket {
            source_tag: source_tag.to_string(),
            ssrcs: smallvec![packet.ssrc],
            received_time: packet.received_time,
            rtp_timestamp: packet.rtp_timestamp,
            rtp_sequence_number: Some(packet.sequence_number),
            sample_rate: desired.sample_rate,
            channels: desired.channels,
            bit_depth: 16,
            chlayout1,
            chlayout2,
            audio_data,
            is_sentinel: false,
        })
    }

    fn on_ssrc_cleared(&self, ssrc: u32) {
        self.decoders.lock().remove(&ssrc);
    }

    fn on_all_cleared(&self) {
        self.decoders.lock().clear();
    }
}
