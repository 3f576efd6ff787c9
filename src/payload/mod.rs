//! Payload codec handlers (C2, spec §4.2).
//!
//! Small (≤ 4) fixed variant set dispatched by canonical payload type, per the "tagged union or
//! trait-object list" design note — a tagged enum is used here since the handler set is closed
//! and the hot path dispatches once per ready packet.

pub mod g711;
pub mod opus;
pub mod opus_ffi;
pub mod pcm;

use crate::types::{Codec, RtpPacketData, StreamProperties, TaggedAudioPacket};
use anyhow::Result;

/// Canonicalize a (possibly SDP-overridden) payload type plus resolved codec back to the
/// well-known payload-type number the handlers dispatch on.
pub fn canonical_payload_type(codec: Codec, channels: u8) -> u8 {
    match codec {
        Codec::Pcmu => 0,
        Codec::Pcma => 8,
        Codec::Pcm if channels <= 1 => 10,
        Codec::Pcm => 11,
        Codec::Opus => 111,
        Codec::Unknown => 127,
    }
}

/// Implemented once per codec family. `populate` decodes `packet` (already resolved against
/// `props`) into an output record; `on_ssrc_cleared`/`on_all_cleared` release any per-SSRC
/// decoder state.
pub trait PayloadHandler: Send + Sync {
    fn supports(&self, codec: Codec) -> bool;
    fn populate(&self, packet: RtpPacketData, props: &StreamProperties, source_tag: &str) -> Result<TaggedAudioPacket>;
    fn on_ssrc_cleared(&self, ssrc: u32);
    fn on_all_cleared(&self);
}

/// The fixed set of handlers, dispatched by `props.codec`.
pub struct HandlerSet {
    pcm: pcm::PcmHandler,
    g711: g711::G711Handler,
    opus: opus::OpusHandler,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self {
            pcm: pcm::PcmHandler::new(),
            g711: g711::G711Handler::new(),
            opus: opus::OpusHandler::new(),
        }
    }

    pub fn populate(&self, packet: RtpPacketData, props: &StreamProperties, source_tag: &str) -> Result<TaggedAudioPacket> {
        match props.codec {
            Codec::Pcm => self.pcm.populate(packet, props, source_tag),
            Codec::Pcmu | Codec::Pcma => self.g711.populate(packet, props, source_tag),
            Codec::Opus => self.opus.populate(packet, props, source_tag),
            Codec::Unknown => self.pcm.populate(packet, props, source_tag),
        }
    }

    pub fn on_ssrc_cleared(&self, ssrc: u32) {
        self.pcm.on_ssrc_cleared(ssrc);
        self.g711.on_ssrc_cleared(ssrc);
        self.opus.on_ssrc_cleared(ssrc);
    }

    pub fn on_all_cleared(&self) {
        self.pcm.on_all_cleared();
        self.g711.on_all_cleared();
        self.opus.on_all_cleared();
    }
}

impl Default for HandlerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pt_matches_default_table() {
        assert_eq!(canonical_payload_type(Codec::Pcmu, 1), 0);
        assert_eq!(canonical_payload_type(Codec::Pcma, 1), 8);
        assert_eq!(canonical_payload_type(Codec::Pcm, 1), 10);
        assert_eq!(canonical_payload_type(Codec::Pcm, 2), 11);
        assert_eq!(canonical_payload_type(Codec::Opus, 2), 111);
    }
}
