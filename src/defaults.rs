//! Payload default table (C6, spec §4.6).
//!
//! Static mapping from well-known RTP payload-type numbers to stream properties, consulted only
//! on the default port when SDP metadata is absent. Module-level immutable data, the same "static
//! singleton" idiom the teacher uses for its SAP multicast constants.

use crate::types::{Codec, Endianness, StreamProperties};

/// One row of the default table.
#[derive(Debug, Clone, Copy)]
struct DefaultEntry {
    payload_type: u8,
    codec: Codec,
    sample_rate: u32,
    channels: u8,
    bit_depth: u8,
    endianness: Endianness,
}

const DEFAULT_TABLE: &[DefaultEntry] = &[
    DefaultEntry { payload_type: 0, codec: Codec::Pcmu, sample_rate: 8000, channels: 1, bit_depth: 8, endianness: Endianness::Big },
    DefaultEntry { payload_type: 8, codec: Codec::Pcma, sample_rate: 8000, channels: 1, bit_depth: 8, endianness: Endianness::Big },
    DefaultEntry { payload_type: 10, codec: Codec::Pcm, sample_rate: 44100, channels: 1, bit_depth: 16, endianness: Endianness::Big },
    DefaultEntry { payload_type: 11, codec: Codec::Pcm, sample_rate: 44100, channels: 2, bit_depth: 16, endianness: Endianness::Big },
    DefaultEntry { payload_type: 111, codec: Codec::Opus, sample_rate: 48000, channels: 2, bit_depth: 16, endianness: Endianness::Little },
    DefaultEntry { payload_type: 127, codec: Codec::Pcm, sample_rate: 48000, channels: 2, bit_depth: 16, endianness: Endianness::Big },
];

/// Look up default stream properties for a well-known payload type. Returns `None` for payload
/// types that require SDP or the format probe to resolve (e.g. any dynamic PT not in the table).
pub fn lookup(payload_type: u8) -> Option<StreamProperties> {
    DEFAULT_TABLE.iter().find(|e| e.payload_type == payload_type).map(|e| StreamProperties {
        codec: e.codec,
        sample_rate: e.sample_rate,
        channels: e.channels,
        bit_depth: e.bit_depth,
        endianness: e.endianness,
        port: 0,
        payload_type: e.payload_type,
        opus: None,
        confidence: 1.0,
    })
}

/// True if `payload_type` is eligible for format probing on the default port (RFC 3551 dynamic
/// range, and not already covered by [`lookup`]).
pub fn is_probeable(payload_type: u8) -> bool {
    (96..=127).contains(&payload_type) && lookup(payload_type).is_none()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_payload_types_resolve() {
        let pcmu = lookup(0).unwrap();
        assert_eq!(pcmu.codec, Codec::Pcmu);
        assert_eq!(pcmu.sample_rate, 8000);

        let opus = lookup(111).unwrap();
        assert_eq!(opus.codec, Codec::Opus);
        assert_eq!(opus.channels, 2);
        assert_eq!(opus.endianness, Endianness::Little);

        let l16_stereo = lookup(11).unwrap();
        assert_eq!(l16_stereo.channels, 2);
        assert_eq!(l16_stereo.endianness, Endianness::Big);
    }

    #[test]
    fn unknown_payload_type_is_none() {
        assert!(lookup(96).is_none());
        assert!(lookup(5).is_none());
    }

    #[test]
    fn probeable_range_excludes_known_defaults() {
        assert!(is_probeable(96));
        assert!(!is_probeable(111));
        assert!(!is_probeable(50));
    }
}
