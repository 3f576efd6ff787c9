//! RTP header parsing (RFC 3550), spec §6.
//!
//! Grounded on teacher `network_audio/rtp.rs::RtpHeader::from_bytes` for the fixed 12-byte
//! header layout, extended with CSRC-list and extension-header skipping the way
//! `casterplay-BassAES67::input/rtp.rs::RtpHeader::header_size` computes the payload offset.

use crate::types::RtpPacketData;
use byteorder::{BigEndian, ByteOrder};
use smallvec::SmallVec;
use std::time::Instant;

pub const FIXED_HEADER_LEN: usize = 12;

#[derive(Debug, Clone)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Parse the fixed 12-byte header. Returns `None` if too short or not RTP version 2.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FIXED_HEADER_LEN {
            return None;
        }
        let first = data[0];
        let second = data[1];
        let version = (first >> 6) & 0x03;
        if version != 2 {
            return None;
        }
        Some(Self {
            version,
            padding: (first & 0x20) != 0,
            extension: (first & 0x10) != 0,
            csrc_count: first & 0x0F,
            marker: (second & 0x80) != 0,
            payload_type: second & 0x7F,
            sequence: BigEndian::read_u16(&data[2..4]),
            timestamp: BigEndian::read_u32(&data[4..8]),
            ssrc: BigEndian::read_u32(&data[8..12]),
        })
    }
}

/// Fully-parsed RTP packet: header, CSRC list, and payload (CSRCs/extension skipped, padding
/// trimmed). Returns `None` on any truncation.
pub fn parse_packet(data: &[u8], received_time: Instant) -> Option<RtpPacketData> {
    let header = RtpHeader::parse(data)?;

    let mut offset = FIXED_HEADER_LEN;
    let csrc_len = header.csrc_count as usize * 4;
    if data.len() < offset + csrc_len {
        return None;
    }
    let mut csrcs = SmallVec::<[u32; 4]>::new();
    for i in 0..header.csrc_count as usize {
        let o = offset + i * 4;
        csrcs.push(BigEndian::read_u32(&data[o..o + 4]));
    }
    offset += csrc_len;

    // Extension header: not honored beyond skipping (spec §6).
    if header.extension {
        if data.len() < offset + 4 {
            return None;
        }
        let ext_len_words = BigEndian::read_u16(&data[offset + 2..offset + 4]) as usize;
        offset += 4 + ext_len_words * 4;
        if data.len() < offset {
            return None;
        }
    }

    let payload_end = if header.padding {
        let padding_len = *data.last()? as usize;
        if padding_len == 0 || data.len() < offset + padding_len {
            return None;
        }
        data.len() - padding_len
    } else {
        data.len()
    };
    if payload_end < offset {
        return None;
    }

    Some(RtpPacketData {
        sequence_number: header.sequence,
        rtp_timestamp: header.timestamp,
        ssrc: header.ssrc,
        csrcs,
        payload_type: header.payload_type,
        received_time,
        payload: data[offset..payload_end].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_header(pt: u8, seq: u16, ts: u32, ssrc: u32) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0] = 0x80; // V=2
        buf[1] = pt & 0x7F;
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[4..8].copy_from_slice(&ts.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        buf
    }

    #[test]
    fn parses_minimal_header() {
        let header = build_header(10, 100, 48000, 0xAAAA);
        let parsed = RtpHeader::parse(&header).unwrap();
        assert_eq!(parsed.version, 2);
        assert_eq!(parsed.payload_type, 10);
        assert_eq!(parsed.sequence, 100);
        assert_eq!(parsed.timestamp, 48000);
        assert_eq!(parsed.ssrc, 0xAAAA);
    }

    #[test]
    fn rejects_short_packet() {
        assert!(RtpHeader::parse(&[0u8; 11]).is_none());
    }

    #[test]
    fn rejects_non_v2() {
        let mut header = build_header(10, 1, 1, 1);
        header[0] = 0x00; // version 0
        assert!(RtpHeader::parse(&header).is_none());
    }

    #[test]
    fn skips_csrcs_and_extracts_payload() {
        let mut buf = build_header(10, 1, 1, 1).to_vec();
        buf[0] = 0x82; // V=2, CC=2
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(&[0xAA, 0xBB, 0xCC]);

        let packet = parse_packet(&buf, Instant::now()).unwrap();
        assert_eq!(packet.csrcs.as_slice(), &[1, 2]);
        assert_eq!(packet.payload, vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn skips_extension_header() {
        let mut buf = build_header(10, 1, 1, 1).to_vec();
        buf[0] = 0x90; // V=2, X=1
        buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x02]); // profile, length=2 words
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&[0xDE, 0xAD]);

        let packet = parse_packet(&buf, Instant::now()).unwrap();
        assert_eq!(packet.payload, vec![0xDE, 0xAD]);
    }

    #[test]
    fn trims_padding() {
        let mut buf = build_header(10, 1, 1, 1).to_vec();
        buf[0] = 0xA0; // V=2, P=1
        buf.extend_from_slice(&[0x11, 0x22, 0x33, 0x03]);

        let packet = parse_packet(&buf, Instant::now()).unwrap();
        assert_eq!(packet.payload, vec![0x11]);
    }
}
