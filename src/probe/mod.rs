//! Statistical audio-format probe (C4, spec §4.4).
//!
//! No direct teacher analogue — the teacher has no format-detection code. Built fresh against the
//! spec's accumulate-then-finalize state machine, sharing the G.711/PCM decode primitives with
//! [`crate::payload`].

pub mod pcm_test;

use crate::types::{Codec, Endianness, StreamProperties};
use std::time::{Duration, Instant};

pub struct AudioFormatProbe {
    min_window: Duration,
    min_bytes: usize,
    buffer_cap: usize,
    started_at: Instant,
    buffer: Vec<u8>,
    detection_complete: bool,
    detected: Option<StreamProperties>,
}

impl AudioFormatProbe {
    pub fn new(min_window: Duration, min_bytes: usize, buffer_cap: usize) -> Self {
        Self {
            min_window,
            min_bytes,
            buffer_cap,
            started_at: Instant::now(),
            buffer: Vec::new(),
            detection_complete: false,
            detected: None,
        }
    }

    pub fn detection_complete(&self) -> bool {
        self.detection_complete
    }

    pub fn detected_properties(&self) -> Option<&StreamProperties> {
        self.detected.as_ref()
    }

    /// Accumulate one packet's payload. No-ops once detection is complete.
    pub fn accumulate(&mut self, payload: &[u8]) {
        if self.detection_complete {
            return;
        }
        if self.buffer.len() < self.buffer_cap {
            let remaining = self.buffer_cap - self.buffer.len();
            let take = payload.len().min(remaining);
            self.buffer.extend_from_slice(&payload[..take]);
        }
    }

    /// Attempt to finalize detection; idempotent once `detection_complete()` is true (P5).
    pub fn try_finalize(&mut self, port: u16) -> bool {
        if self.detection_complete {
            return true;
        }
        if self.started_at.elapsed() < self.min_window || self.buffer.len() < self.min_bytes {
            return false;
        }

        let properties = self.finalize_detection(port);
        self.detected = Some(properties);
        self.detection_complete = true;
        true
    }

    fn finalize_detection(&self, port: u16) -> StreamProperties {
        if let Some((codec, score)) = codec_test::detect_coded_format(&self.buffer) {
            return self.properties_for_coded_codec(codec, port, codec_test::confidence_from_score(score));
        }
        self.properties_for_pcm(port)
    }

    fn properties_for_coded_codec(&self, codec: Codec, port: u16, confidence: f64) -> StreamProperties {
        match codec {
            Codec::Pcmu | Codec::Pcma => StreamProperties {
                codec,
                sample_rate: 8000,
                channels: 1,
                bit_depth: 8,
                endianness: Endianness::Big,
                port,
                payload_type: if codec == Codec::Pcmu { 0 } else { 8 },
                opus: None,
                confidence,
            },
            Codec::Opus => StreamProperties {
                codec,
                sample_rate: 48000,
                channels: 2,
                bit_depth: 16,
                endianness: Endianness::Little,
                port,
                payload_type: 111,
                opus: None,
                confidence,
            },
            _ => self.properties_for_pcm(port),
        }
    }

    fn properties_for_pcm(&self, port: u16) -> StreamProperties {
        let grid_result = pcm_test::search_grid(&self.buffer);

        let (channels, bit_depth, endianness, confidence) = match grid_result {
            Some((candidate, runner_up)) => (
                candidate.channels,
                candidate.bit_depth as u8,
                candidate.endianness,
                pcm_test::confidence_from_scores(candidate.score, runner_up),
            ),
            None => (2, 16, Endianness::Big, 0.0),
        };

        let mut channels = channels;
        if channels == 1 {
            let bytes_per_sample = (bit_depth / 8).max(1) as usize;
            let mono = pcm_test::decode_as_i16(&self.buffer, 1, bytes_per_sample, endianness);
            let stereo = pcm_test::decode_as_i16(&self.buffer, 2, bytes_per_sample, endianness);
            if pcm_test::should_promote_to_stereo(&mono, &stereo) {
                channels = 2;
            }
        }

        let bytes_per_sample = (bit_depth / 8).max(1) as usize;
        let estimate = if !self.buffer.is_empty() && self.started_at.elapsed().as_secs_f64() > 0.0 {
            self.buffer.len() as f64 / self.started_at.elapsed().as_secs_f64() / (channels as f64 * bytes_per_sample as f64)
        } else {
            48000.0
        };
        let sample_rate = pcm_test::snap_sample_rate(estimate).max(8000);

        StreamProperties {
            codec: Codec::Pcm,
            sample_rate,
            channels,
            bit_depth,
            endianness,
            port,
            payload_type: 127,
            opus: None,
            confidence,
        }
    }
}
