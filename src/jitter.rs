//! Per-SSRC reordering buffer (C1, spec §4.1).
//!
//! Grounded on `casterplay-BassAES67::input/jitter.rs::JitterBuffer` for the sequence-distance
//! wraparound comparison and drop-farthest insertion policy, generalized from its byte-ring
//! layout to the spec's bounded-dwell `push`/`drain_ready` model (teacher
//! `network_audio/rtp.rs::JitterBuffer` names the simpler single-SSRC variant this supersedes).

use crate::types::RtpPacketData;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

/// RFC-3550-style wraparound comparison: true if `a` is strictly ahead of `b` in sequence space.
pub fn greater(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}

/// Forward distance from `from` to `to`, in `[0, 65535]`.
fn forward_distance(from: u16, to: u16) -> u16 {
    to.wrapping_sub(from)
}

pub struct ReorderingBuffer {
    max_delay: Duration,
    max_size: usize,
    large_gap_threshold: u16,
    entries: HashMap<u16, RtpPacketData>,
    next_expected_seq: u16,
    initialized: bool,
    last_gap_log: Option<Instant>,
    gap_log_interval: Duration,
}

impl ReorderingBuffer {
    pub fn new(max_delay: Duration, max_size: usize, large_gap_threshold: u16, gap_log_interval: Duration) -> Self {
        Self {
            max_delay,
            max_size,
            large_gap_threshold,
            entries: HashMap::new(),
            next_expected_seq: 0,
            initialized: false,
            last_gap_log: None,
            gap_log_interval,
        }
    }

    /// Insert one packet. Never blocks; applies the drop-farthest policy when full.
    pub fn push(&mut self, packet: RtpPacketData) {
        if !self.initialized {
            self.next_expected_seq = packet.sequence_number;
            self.initialized = true;
        }

        let gap = forward_distance(self.next_expected_seq, packet.sequence_number);
        if greater(packet.sequence_number, self.next_expected_seq)
            && gap >= self.large_gap_threshold
            && self.entries.is_empty()
        {
            self.rate_limited_gap_warn(gap);
            self.next_expected_seq = packet.sequence_number;
        }

        // Late (behind next_expected) or duplicate: discard.
        if !greater(packet.sequence_number, self.next_expected_seq.wrapping_sub(1))
            && packet.sequence_number != self.next_expected_seq
        {
            return;
        }
        if self.entries.contains_key(&packet.sequence_number) {
            return;
        }

        if self.entries.len() >= self.max_size {
            let farthest = self
                .entries
                .keys()
                .copied()
                .max_by_key(|&seq| forward_distance(self.next_expected_seq, seq));
            if let Some(farthest_seq) = farthest {
                let new_dist = forward_distance(self.next_expected_seq, packet.sequence_number);
                let farthest_dist = forward_distance(self.next_expected_seq, farthest_seq);
                if new_dist >= farthest_dist {
                    // New packet is farther than (or as far as) the farthest buffered one: drop it.
                    return;
                }
                self.entries.remove(&farthest_seq);
            }
        }

        self.entries.insert(packet.sequence_number, packet);
    }

    /// Drain packets that are ready for release: in-order, or skipped past after dwelling
    /// `max_delay`. Strictly monotonic (mod wraparound) per the caller's `next_expected_seq`.
    pub fn drain_ready(&mut self) -> Vec<RtpPacketData> {
        let mut out = Vec::new();
        loop {
            if let Some(packet) = self.entries.remove(&self.next_expected_seq) {
                out.push(packet);
                self.next_expected_seq = self.next_expected_seq.wrapping_add(1);
                continue;
            }

            // Drop anything that has fallen behind next_expected (can happen after a gap jump).
            let behind: Vec<u16> = self
                .entries
                .keys()
                .copied()
                .filter(|&seq| !greater(seq, self.next_expected_seq.wrapping_sub(1)) && seq != self.next_expected_seq)
                .collect();
            for seq in behind {
                self.entries.remove(&seq);
            }

            let candidate = self
                .entries
                .keys()
                .copied()
                .min_by_key(|&seq| forward_distance(self.next_expected_seq, seq));

            let Some(seq) = candidate else { break };
            let dwell = self.entries[&seq].received_time.elapsed();
            if dwell >= self.max_delay {
                let skipped = forward_distance(self.next_expected_seq, seq);
                warn!(skipped, seq, "reordering buffer: advancing past missing packets");
                self.next_expected_seq = seq;
                continue;
            }
            break;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn rate_limited_gap_warn(&mut self, gap: u16) {
        let now = Instant::now();
        let should_log = match self.last_gap_log {
            Some(t) => now.duration_since(t) >= self.gap_log_interval,
            None => true,
        };
        if should_log {
            warn!(gap, "reordering buffer: large sequence gap, treating as stream discontinuity");
            self.last_gap_log = Some(now);
        }
    }
}
