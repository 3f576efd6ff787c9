//! Programmatic receiver configuration.
//!
//! Static config-*file* loading is out of scope (spec §1); callers construct this in code, the
//! way the teacher's `ServerConfig` is built before being (optionally) overridden from a file.

use std::net::IpAddr;
use std::time::Duration;

/// Tunable parameters for [`crate::receiver::Receiver`] and its reordering buffers.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Default RTP port; also the only port where PT 96-127 is accepted for probing.
    pub default_port: u16,
    /// Reordering buffer: max dwell time before a gap is skipped (spec default 50 ms).
    pub max_delay: Duration,
    /// Reordering buffer: max buffered packets per SSRC (spec default 128).
    pub max_size: usize,
    /// Forward gap (in sequence numbers) that triggers stream-discontinuity recovery.
    pub large_gap_threshold: u16,
    /// Event loop poll timeout (spec: ~5 ms).
    pub event_loop_timeout: Duration,
    /// Telemetry log interval (spec: 30 s).
    pub telemetry_interval: Duration,
    /// Minimum accumulation window before the format probe finalizes (spec: >= 500 ms).
    pub probe_min_window: Duration,
    /// Minimum accumulated bytes before the format probe finalizes (spec: >= 5000 bytes).
    pub probe_min_bytes: usize,
    /// Hard cap on probe accumulation buffer (spec: ~2s at 48kHz stereo 32-bit).
    pub probe_buffer_cap: usize,
    /// Socket receive buffer size is `chunk_size * rcvbuf_factor`.
    pub chunk_size: usize,
    pub rcvbuf_factor: usize,
    /// SAP listener: known-IP allow list. Empty means accept from any source.
    pub sap_known_ips: Vec<IpAddr>,
    /// Minimum spacing between repeated out-of-order warnings, per SSRC.
    pub out_of_order_log_interval: Duration,
    /// Minimum spacing between repeated large-gap warnings, per SSRC.
    pub large_gap_log_interval: Duration,
    /// Socket I/O error retry backoff.
    pub socket_error_retry: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            default_port: 40000,
            max_delay: Duration::from_millis(50),
            max_size: 128,
            large_gap_threshold: 192,
            event_loop_timeout: Duration::from_millis(5),
            telemetry_interval: Duration::from_secs(30),
            probe_min_window: Duration::from_millis(500),
            probe_min_bytes: 5000,
            probe_buffer_cap: 48_000 * 2 * 4 * 2, // ~2s at 48kHz stereo 32-bit
            chunk_size: 1024,
            rcvbuf_factor: 4000,
            sap_known_ips: Vec::new(),
            out_of_order_log_interval: Duration::from_millis(200),
            large_gap_log_interval: Duration::from_secs(2),
            socket_error_retry: Duration::from_millis(100),
        }
    }
}

impl ReceiverConfig {
    pub fn socket_rcvbuf(&self) -> usize {
        self.chunk_size * self.rcvbuf_factor
    }
}
