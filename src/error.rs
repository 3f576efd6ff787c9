//! Error taxonomy (spec §7).
//!
//! Only class-5 "fatal" failures (socket/poll setup during `start()`) are surfaced to callers
//! as a typed error. Classes 1-4 (transient I/O, malformed input, resource exhaustion, policy
//! drops) are recovered locally: logged via `tracing` and counted in [`DropCounters`], never
//! returned as a `Result`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Fatal startup failures. Returned from [`crate::receiver::Receiver::start`] and
/// [`crate::sap::SapListener::start`]; none of these are recoverable in-process.
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("failed to create socket: {0}")]
    SocketCreate(#[source] std::io::Error),

    #[error("failed to bind socket to {addr}: {source}")]
    SocketBind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to join multicast group {group}: {source}")]
    MulticastJoin {
        group: std::net::Ipv4Addr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create poll instance: {0}")]
    PollCreate(#[source] std::io::Error),

    #[error("receiver already running")]
    AlreadyRunning,
}

/// Reason a packet or candidate was dropped, per the §7 taxonomy (classes 1-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Class 1: EAGAIN/EINTR and similar, recovered by retrying.
    TransientIo,
    /// Class 2: short header, truncated SDP, decode failure.
    Malformed,
    /// Class 3: buffer full, decoder-create failure.
    ResourceExhausted,
    /// Class 4: unknown SSRC, unsupported payload type outside the probing port.
    Policy,
}

/// Lock-free counters for every drop reason, sampled by telemetry.
#[derive(Debug, Default)]
pub struct DropCounters {
    transient_io: AtomicU64,
    malformed: AtomicU64,
    resource_exhausted: AtomicU64,
    policy: AtomicU64,
}

impl DropCounters {
    pub fn record(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::TransientIo => &self.transient_io,
            DropReason::Malformed => &self.malformed,
            DropReason::ResourceExhausted => &self.resource_exhausted,
            DropReason::Policy => &self.policy,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DropCountersSnapshot {
        DropCountersSnapshot {
            transient_io: self.transient_io.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            resource_exhausted: self.resource_exhausted.load(Ordering::Relaxed),
            policy: self.policy.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DropCountersSnapshot {
    pub transient_io: u64,
    pub malformed: u64,
    pub resource_exhausted: u64,
    pub policy: u64,
}
