//! RTP Receiver Core (C5, spec §4.5): owns sockets, the event loop, per-SSRC state, and dispatch
//! from C1 (reordering) through C2 (codec handlers), consulting C3 (SAP) / C6 (defaults) /
//! C4 (probe) to resolve stream properties.
//!
//! Socket setup is grounded on teacher `network_audio/rtp.rs::RtpReceiver::new` (`socket2` +
//! `SO_REUSEADDR`, multicast join, non-blocking read). The single-socket/single-SSRC receive loop
//! there is generalized here to the spec's multi-socket, multi-SSRC `mio`-polled design (see
//! SPEC_FULL.md §4.5 for why `mio` rather than the teacher's own `tokio` stack).

use crate::config::ReceiverConfig;
use crate::defaults;
use crate::error::{DropCounters, DropReason, ReceiverError};
use crate::jitter::ReorderingBuffer;
use crate::payload::HandlerSet;
use crate::probe::AudioFormatProbe;
use crate::rtp;
use crate::sap::SapListener;
use crate::types::{StreamProperties, TaggedAudioPacket};

use mio::net::UdpSocket as MioUdpSocket;
use mio::{Events, Interest, Poll, Token};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// RTP-timestamp bucket size used to mark sentinel/resync packets (spec §4.5, §9 — kept literal).
const SENTINEL_BUCKET_SIZE: u32 = 100_000;

struct PerSsrcState {
    reordering: ReorderingBuffer,
    last_sentinel_bucket: Option<u32>,
    probe: Option<AudioFormatProbe>,
    cached_properties: Option<StreamProperties>,
    last_addr: SocketAddr,
}

pub type ConsumerSender = flume::Sender<TaggedAudioPacket>;

struct BoundSocket {
    token: Token,
    socket: MioUdpSocket,
    port: u16,
}

pub struct Receiver {
    config: ReceiverConfig,
    sap: Arc<SapListener>,
    handlers: Arc<HandlerSet>,
    drop_counters: Arc<DropCounters>,
    running: Arc<AtomicBool>,
    next_token: AtomicU32,
    sockets: Mutex<Vec<BoundSocket>>,
    source_to_ssrc: Mutex<HashMap<String, u32>>,
    per_ssrc: Mutex<HashMap<u32, PerSsrcState>>,
    consumers: Mutex<Vec<ConsumerSender>>,
}

impl Receiver {
    pub fn new(config: ReceiverConfig, sap: Arc<SapListener>) -> Self {
        Self {
            config,
            sap,
            handlers: Arc::new(HandlerSet::new()),
            drop_counters: Arc::new(DropCounters::default()),
            running: Arc::new(AtomicBool::new(false)),
            next_token: AtomicU32::new(0),
            sockets: Mutex::new(Vec::new()),
            source_to_ssrc: Mutex::new(HashMap::new()),
            per_ssrc: Mutex::new(HashMap::new()),
            consumers: Mutex::new(Vec::new()),
        }
    }

    pub fn drop_counters(&self) -> Arc<DropCounters> {
        self.drop_counters.clone()
    }

    pub fn add_consumer(&self, sender: ConsumerSender) {
        self.consumers.lock().push(sender);
    }

    /// Open the default port plus any ports already known, then start the event-loop thread.
    pub fn start(self: &Arc<Self>) -> Result<(), ReceiverError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ReceiverError::AlreadyRunning);
        }

        self.open_socket(self.config.default_port, None)?;

        let this = self.clone();
        std::thread::spawn(move || this.run_event_loop());
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Open a dynamic unicast/multicast socket for a newly-announced SAP stream (spec §4.3
    /// callback → §4.5 "dynamic socket opens").
    pub fn open_dynamic_socket(&self, port: u16, multicast_group: Option<Ipv4Addr>) -> Result<(), ReceiverError> {
        if self.sockets.lock().iter().any(|s| s.port == port) {
            return Ok(());
        }
        self.open_socket(port, multicast_group)
    }

    fn open_socket(&self, port: u16, multicast_group: Option<Ipv4Addr>) -> Result<(), ReceiverError> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(ReceiverError::SocketCreate)?;
        socket.set_reuse_address(true).map_err(ReceiverError::SocketCreate)?;
        #[cfg(unix)]
        socket.set_reuse_port(true).map_err(ReceiverError::SocketCreate)?;
        socket.set_recv_buffer_size(self.config.socket_rcvbuf()).ok();

        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        socket.bind(&addr.into()).map_err(|source| ReceiverError::SocketBind { addr, source })?;

        if let Some(group) = multicast_group {
            socket
                .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
                .map_err(|source| ReceiverError::MulticastJoin { group, source })?;
        }
        socket.set_nonblocking(true).map_err(ReceiverError::SocketCreate)?;

        let std_socket: UdpSocket = socket.into();
        let mut mio_socket = MioUdpSocket::from_std(std_socket);

        let token = Token(self.next_token.fetch_add(1, Ordering::SeqCst) as usize);
        let mut sockets = self.sockets.lock();
        // Poll registration happens lazily in run_event_loop on (re)build of the Poll instance;
        // here we just record the socket. The event loop rebuilds registrations whenever the
        // socket list changes length, which dynamic SAP-driven opens do infrequently.
        let _ = &mut mio_socket;
        sockets.push(BoundSocket { token, socket: mio_socket, port });
        info!(port, "RTP receiver: socket opened");
        Ok(())
    }

    fn run_event_loop(self: Arc<Self>) {
        let mut poll = match Poll::new() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "RTP receiver: failed to create poll instance, aborting event loop");
                return;
            }
        };
        let mut events = Events::with_capacity(64);
        let mut registered: std::collections::HashSet<Token> = std::collections::HashSet::new();
        let mut last_telemetry = Instant::now();
        let mut buf = vec![0u8; 65536];

        while self.running.load(Ordering::SeqCst) {
            {
                let mut sockets = self.sockets.lock();
                for bound in sockets.iter_mut() {
                    if registered.insert(bound.token) {
                        if let Err(e) = poll.registry().register(&mut bound.socket, bound.token, Interest::READABLE) {
                            warn!(port = bound.port, error = %e, "RTP receiver: failed to register socket with poll");
                        }
                    }
                }
            }

            match poll.poll(&mut events, Some(self.config.event_loop_timeout)) {
                Ok(()) => {}
                Err(e) => {
                    warn!(error = %e, "RTP receiver: poll error");
                    std::thread::sleep(self.config.socket_error_retry);
                    continue;
                }
            }

            for event in events.iter() {
                if !event.is_readable() {
                    continue;
                }
                self.drain_socket(event.token(), &mut buf);
            }

            self.flush_all_ready();

            if last_telemetry.elapsed() >= self.config.telemetry_interval {
                self.log_telemetry();
                last_telemetry = Instant::now();
            }
        }

        info!("RTP receiver event loop stopped");
    }

    fn drain_socket(&self, token: Token, buf: &mut [u8]) {
        loop {
            let recv = {
                let sockets = self.sockets.lock();
                let Some(bound) = sockets.iter().find(|s| s.token == token) else { return };
                bound.socket.recv_from(buf)
            };
            match recv {
                Ok((len, src)) => {
                    self.handle_datagram(&buf[..len], src);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.drop_counters.record(DropReason::TransientIo);
                    debug!(error = %e, "RTP receiver: socket read error");
                    break;
                }
            }
        }
    }

    fn handle_datagram(&self, data: &[u8], src: SocketAddr) {
        if data.len() < rtp::FIXED_HEADER_LEN {
            self.drop_counters.record(DropReason::Malformed);
            return;
        }

        let Some(packet) = rtp::parse_packet(data, Instant::now()) else {
            self.drop_counters.record(DropReason::Malformed);
            return;
        };

        if !self.supports_payload_type(packet.payload_type, src.port()) {
            self.drop_counters.record(DropReason::Policy);
            return;
        }

        let endpoint_key = format!("{}:{}", src.ip(), src.port());
        {
            let mut source_map = self.source_to_ssrc.lock();
            if let Some(&old_ssrc) = source_map.get(&endpoint_key) {
                if old_ssrc != packet.ssrc {
                    self.teardown_ssrc(old_ssrc);
                }
            }
            source_map.insert(endpoint_key, packet.ssrc);
        }

        let ssrc = packet.ssrc;
        {
            let mut per_ssrc = self.per_ssrc.lock();
            let state = per_ssrc.entry(ssrc).or_insert_with(|| PerSsrcState {
                reordering: ReorderingBuffer::new(
                    self.config.max_delay,
                    self.config.max_size,
                    self.config.large_gap_threshold,
                    self.config.large_gap_log_interval,
                ),
                last_sentinel_bucket: None,
                probe: None,
                cached_properties: None,
                last_addr: src,
            });
            state.last_addr = src;
            state.reordering.push(packet);
        }
    }

    fn supports_payload_type(&self, payload_type: u8, source_port: u16) -> bool {
        if defaults::lookup(payload_type).is_some() {
            return true;
        }
        if payload_type == 111 {
            return true;
        }
        if source_port == self.config.default_port && defaults::is_probeable(payload_type) {
            return true;
        }
        false
    }

    fn teardown_ssrc(&self, ssrc: u32) {
        self.per_ssrc.lock().remove(&ssrc);
        self.handlers.on_ssrc_cleared(ssrc);
        crate::sap::unregister_local_ssrc(ssrc);
    }

    fn flush_all_ready(&self) {
        let ready_by_ssrc: Vec<(u32, Vec<crate::types::RtpPacketData>, SocketAddr)> = {
            let mut per_ssrc = self.per_ssrc.lock();
            per_ssrc
                .iter_mut()
                .map(|(&ssrc, state)| (ssrc, state.reordering.drain_ready(), state.last_addr))
                .filter(|(_, packets, _)| !packets.is_empty())
                .collect()
        };

        for (ssrc, packets, addr) in ready_by_ssrc {
            for packet in packets {
                self.emit_packet(ssrc, packet, addr);
            }
        }
    }

    fn resolve_properties(&self, ssrc: u32, payload_type: u8, port: u16) -> Option<StreamProperties> {
        if let Some(cached) = self.per_ssrc.lock().get(&ssrc).and_then(|s| s.cached_properties.clone()) {
            return Some(cached);
        }
        if let Some(props) = self.sap.stream_properties(ssrc) {
            self.cache_properties(ssrc, props.clone());
            return Some(props);
        }
        if port == self.config.default_port {
            if let Some(props) = defaults::lookup(payload_type) {
                self.cache_properties(ssrc, props.clone());
                return Some(props);
            }
        }
        None
    }

    fn cache_properties(&self, ssrc: u32, props: StreamProperties) {
        if let Some(state) = self.per_ssrc.lock().get_mut(&ssrc) {
            state.cached_properties = Some(props);
        }
    }

    fn emit_packet(&self, ssrc: u32, packet: crate::types::RtpPacketData, addr: SocketAddr) {
        let port = addr.port();
        let payload_type = packet.payload_type;

        if let Some(props) = self.resolve_properties(ssrc, payload_type, port) {
            self.emit_with_properties(ssrc, packet, &props, addr);
            return;
        }

        // No SDP/default match: run the format probe, buffering until it finalizes.
        let mut per_ssrc = self.per_ssrc.lock();
        let Some(state) = per_ssrc.get_mut(&ssrc) else { return };
        let probe = state.probe.get_or_insert_with(|| {
            AudioFormatProbe::new(self.config.probe_min_window, self.config.probe_min_bytes, self.config.probe_buffer_cap)
        });
        probe.accumulate(&packet.payload);
        if probe.try_finalize(port) {
            if let Some(props) = probe.detected_properties().cloned() {
                state.cached_properties = Some(props);
                state.probe = None;
            }
        }
        // Packet retained in the probe window; nothing to emit yet for this one.
    }

    fn emit_with_properties(&self, ssrc: u32, packet: crate::types::RtpPacketData, props: &StreamProperties, addr: SocketAddr) {
        let rtp_timestamp = packet.rtp_timestamp;
        let source_tag = self
            .sap
            .get_sap_announcements()
            .into_iter()
            .find(|a| a.port == addr.port())
            .and_then(|a| a.target_sink)
            .unwrap_or_else(|| format!("{}:{}", addr.ip(), addr.port()));

        match self.handlers.populate(packet, props, &source_tag) {
            Ok(mut tagged) => {
                let bucket = rtp_timestamp / SENTINEL_BUCKET_SIZE;
                let mut per_ssrc = self.per_ssrc.lock();
                if let Some(state) = per_ssrc.get_mut(&ssrc) {
                    if state.last_sentinel_bucket != Some(bucket) {
                        tagged.is_sentinel = true;
                        state.last_sentinel_bucket = Some(bucket);
                    }
                }
                drop(per_ssrc);
                self.publish(tagged);
            }
            Err(e) => {
                self.drop_counters.record(DropReason::Malformed);
                debug!(ssrc, error = %e, "RTP receiver: decode failed, dropping packet");
            }
        }
    }

    fn publish(&self, packet: TaggedAudioPacket) {
        let consumers = self.consumers.lock();
        for consumer in consumers.iter() {
            // Non-blocking: drop on a full queue rather than stall the event loop (spec §5).
            if consumer.try_send(packet.clone()).is_err() {
                self.drop_counters.record(DropReason::ResourceExhausted);
            }
        }
    }

    fn log_telemetry(&self) {
        let per_ssrc = self.per_ssrc.lock();
        let buffer_count = per_ssrc.len();
        let total_buffered: usize = per_ssrc.values().map(|s| s.reordering.len()).sum();
        let max_buffered = per_ssrc.values().map(|s| s.reordering.len()).max().unwrap_or(0);
        info!(buffer_count, total_buffered, max_buffered, "RTP receiver telemetry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sap::SapListener;

    fn test_receiver() -> Arc<Receiver> {
        let sap = Arc::new(SapListener::new(Vec::new()));
        Arc::new(Receiver::new(ReceiverConfig::default(), sap))
    }

    #[test]
    fn unknown_non_probe_payload_type_is_rejected() {
        let receiver = test_receiver();
        assert!(!receiver.supports_payload_type(50, 40000));
    }

    #[test]
    fn known_default_payload_type_is_accepted_on_any_port() {
        let receiver = test_receiver();
        assert!(receiver.supports_payload_type(0, 5004));
    }

    #[test]
    fn dynamic_pt_accepted_only_on_default_port() {
        let receiver = test_receiver();
        assert!(receiver.supports_payload_type(96, 40000));
        assert!(!receiver.supports_payload_type(96, 5004));
    }

    #[test]
    fn ssrc_change_tears_down_old_state() {
        let receiver = test_receiver();
        let addr: SocketAddr = "10.0.0.5:5004".parse().unwrap();

        receiver.per_ssrc.lock().insert(
            0x1111,
            PerSsrcState {
                reordering: ReorderingBuffer::new(Duration::from_millis(50), 128, 192, Duration::from_secs(2)),
                last_sentinel_bucket: None,
                probe: None,
                cached_properties: None,
                last_addr: addr,
            },
        );
        receiver.source_to_ssrc.lock().insert("10.0.0.5:5004".to_string(), 0x1111);

        receiver.handle_datagram(&build_rtp_packet(0x2222, 1), addr);

        assert!(!receiver.per_ssrc.lock().contains_key(&0x1111));
        assert!(receiver.per_ssrc.lock().contains_key(&0x2222));
    }

    fn build_rtp_packet(ssrc: u32, seq: u16) -> Vec<u8> {
        let mut buf = vec![0x80u8, 10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        buf[2..4].copy_from_slice(&seq.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf
    }
}
