//! Sibling raw (Scream-style) receiver used by the control surface (spec §4.7).
//!
//! No RTP framing: each 1157-byte datagram is a 5-byte header
//! `{sample_rate_encoded, bit_depth, channels, chlayout1, chlayout2}` followed by raw PCM.
//! Socket setup follows the same `socket2` pattern as [`crate::receiver::Receiver::open_socket`],
//! grounded on teacher `network_audio/rtp.rs::RtpReceiver::new`.

use crate::error::{DropCounters, DropReason, ReceiverError};
use crate::types::{join_channel_mask, TaggedAudioPacket};

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const HEADER_LEN: usize = 5;

/// Header `sample_rate_encoded` values above 128 use `value - 128` as kHz; below that, the raw
/// value is the sample rate divided by 1000 for legacy senders. Kept literal per the protocol.
fn decode_sample_rate(encoded: u8) -> u32 {
    if encoded >= 128 {
        (encoded as u32 - 128) * 1000
    } else {
        encoded as u32 * 1000
    }
}

pub struct RawReceiver {
    port: u16,
    running: Arc<AtomicBool>,
    drop_counters: Arc<DropCounters>,
    consumers: Arc<parking_lot::Mutex<Vec<flume::Sender<TaggedAudioPacket>>>>,
}

impl RawReceiver {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            running: Arc::new(AtomicBool::new(false)),
            drop_counters: Arc::new(DropCounters::default()),
            consumers: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn add_consumer(&self, sender: flume::Sender<TaggedAudioPacket>) {
        self.consumers.lock().push(sender);
    }

    pub fn drop_counters(&self) -> Arc<DropCounters> {
        self.drop_counters.clone()
    }

    pub fn start(&self) -> Result<(), ReceiverError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ReceiverError::AlreadyRunning);
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(ReceiverError::SocketCreate)?;
        socket.set_reuse_address(true).map_err(ReceiverError::SocketCreate)?;
        #[cfg(unix)]
        socket.set_reuse_port(true).map_err(ReceiverError::SocketCreate)?;

        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port);
        socket.bind(&addr.into()).map_err(|source| ReceiverError::SocketBind { addr, source })?;

        let socket: UdpSocket = socket.into();
        socket.set_read_timeout(Some(Duration::from_millis(5))).map_err(ReceiverError::SocketCreate)?;

        let running = self.running.clone();
        let drop_counters = self.drop_counters.clone();
        let consumers = self.consumers.clone();
        let port = self.port;

        std::thread::spawn(move || run_raw_listener(socket, running, drop_counters, consumers, port));
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn run_raw_listener(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    drop_counters: Arc<DropCounters>,
    consumers: Arc<parking_lot::Mutex<Vec<flume::Sender<TaggedAudioPacket>>>>,
    port: u16,
) {
    info!(port, "raw receiver started");
    let mut buf = [0u8; 1157];

    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, src)) => {
                if let Some(packet) = parse_raw_packet(&buf[..len], src, port) {
                    let consumers = consumers.lock();
                    for consumer in consumers.iter() {
                        if consumer.try_send(packet.clone()).is_err() {
                            drop_counters.record(DropReason::ResourceExhausted);
                        }
                    }
                } else {
                    drop_counters.record(DropReason::Malformed);
                }
            }
            Err(ref e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
            Err(e) => {
                drop_counters.record(DropReason::TransientIo);
                debug!(error = %e, "raw receiver: socket error");
            }
        }
    }
    info!("raw receiver stopped");
}

fn parse_raw_packet(data: &[u8], src: SocketAddr, port: u16) -> Option<TaggedAudioPacket> {
    if data.len() <= HEADER_LEN {
        return None;
    }
    let sample_rate = decode_sample_rate(data[0]);
    let bit_depth = data[1];
    let channels = data[2];
    let chlayout1 = data[3];
    let chlayout2 = data[4];
    if sample_rate == 0 || channels == 0 {
        return None;
    }

    Some(TaggedAudioPacket {
        source_tag: format!("{}:{}", src.ip(), src.port()),
        ssrcs: smallvec::smallvec![],
        received_time: Instant::now(),
        rtp_timestamp: 0,
        rtp_sequence_number: None,
        sample_rate,
        channels,
        bit_depth,
        chlayout1,
        chlayout2,
        audio_data: data[HEADER_LEN..].to_vec(),
        is_sentinel: false,
    })
}

#[allow(dead_code)]
fn channel_mask_for_packet(packet: &TaggedAudioPacket) -> u16 {
    join_channel_mask(packet.chlayout1, packet.chlayout2)
}
