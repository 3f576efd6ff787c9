//! SAP listener and SDP parsing (C3, spec §4.3).
//!
//! Directly grounded on teacher `network_audio/sap.rs::SapDiscovery` (now at
//! `.refs/sap.rs.teacher`): multicast socket setup, the `running`/`streams` shape, and the overall
//! `parse_sap_packet`/`parse_sdp` split are kept. Generalized to a second multicast group, the
//! fuller SDP grammar (`a=fmtp`, codec preference order, `x-screamrouter-target`), the dual
//! `ssrc`/`endpoint` index the spec calls for, and the local-loop suppression registry.

use crate::error::ReceiverError;
use crate::types::{Codec, Endianness, OpusMultistreamParams, StreamProperties};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const SAP_PORT: u16 = 9875;
pub const SAP_GROUP_GLOBAL: Ipv4Addr = Ipv4Addr::new(224, 2, 127, 254);
pub const SAP_GROUP_LOCAL: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 56);

/// Process-wide registry of SSRCs originated locally, consulted to suppress echo loops before
/// indexing an announcement (spec §4.3 "local-loop suppression").
static LOCAL_SSRCS: Lazy<RwLock<HashSet<u32>>> = Lazy::new(|| RwLock::new(HashSet::new()));

pub fn register_local_ssrc(ssrc: u32) {
    LOCAL_SSRCS.write().insert(ssrc);
}

pub fn unregister_local_ssrc(ssrc: u32) {
    LOCAL_SSRCS.write().remove(&ssrc);
}

fn is_local_ssrc(ssrc: u32) -> bool {
    LOCAL_SSRCS.read().contains(&ssrc)
}

#[derive(Debug, Clone)]
pub struct SapAnnouncement {
    pub stream_ip: Ipv4Addr,
    pub announcer_ip: IpAddr,
    pub port: u16,
    pub properties: StreamProperties,
    pub target_sink: Option<String>,
    pub target_host: Option<String>,
}

type SessionOpenCallback = Box<dyn Fn(Ipv4Addr, u16) + Send + Sync>;

pub struct SapListener {
    running: Arc<AtomicBool>,
    by_ssrc: Arc<RwLock<HashMap<u32, StreamProperties>>>,
    by_endpoint: Arc<RwLock<HashMap<String, SapAnnouncement>>>,
    known_ips: Vec<IpAddr>,
    on_session_open: Arc<RwLock<Option<SessionOpenCallback>>>,
}

impl SapListener {
    pub fn new(known_ips: Vec<IpAddr>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            by_ssrc: Arc::new(RwLock::new(HashMap::new())),
            by_endpoint: Arc::new(RwLock::new(HashMap::new())),
            known_ips,
            on_session_open: Arc::new(RwLock::new(None)),
        }
    }

    /// Install the callback invoked on every newly-seen `(stream_ip, port)` tuple (spec §4.3).
    /// Settable after construction so it can capture a receiver built from this same listener.
    pub fn set_session_open_callback(&self, callback: impl Fn(Ipv4Addr, u16) + Send + Sync + 'static) {
        *self.on_session_open.write() = Some(Box::new(callback));
    }

    pub fn stream_properties(&self, ssrc: u32) -> Option<StreamProperties> {
        self.by_ssrc.read().get(&ssrc).cloned()
    }

    pub fn get_sap_announcements(&self) -> Vec<SapAnnouncement> {
        self.by_endpoint.read().values().cloned().collect()
    }

    pub fn start(&self) -> Result<(), ReceiverError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ReceiverError::AlreadyRunning);
        }

        let socket = bind_sap_socket()?;

        let running = self.running.clone();
        let by_ssrc = self.by_ssrc.clone();
        let by_endpoint = self.by_endpoint.clone();
        let known_ips = self.known_ips.clone();
        let on_session_open = self.on_session_open.clone();

        std::thread::spawn(move || {
            run_sap_listener(socket, running, by_ssrc, by_endpoint, known_ips, on_session_open);
        });

        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn bind_sap_socket() -> Result<UdpSocket, ReceiverError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(ReceiverError::SocketCreate)?;
    socket.set_reuse_address(true).map_err(ReceiverError::SocketCreate)?;
    #[cfg(unix)]
    socket.set_reuse_port(true).map_err(ReceiverError::SocketCreate)?;

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), SAP_PORT);
    socket.bind(&addr.into()).map_err(|source| ReceiverError::SocketBind { addr, source })?;

    for group in [SAP_GROUP_GLOBAL, SAP_GROUP_LOCAL] {
        socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .map_err(|source| ReceiverError::MulticastJoin { group, source })?;
    }
    socket.set_multicast_loop_v4(true).ok();

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(Duration::from_secs(1))).map_err(ReceiverError::SocketCreate)?;
    Ok(socket)
}

fn run_sap_listener(
    socket: UdpSocket,
    running: Arc<AtomicBool>,
    by_ssrc: Arc<RwLock<HashMap<u32, StreamProperties>>>,
    by_endpoint: Arc<RwLock<HashMap<String, SapAnnouncement>>>,
    known_ips: Vec<IpAddr>,
    on_session_open: Arc<RwLock<Option<SessionOpenCallback>>>,
) {
    info!(port = SAP_PORT, "SAP listener started");
    let mut buf = [0u8; 4096];

    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((len, src)) => {
                if !known_ips.is_empty() && !known_ips.contains(&src.ip()) {
                    continue;
                }
                handle_sap_packet(&buf[..len], src.ip(), &by_ssrc, &by_endpoint, &on_session_open);
            }
            Err(ref e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {}
            Err(e) => {
                debug!(error = %e, "SAP receive error");
            }
        }
    }
    info!("SAP listener stopped");
}

fn handle_sap_packet(
    data: &[u8],
    source: IpAddr,
    by_ssrc: &Arc<RwLock<HashMap<u32, StreamProperties>>>,
    by_endpoint: &Arc<RwLock<HashMap<String, SapAnnouncement>>>,
    on_session_open: &Arc<RwLock<Option<SessionOpenCallback>>>,
) {
    let Some(header) = SapHeader::parse(data) else { return };
    let sdp_bytes = &data[header.sdp_offset..];
    let sdp_str = String::from_utf8_lossy(sdp_bytes);
    let Some(parsed) = parse_sdp(&sdp_str) else { return };

    if is_local_ssrc(parsed.ssrc) {
        debug!(ssrc = parsed.ssrc, "SAP: dropping local-loop announcement");
        return;
    }

    let endpoint_key = format!("{}:{}", parsed.connection_ip, parsed.port);

    if header.deletion {
        by_ssrc.write().remove(&parsed.ssrc);
        by_endpoint.write().remove(&endpoint_key);
        debug!(ssrc = parsed.ssrc, endpoint = %endpoint_key, "SAP: announcement withdrawn");
        return;
    }

    let is_new = !by_endpoint.read().contains_key(&endpoint_key);

    by_ssrc.write().insert(parsed.ssrc, parsed.properties.clone());
    by_endpoint.write().insert(
        endpoint_key,
        SapAnnouncement {
            stream_ip: parsed.connection_ip,
            announcer_ip: source,
            port: parsed.port,
            properties: parsed.properties.clone(),
            target_sink: parsed.target_sink.clone(),
            target_host: parsed.target_host.clone(),
        },
    );

    debug!(ssrc = parsed.ssrc, port = parsed.port, "SAP: announcement indexed");

    if is_new {
        if let Some(callback) = on_session_open.read().as_ref() {
            callback(parsed.connection_ip, parsed.port);
        }
    }
}

struct SapHeader {
    deletion: bool,
    sdp_offset: usize,
}

impl SapHeader {
    fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let version = (data[0] >> 5) & 0x07;
        if version != 1 {
            return None;
        }
        let deletion = data[0] & 0x04 != 0;
        let auth_present = data[0] & 0x01 != 0;
        let addr_type_len = if data[0] & 0x10 != 0 { 16 } else { 4 };
        let auth_len = if auth_present { data[1] as usize * 4 } else { 0 };

        let header_len = 4 + addr_type_len + auth_len;
        if data.len() < header_len {
            return None;
        }

        let payload = &data[header_len..];
        let sdp_start_in_payload = payload.iter().position(|&b| b == 0).map(|p| p + 1).unwrap_or(0);
        let sdp_offset = header_len + sdp_start_in_payload;
        if sdp_offset >= data.len() {
            return None;
        }
        Some(Self { deletion, sdp_offset })
    }
}

struct ParsedSdp {
    ssrc: u32,
    connection_ip: Ipv4Addr,
    port: u16,
    properties: StreamProperties,
    target_sink: Option<String>,
    target_host: Option<String>,
}

/// Line-oriented SDP parse (spec §4.3). CRLF or LF endings accepted via `str::lines`; codec names
/// matched case-insensitively.
fn parse_sdp(sdp: &str) -> Option<ParsedSdp> {
    let mut ssrc: u32 = 0;
    let mut connection_ip = Ipv4Addr::UNSPECIFIED;
    let mut port: u16 = 0;
    let mut advertised_pts: Vec<u8> = Vec::new();
    let mut rtpmaps: HashMap<u8, (String, u32, u8)> = HashMap::new();
    let mut fmtp: HashMap<u8, HashMap<String, String>> = HashMap::new();
    let mut target_sink = None;
    let mut target_host = None;

    for raw_line in sdp.lines() {
        let line = raw_line.trim();
        if let Some(rest) = line.strip_prefix("o=") {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            if parts.len() >= 2 {
                ssrc = parts[1].parse::<u64>().unwrap_or(0) as u32;
            }
        } else if let Some(rest) = line.strip_prefix("c=IN IP4 ") {
            let addr_part = rest.split('/').next().unwrap_or("");
            if let Ok(addr) = addr_part.parse() {
                connection_ip = addr;
            }
        } else if let Some(rest) = line.strip_prefix("m=audio ") {
            let parts: Vec<&str> = rest.split_whitespace().collect();
            if let Some(p) = parts.first() {
                port = p.parse().unwrap_or(0);
            }
            advertised_pts = parts.iter().skip(2).filter_map(|s| s.parse().ok()).collect();
        } else if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            if let Some((pt_str, mapping)) = rest.split_once(' ') {
                if let Ok(pt) = pt_str.parse::<u8>() {
                    let fields: Vec<&str> = mapping.split('/').collect();
                    let encoding = fields.first().copied().unwrap_or("").to_string();
                    let rate = fields.get(1).and_then(|s| s.parse().ok()).unwrap_or(48000);
                    let channels = fields.get(2).and_then(|s| s.parse().ok()).unwrap_or(1);
                    rtpmaps.insert(pt, (encoding, rate, channels));
                }
            }
        } else if let Some(rest) = line.strip_prefix("a=fmtp:") {
            if let Some((pt_str, params)) = rest.split_once(' ') {
                if let Ok(pt) = pt_str.parse::<u8>() {
                    let mut map = HashMap::new();
                    for kv in params.split(';') {
                        if let Some((k, v)) = kv.split_once('=') {
                            map.insert(k.trim().to_string(), v.trim().to_string());
                        }
                    }
                    fmtp.insert(pt, map);
                }
            }
        } else if let Some(rest) = line.strip_prefix("a=x-screamrouter-target:") {
            for kv in rest.split(';') {
                if let Some((k, v)) = kv.split_once('=') {
                    match k.trim() {
                        "sink" => target_sink = Some(v.trim().to_string()),
                        "host" => target_host = Some(v.trim().to_string()),
                        _ => {}
                    }
                }
            }
        }
    }

    if port == 0 {
        return None;
    }

    let chosen_pt = select_preferred_payload_type(&advertised_pts, &rtpmaps)?;
    let (encoding, rate, sdp_channels) = rtpmaps.get(&chosen_pt).cloned().unwrap_or_else(|| ("L16".to_string(), 48000, 1));
    let params = fmtp.get(&chosen_pt);

    let encoding_upper = encoding.to_ascii_uppercase();
    let codec = if encoding_upper.starts_with("OPUS") {
        Codec::Opus
    } else if encoding_upper.starts_with("PCMU") {
        Codec::Pcmu
    } else if encoding_upper.starts_with("PCMA") {
        Codec::Pcma
    } else if encoding_upper.starts_with('L') {
        Codec::Pcm
    } else {
        Codec::Unknown
    };

    let endianness = match encoding_upper.as_str() {
        "L16" | "L24" => Endianness::Big,
        "S16LE" => Endianness::Little,
        _ if codec == Codec::Opus => Endianness::Little,
        _ => Endianness::Big,
    };

    let bit_depth = match encoding_upper.as_str() {
        "L24" => 24,
        "L16" | "S16LE" | "OPUS" => 16,
        "PCMU" | "PCMA" => 8,
        _ => 16,
    };

    let channels = params
        .and_then(|p| p.get("channels"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(sdp_channels)
        .max(1);

    let opus = if codec == Codec::Opus {
        params.map(|p| OpusMultistreamParams {
            streams: p.get("streams").and_then(|v| v.parse().ok()).unwrap_or(0),
            coupled_streams: p.get("coupled_streams").and_then(|v| v.parse().ok()).unwrap_or(0),
            mapping_family: p.get("mapping_family").and_then(|v| v.parse().ok()).unwrap_or(0),
            channel_mapping: p
                .get("channel_mapping")
                .map(|v| v.split(',').filter_map(|s| s.trim().parse().ok()).collect())
                .unwrap_or_default(),
        })
    } else {
        None
    };

    Some(ParsedSdp {
        ssrc,
        connection_ip,
        port,
        properties: StreamProperties {
            codec,
            sample_rate: rate,
            channels,
            bit_depth,
            endianness,
            port,
            payload_type: chosen_pt,
            opus,
            confidence: 1.0,
        },
        target_sink,
        target_host,
    })
}

/// Codec preference order (spec §4.3): Opus, then L24/L16/S16LE/PCM, else first advertised entry.
fn select_preferred_payload_type(advertised: &[u8], rtpmaps: &HashMap<u8, (String, u32, u8)>) -> Option<u8> {
    let preference = ["OPUS", "L24", "L16", "S16LE", "PCM"];
    for wanted in preference {
        for &pt in advertised {
            if let Some((encoding, _, _)) = rtpmaps.get(&pt) {
                if encoding.to_ascii_uppercase().starts_with(wanted) {
                    return Some(pt);
                }
            }
        }
    }
    advertised.first().copied()
}
