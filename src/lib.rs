//! Real-time RTP/SAP audio ingestion pipeline.
//!
//! Discovers audio sessions via SAP, parses and reorders RTP packets per SSRC, decodes L16 PCM,
//! Opus (mono/stereo/multistream), and G.711 µ-law/A-law payloads, and auto-detects format when
//! no session description is available. Emitted packets are delivered to downstream consumers
//! registered through [`control::ControlSurface`].

pub mod config;
pub mod control;
pub mod defaults;
pub mod error;
pub mod jitter;
pub mod payload;
pub mod probe;
pub mod raw;
pub mod receiver;
pub mod rtp;
pub mod sap;
pub mod types;

pub use config::ReceiverConfig;
pub use control::{ControlSurface, Protocol};
pub use error::{DropCounters, DropReason, ReceiverError};
pub use receiver::Receiver;
pub use sap::SapListener;
pub use types::{Codec, StreamProperties, TaggedAudioPacket};

use std::sync::Arc;

/// Construct the default receiver/SAP-listener pair wired together: SAP announcements
/// automatically open dynamic RTP sockets on the receiver (spec §4.3 session-open callback).
pub fn build_default_pipeline(config: ReceiverConfig) -> (Arc<Receiver>, Arc<SapListener>) {
    let sap = Arc::new(SapListener::new(config.sap_known_ips.clone()));
    let receiver = Arc::new(Receiver::new(config, sap.clone()));

    let receiver_for_callback = receiver.clone();
    sap.set_session_open_callback(move |_stream_ip, port| {
        if let Err(e) = receiver_for_callback.open_dynamic_socket(port, None) {
            tracing::warn!(port, error = %e, "failed to open dynamic socket for SAP announcement");
        }
    });

    (receiver, sap)
}
