//! Public control surface (C7, spec §4.7).
//!
//! No direct teacher analogue; new code following the crate's established locking and
//! bounded-queue idioms (`parking_lot` + `flume`, as used throughout `receiver.rs`/`raw.rs`).

use crate::error::ReceiverError;
use crate::raw::RawReceiver;
use crate::receiver::Receiver;
use crate::sap::{SapAnnouncement, SapListener};
use crate::types::TaggedAudioPacket;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Rtp,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConsumerKey {
    instance_id: String,
    endpoint_tag: String,
}

/// Top-level handle bundling the RTP receiver, SAP listener, and the raw-protocol siblings
/// registered via [`ControlSurface::add_raw_receiver`].
pub struct ControlSurface {
    rtp_receiver: Arc<Receiver>,
    sap: Arc<SapListener>,
    raw_receivers: Mutex<HashMap<u16, Arc<RawReceiver>>>,
    consumers: Mutex<HashMap<ConsumerKey, flume::Receiver<TaggedAudioPacket>>>,
}

impl ControlSurface {
    pub fn new(rtp_receiver: Arc<Receiver>, sap: Arc<SapListener>) -> Self {
        Self {
            rtp_receiver,
            sap,
            raw_receivers: Mutex::new(HashMap::new()),
            consumers: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_raw_receiver(&self, port: u16) -> Result<Arc<RawReceiver>, ReceiverError> {
        let mut raw_receivers = self.raw_receivers.lock();
        if let Some(existing) = raw_receivers.get(&port) {
            return Ok(existing.clone());
        }
        let receiver = Arc::new(RawReceiver::new(port));
        receiver.start()?;
        raw_receivers.insert(port, receiver.clone());
        Ok(receiver)
    }

    pub fn remove_raw_receiver(&self, port: u16) {
        if let Some(receiver) = self.raw_receivers.lock().remove(&port) {
            receiver.stop();
        }
    }

    /// Register a downstream consumer queue under `(instance_id, endpoint_tag)`; every packet
    /// emitted by the matching protocol's receiver is duplicated to it (spec §4.7).
    pub fn configure_source(
        &self,
        instance_id: &str,
        endpoint_tag: &str,
        protocol: Protocol,
        queue_capacity: usize,
    ) -> flume::Receiver<TaggedAudioPacket> {
        let (tx, rx) = flume::bounded(queue_capacity);
        match protocol {
            Protocol::Rtp => self.rtp_receiver.add_consumer(tx),
            Protocol::Raw => {
                for receiver in self.raw_receivers.lock().values() {
                    receiver.add_consumer(tx.clone());
                }
            }
        }
        let key = ConsumerKey { instance_id: instance_id.to_string(), endpoint_tag: endpoint_tag.to_string() };
        self.consumers.lock().insert(key, rx.clone());
        rx
    }

    pub fn remove_source(&self, instance_id: &str) {
        self.consumers.lock().retain(|key, _| key.instance_id != instance_id);
    }

    pub fn get_sap_announcements(&self) -> Vec<SapAnnouncement> {
        self.sap.get_sap_announcements()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReceiverConfig;

    fn surface() -> ControlSurface {
        let sap = Arc::new(SapListener::new(Vec::new()));
        let receiver = Arc::new(Receiver::new(ReceiverConfig::default(), sap.clone()));
        ControlSurface::new(receiver, sap)
    }

    #[test]
    fn configure_source_registers_a_queue() {
        let surface = surface();
        let rx = surface.configure_source("inst-1", "zone-1", Protocol::Rtp, 16);
        assert!(rx.is_empty());
        assert_eq!(surface.consumers.lock().len(), 1);
    }

    #[test]
    fn remove_source_drops_matching_consumers() {
        let surface = surface();
        surface.configure_source("inst-1", "zone-1", Protocol::Rtp, 16);
        surface.configure_source("inst-2", "zone-2", Protocol::Rtp, 16);
        surface.remove_source("inst-1");
        assert_eq!(surface.consumers.lock().len(), 1);
    }

    #[test]
    fn sap_announcements_start_empty() {
        let surface = surface();
        assert!(surface.get_sap_announcements().is_empty());
    }
}
