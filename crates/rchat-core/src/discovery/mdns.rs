//! Local-network discovery (component F.1) over mDNS.
//!
//! Each node responds to and browses `_rchat._udp.local.`, advertising its
//! `PeerId` and protocol version in a TXT record. Peers announcing an
//! incompatible version are surfaced but never auto-connected to.

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use crate::crypto::identity::PeerId;
use crate::error::{CoreError, CoreResult};
use crate::event::{Event, EventBus};

pub const SERVICE_TYPE: &str = "_rchat._udp.local.";
pub const PROTOCOL_VERSION: u8 = 1;

const TXT_KEY_PEER_ID: &str = "id";
const TXT_KEY_VERSION: &str = "v";

/// Owns the mDNS daemon for the process lifetime. Dropping it tears down
/// the responder and any in-flight browse.
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
    fullname: String,
}

impl MdnsDiscovery {
    /// Registers this node's presence and starts browsing for peers. The
    /// browse loop runs on a dedicated OS thread (`mdns-sd`'s receiver is
    /// synchronous) and forwards discovered/expired peers onto the event
    /// bus, which is safe to call from any thread.
    pub fn start(local_peer: PeerId, port: u16, events: EventBus) -> CoreResult<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| CoreError::DialFailed(e.to_string()))?;

        let instance_name = local_peer.to_hex();
        let properties = [
            (TXT_KEY_PEER_ID, local_peer.to_hex()),
            (TXT_KEY_VERSION, PROTOCOL_VERSION.to_string()),
        ];
        let hostname = format!("{instance_name}.local.");
        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &hostname,
            "",
            port,
            &properties[..],
        )
        .map_err(|e| CoreError::DialFailed(e.to_string()))?
        .enable_addr_auto();
        let fullname = service.get_fullname().to_string();
        daemon
            .register(service)
            .map_err(|e| CoreError::DialFailed(e.to_string()))?;

        let receiver = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| CoreError::DialFailed(e.to_string()))?;

        std::thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        if let Some(peer) = peer_from_service_info(&info, &local_peer) {
                            events.emit(Event::LocalPeerDiscovered { peer_id: peer });
                        }
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        if let Some(peer) = peer_from_fullname(&fullname) {
                            events.emit(Event::LocalPeerExpired { peer_id: peer });
                        }
                    }
                    _ => {}
                }
            }
        });

        Ok(Self { daemon, fullname })
    }

    pub fn stop(&self) -> CoreResult<()> {
        self.daemon
            .unregister(&self.fullname)
            .map_err(|e| CoreError::DialFailed(e.to_string()))?;
        Ok(())
    }
}

/// Parses the instance's `PeerId` out of its TXT record, filtering out our
/// own announcement and anything on an incompatible protocol version.
fn peer_from_service_info(info: &ServiceInfo, local_peer: &PeerId) -> Option<PeerId> {
    let version: u8 = info.get_property_val_str(TXT_KEY_VERSION)?.parse().ok()?;
    if version != PROTOCOL_VERSION {
        return None;
    }
    let peer = PeerId::from_hex(info.get_property_val_str(TXT_KEY_PEER_ID)?)?;
    if &peer == local_peer {
        return None;
    }
    Some(peer)
}

/// The fullname is `<hex-peer-id>.<service-type>`; on removal we only have
/// the fullname, so recover the `PeerId` from its leading label.
fn peer_from_fullname(fullname: &str) -> Option<PeerId> {
    let label = fullname.split('.').next()?;
    PeerId::from_hex(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fullname_parsing_recovers_peer_id() {
        let peer = PeerId([9; 32]);
        let fullname = format!("{}.{}", peer.to_hex(), SERVICE_TYPE);
        assert_eq!(peer_from_fullname(&fullname), Some(peer));
    }

    #[test]
    fn fullname_parsing_rejects_garbage() {
        assert_eq!(peer_from_fullname("not-hex._rchat._udp.local."), None);
    }
}
