//! Peer discovery (component F): local-network mDNS plus an optional
//! internet rendezvous directory for peers outside the local broadcast
//! domain.

pub mod mdns;
pub mod rendezvous;
