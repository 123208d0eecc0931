//! Gossipsub-style topic pubsub (component G), wrapping `iroh_gossip::net::Gossip`.
//!
//! One topic per invite password (`invite::invite_offer_topic`) carries
//! invitation-offer traffic; a single well-known `presence` topic carries opportunistic
//! freshness pings. Every message is signed with the sender's `IdentityKey`
//! and verified against the claimed author before being handed to the
//! caller — the gossip layer itself authenticates connections, not message
//! authorship, since a message can be relayed by a peer that didn't write it.

use iroh::EndpointId;
use iroh_gossip::net::Gossip;
use iroh_gossip::proto::TopicId;
use serde::{Deserialize, Serialize};

use crate::crypto::identity::{self, IdentityKey, PeerId};
use crate::error::{CoreError, CoreResult};

/// The well-known topic for opportunistic presence pings.
pub const PRESENCE_TOPIC: &str = "presence";

/// A gossip payload signed by its author. The signature covers `payload`
/// alone, so any topic's message type can ride inside unchanged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedMessage {
    pub author: PeerId,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedMessage {
    pub fn sign(identity: &IdentityKey, payload: Vec<u8>) -> Self {
        let signature = identity.sign(&payload).to_bytes().to_vec();
        Self {
            author: identity.peer_id(),
            payload,
            signature,
        }
    }

    /// Verifies the signature and returns the payload bytes on success.
    pub fn verify(&self) -> CoreResult<&[u8]> {
        let sig_bytes: [u8; 64] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::IdentityMismatch)?;
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        if !identity::verify(&self.author, &self.payload, &sig) {
            return Err(CoreError::IdentityMismatch);
        }
        Ok(&self.payload)
    }
}

/// Derives a stable 32-byte `TopicId` from a human-readable topic name
/// (`invite_offer_topic(password)` or [`PRESENCE_TOPIC`]) by hashing it with BLAKE3.
pub fn topic_id(name: &str) -> TopicId {
    TopicId::from_bytes(*blake3::hash(name.as_bytes()).as_bytes())
}

/// Thin wrapper tying the gossip actor to this node's identity, so every
/// publish is transparently signed and every receive is transparently
/// verified.
#[derive(Clone)]
pub struct PubSub {
    gossip: Gossip,
    identity: std::sync::Arc<IdentityKey>,
}

impl PubSub {
    pub fn new(gossip: Gossip, identity: std::sync::Arc<IdentityKey>) -> Self {
        Self { gossip, identity }
    }

    pub fn gossip(&self) -> &Gossip {
        &self.gossip
    }

    /// Joins `name`'s topic with the given bootstrap peers and returns a
    /// handle the caller can broadcast on and poll for verified messages.
    pub async fn join(&self, name: &str, bootstrap: Vec<EndpointId>) -> CoreResult<PubSubTopic> {
        let topic = self
            .gossip
            .subscribe(topic_id(name), bootstrap)
            .await
            .map_err(|e| CoreError::DialFailed(e.to_string()))?;
        Ok(PubSubTopic {
            inner: topic,
            identity: self.identity.clone(),
        })
    }
}

pub struct PubSubTopic {
    inner: iroh_gossip::api::GossipTopic,
    identity: std::sync::Arc<IdentityKey>,
}

impl PubSubTopic {
    pub async fn publish(&mut self, payload: Vec<u8>) -> CoreResult<()> {
        let signed = SignedMessage::sign(&self.identity, payload);
        let bytes = postcard::to_allocvec(&signed)?;
        self.inner
            .broadcast(bytes.into())
            .await
            .map_err(|e| CoreError::DialFailed(e.to_string()))
    }

    /// Waits for the next gossip message on this topic, verifying its
    /// signature. Messages that fail to parse or verify are skipped rather
    /// than surfaced — a misbehaving or buggy peer shouldn't stall the
    /// whole topic.
    pub async fn recv_verified(&mut self) -> Option<(PeerId, Vec<u8>)> {
        use n0_future::StreamExt;
        loop {
            let event = match self.inner.next().await {
                Some(Ok(event)) => event,
                Some(Err(_)) | None => return None,
            };
            let iroh_gossip::api::Event::Received(message) = event else {
                continue;
            };
            let Ok(signed) = postcard::from_bytes::<SignedMessage>(&message.content) else {
                continue;
            };
            match signed.verify() {
                Ok(payload) => return Some((signed.author, payload.to_vec())),
                Err(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_message_roundtrips() {
        let identity = IdentityKey::generate();
        let msg = SignedMessage::sign(&identity, b"hello".to_vec());
        assert_eq!(msg.verify().unwrap(), b"hello");
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let identity = IdentityKey::generate();
        let mut msg = SignedMessage::sign(&identity, b"hello".to_vec());
        msg.payload = b"goodbye".to_vec();
        assert!(msg.verify().is_err());
    }

    #[test]
    fn topic_id_is_stable_and_name_sensitive() {
        assert_eq!(topic_id(PRESENCE_TOPIC), topic_id(PRESENCE_TOPIC));
        assert_ne!(topic_id(PRESENCE_TOPIC), topic_id("invite/a/b"));
    }
}
