//! Session Manager (component H): per-peer authenticated session state,
//! key agreement, replay protection, and sequence numbering.
//!
//! A session is an actor: a task owns the peer's outbox and consumes a
//! bounded MPSC inbox of outgoing frames (spec §5's "dispatch to the
//! session is actor-style"). The actor boundary also breaks the
//! session/outbox/persistence cyclic reference the teacher's `App` avoids
//! by holding IDs rather than embedded owners (spec §9).

use std::collections::HashMap;
use std::sync::Arc;

use hkdf::Hkdf;
use parking_lot::RwLock;
use sha2::Sha256;
use tokio::sync::{mpsc, oneshot};
use tracing::{instrument, warn};
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::crypto::identity::{IdentityKey, PeerId};
use crate::error::{CoreError, CoreResult};

/// Outbound frame backpressure bound (spec §5: 256 queued frames, then
/// `BackpressureExceeded`).
pub const OUTBOX_BOUND: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SessionState {
    Handshaking,
    Established,
    Closed,
}

/// A handshake message exchanged once per new session, carrying an
/// ephemeral X25519 public key signed by the sender's long-lived Ed25519
/// identity — the application-level analogue of the transport's own
/// Noise/TLS handshake, giving each session a key independent of the
/// underlying iroh connection's lifetime.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct HandshakeMsg {
    pub identity_pub: [u8; 32],
    pub ephemeral_pub: [u8; 32],
    pub signature: Vec<u8>,
}

pub fn build_handshake(identity: &IdentityKey, ephemeral_pub: &PublicKey) -> HandshakeMsg {
    let sig = identity.sign(ephemeral_pub.as_bytes());
    HandshakeMsg {
        identity_pub: identity.peer_id().0,
        ephemeral_pub: *ephemeral_pub.as_bytes(),
        signature: sig.to_bytes().to_vec(),
    }
}

pub fn verify_handshake(msg: &HandshakeMsg) -> CoreResult<(PeerId, PublicKey)> {
    let peer_id = PeerId(msg.identity_pub);
    let sig_bytes: [u8; 64] = msg
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| CoreError::HandshakeFailed("bad signature length".into()))?;
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    if !crate::crypto::identity::verify(&peer_id, &msg.ephemeral_pub, &sig) {
        return Err(CoreError::HandshakeFailed("bad signature".into()));
    }
    Ok((peer_id, PublicKey::from(msg.ephemeral_pub)))
}

/// Derive the session's transport key from an X25519 shared secret. Both
/// sides mix in the sorted pair of identity keys so A->B and B->A agree on
/// the same key regardless of who dialed.
fn derive_session_key(shared: &x25519_dalek::SharedSecret, a: &PeerId, b: &PeerId) -> [u8; 32] {
    let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
    let mut context = Vec::with_capacity(64 + 16);
    context.extend_from_slice(&lo.0);
    context.extend_from_slice(&hi.0);
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut out = [0u8; 32];
    hk.expand(&context, &mut out)
        .expect("32 bytes is within HKDF-SHA256's range");
    out
}

/// A single outstanding actor command: either a frame to send, or a
/// shutdown request.
pub enum SessionCommand {
    Send(Vec<u8>, oneshot::Sender<CoreResult<()>>),
    Close,
}

/// Anything that can move bytes to/from a specific peer. `transport.rs`
/// implements this over an iroh bidirectional stream; tests implement it
/// over an in-memory channel.
#[async_trait::async_trait]
pub trait SessionTransport: Send + Sync {
    async fn send_frame(&self, bytes: &[u8]) -> CoreResult<()>;
}

pub struct Session {
    pub peer_id: PeerId,
    pub state: RwLock<SessionState>,
    pub tx_seq: RwLock<u64>,
    pub rx_seq: RwLock<u64>,
    session_key: [u8; 32],
    inbox: mpsc::Sender<SessionCommand>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Seal `plaintext` under the session key with the next `tx_seq`,
    /// returning the wire bytes `{seq: u64 LE}{nonce}{ciphertext}`.
    fn seal_next(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut seq_guard = self.tx_seq.write();
        let seq = *seq_guard;
        *seq_guard += 1;
        drop(seq_guard);
        let mut aad = seq.to_le_bytes().to_vec();
        let (nonce, ciphertext) = crate::crypto::aead::seal(&self.session_key, plaintext);
        aad.extend_from_slice(&nonce);
        aad.extend_from_slice(&ciphertext);
        aad
    }

    /// Verify and open a received frame. Returns `Ok(None)` for a replayed
    /// or stale `rx_seq` — dropped silently, per spec invariant 5, not an
    /// error the caller should surface as a protocol failure.
    fn open_received(&self, wire: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        if wire.len() < 8 + crate::crypto::aead::NONCE_LEN {
            return Err(CoreError::MalformedFrame("frame too short".into()));
        }
        let seq = u64::from_le_bytes(wire[0..8].try_into().unwrap());
        let mut rx_guard = self.rx_seq.write();
        if seq < *rx_guard {
            return Ok(None);
        }
        let nonce = &wire[8..8 + crate::crypto::aead::NONCE_LEN];
        let ciphertext = &wire[8 + crate::crypto::aead::NONCE_LEN..];
        let plaintext = crate::crypto::aead::open(&self.session_key, nonce, ciphertext)
            .map_err(|_| CoreError::ProtocolViolation("session decrypt failed".into()))?;
        *rx_guard = seq + 1;
        Ok(Some(plaintext))
    }

    /// Enqueue a frame for the session actor to send. Returns
    /// `BackpressureExceeded` if the inbox is full.
    pub async fn enqueue(&self, plaintext: Vec<u8>) -> CoreResult<()> {
        let sealed = self.seal_next(&plaintext);
        let (tx, rx) = oneshot::channel();
        self.inbox
            .try_send(SessionCommand::Send(sealed, tx))
            .map_err(|_| CoreError::BackpressureExceeded)?;
        rx.await.map_err(|_| CoreError::Timeout)?
    }

    pub async fn close(&self) {
        *self.state.write() = SessionState::Closed;
        let _ = self.inbox.send(SessionCommand::Close).await;
    }
}

/// Spawns the per-session actor task: consumes the bounded inbox FIFO and
/// hands each sealed frame to the transport. FIFO within a session,
/// per spec §5 ordering guarantees; no ordering is implied across peers.
pub fn spawn_session_actor(
    transport: Arc<dyn SessionTransport>,
) -> (mpsc::Sender<SessionCommand>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(OUTBOX_BOUND);
    let handle = tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                SessionCommand::Send(bytes, ack) => {
                    let result = transport.send_frame(&bytes).await;
                    let _ = ack.send(result);
                }
                SessionCommand::Close => break,
            }
        }
    });
    (tx, handle)
}

/// Holds the `peer_id -> Session` map behind a per-entry lock, per spec
/// §5. Sessions are in-memory only and never span process restarts.
pub struct SessionManager {
    identity: Arc<IdentityKey>,
    sessions: RwLock<HashMap<PeerId, Arc<Session>>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("peer_id", &self.identity.peer_id())
            .field("sessions", &self.sessions.read().len())
            .finish()
    }
}

impl SessionManager {
    pub fn new(identity: Arc<IdentityKey>) -> Self {
        Self {
            identity,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<Arc<Session>> {
        self.sessions.read().get(peer_id).cloned()
    }

    #[instrument(skip(self, my_ephemeral, transport))]
    pub fn establish(
        &self,
        remote_handshake: &HandshakeMsg,
        my_ephemeral: EphemeralSecret,
        transport: Arc<dyn SessionTransport>,
    ) -> CoreResult<Arc<Session>> {
        let (remote_peer, remote_ephemeral_pub) = verify_handshake(remote_handshake)?;
        let shared = my_ephemeral.diffie_hellman(&remote_ephemeral_pub);
        let session_key = derive_session_key(&shared, &self.identity.peer_id(), &remote_peer);
        let (inbox, _handle) = spawn_session_actor(transport);
        let session = Arc::new(Session {
            peer_id: remote_peer,
            state: RwLock::new(SessionState::Established),
            tx_seq: RwLock::new(0),
            rx_seq: RwLock::new(0),
            session_key,
            inbox,
        });
        self.sessions.write().insert(remote_peer, session.clone());
        Ok(session)
    }

    pub async fn close(&self, peer_id: &PeerId) {
        let session = self.sessions.write().remove(peer_id);
        if let Some(session) = session {
            session.close().await;
        }
    }

    pub fn receive(&self, peer_id: &PeerId, wire: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        let session = self.get(peer_id).ok_or(CoreError::UnknownPeer)?;
        match session.open_received(wire) {
            Ok(plaintext) => Ok(plaintext),
            Err(e) => {
                warn!(peer = %peer_id, error = %e, "dropping session after protocol violation");
                Err(e)
            }
        }
    }
}

pub fn new_ephemeral() -> (EphemeralSecret, PublicKey) {
    let secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Loopback(Mutex<Vec<Vec<u8>>>);

    #[async_trait::async_trait]
    impl SessionTransport for Loopback {
        async fn send_frame(&self, bytes: &[u8]) -> CoreResult<()> {
            self.0.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    fn pair() -> (Arc<IdentityKey>, Arc<IdentityKey>) {
        (Arc::new(IdentityKey::generate()), Arc::new(IdentityKey::generate()))
    }

    #[tokio::test]
    async fn mutual_handshake_derives_matching_session_keys() {
        let (alice, bob) = pair();
        let (a_secret, a_pub) = new_ephemeral();
        let (b_secret, b_pub) = new_ephemeral();
        let a_hs = build_handshake(&alice, &a_pub);
        let b_hs = build_handshake(&bob, &b_pub);

        let a_mgr = SessionManager::new(alice.clone());
        let b_mgr = SessionManager::new(bob.clone());
        let a_transport = Arc::new(Loopback(Mutex::new(Vec::new())));
        let b_transport = Arc::new(Loopback(Mutex::new(Vec::new())));

        let a_session = a_mgr.establish(&b_hs, a_secret, a_transport).unwrap();
        let b_session = b_mgr.establish(&a_hs, b_secret, b_transport).unwrap();

        // Both sides must agree on a session key: A's ciphertext for B
        // must be openable by B's session state and vice versa.
        a_session.enqueue(b"ping".to_vec()).await.unwrap();
        // peek what got "sent" by re-sealing deterministically is not
        // possible (fresh nonce each time); instead verify symmetric
        // key material directly via a round trip through `Session`.
        let wire = a_session.seal_next(b"ping");
        let opened = b_session.open_received(&wire);
        assert!(opened.is_ok());
    }

    #[tokio::test]
    async fn replayed_sequence_is_dropped_without_error() {
        let (alice, bob) = pair();
        let (a_secret, a_pub) = new_ephemeral();
        let (b_secret, b_pub) = new_ephemeral();
        let a_hs = build_handshake(&alice, &a_pub);
        let b_hs = build_handshake(&bob, &b_pub);

        let a_mgr = SessionManager::new(alice.clone());
        let b_mgr = SessionManager::new(bob.clone());
        let a_session = a_mgr
            .establish(&b_hs, a_secret, Arc::new(Loopback(Mutex::new(Vec::new()))))
            .unwrap();
        let b_session = b_mgr
            .establish(&a_hs, b_secret, Arc::new(Loopback(Mutex::new(Vec::new()))))
            .unwrap();

        let wire1 = a_session.seal_next(b"first");
        let wire2 = a_session.seal_next(b"second");
        assert!(b_session.open_received(&wire1).unwrap().is_some());
        assert!(b_session.open_received(&wire2).unwrap().is_some());
        // Replaying the first frame must be dropped, not erred.
        assert_eq!(b_session.open_received(&wire1).unwrap(), None);
    }

    #[tokio::test]
    async fn backpressure_bound_is_enforced() {
        let (alice, bob) = pair();
        let (a_secret, a_pub) = new_ephemeral();
        let b_hs = build_handshake(&bob, &a_pub);
        let a_mgr = SessionManager::new(alice.clone());

        struct Stalling;
        #[async_trait::async_trait]
        impl SessionTransport for Stalling {
            async fn send_frame(&self, _bytes: &[u8]) -> CoreResult<()> {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
        let session = a_mgr.establish(&b_hs, a_secret, Arc::new(Stalling)).unwrap();
        for _ in 0..OUTBOX_BOUND {
            let _ = session.inbox.try_send(SessionCommand::Send(vec![0], oneshot::channel().0));
        }
        assert!(matches!(
            session.enqueue(b"overflow".to_vec()).await,
            Err(CoreError::BackpressureExceeded)
        ));
    }
}
