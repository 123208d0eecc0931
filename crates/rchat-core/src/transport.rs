//! Transport (component E): the iroh QUIC endpoint, ALPN-multiplexed
//! protocol router, and connection-kind tracking. Adapts the connection
//! tracker pattern to iroh 1.0's `Connection`-based `after_handshake` hook.
//!
//! The application-level handshake in `session.rs` rides on top of iroh's
//! own QUIC/TLS handshake: by the time `after_handshake` fires, the remote's
//! `EndpointId` is already authenticated by iroh. We still layer the X25519
//! session handshake because it gives each logical chat session its own
//! fresh key, independent of iroh's connection lifetime (reconnects get a
//! new session key; the long-lived identity key never touches the wire).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use iroh::endpoint::{AfterHandshakeOutcome, Connection, EndpointHooks};
use iroh::protocol::{AcceptError, ProtocolHandler, Router};
use iroh::{Endpoint, EndpointId, SecretKey};
use parking_lot::RwLock;
use crate::crypto::identity::{IdentityKey, PeerId};
use crate::error::{CoreError, CoreResult};
use crate::event::{Event, EventBus};
use crate::session::SessionTransport;

pub const ALPN_MSG: &[u8] = b"/rchat/msg/1";
pub const ALPN_FILE: &[u8] = b"/rchat/file/1";
pub const ALPN_INVITE: &[u8] = b"/rchat/invite/1";

/// Spec §4.4: dial and post-dial handshake timeouts.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(15);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A frame on the wire is length-prefixed (QUIC streams are byte streams,
/// not message-oriented) — a `u32` big-endian length followed by that many
/// bytes, capped at 1 MiB to match the messaging frame ceiling.
const MAX_FRAME_LEN: u32 = 1024 * 1024;

pub async fn write_framed(send: &mut iroh::endpoint::SendStream, bytes: &[u8]) -> CoreResult<()> {
    if bytes.len() as u32 > MAX_FRAME_LEN {
        return Err(CoreError::MalformedFrame("frame exceeds 1 MiB".into()));
    }
    send.write_all(&(bytes.len() as u32).to_be_bytes())
        .await
        .map_err(|e| CoreError::DialFailed(e.to_string()))?;
    send.write_all(bytes)
        .await
        .map_err(|e| CoreError::DialFailed(e.to_string()))?;
    Ok(())
}

pub async fn read_framed(recv: &mut iroh::endpoint::RecvStream) -> CoreResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    recv.read_exact(&mut len_buf)
        .await
        .map_err(|e| CoreError::MalformedFrame(e.to_string()))?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(CoreError::MalformedFrame("frame exceeds 1 MiB".into()));
    }
    let mut buf = vec![0u8; len as usize];
    recv.read_exact(&mut buf)
        .await
        .map_err(|e| CoreError::MalformedFrame(e.to_string()))?;
    Ok(buf)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConnKind {
    Unknown,
    Direct,
    Relay,
}

/// Tracks the connection kind (direct vs. relayed) for every peer the
/// endpoint has completed a handshake with, and emits `PeerConnected` on
/// the event bus as a side effect of the hook firing.
pub struct ConnTracker {
    map: Arc<RwLock<HashMap<PeerId, ConnKind>>>,
    events: EventBus,
}

impl ConnTracker {
    pub fn new(events: EventBus) -> Self {
        Self {
            map: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub fn hook(&self) -> ConnTrackerHook {
        ConnTrackerHook {
            map: self.map.clone(),
            events: self.events.clone(),
        }
    }

    pub fn kind_of(&self, peer: &PeerId) -> ConnKind {
        self.map.read().get(peer).copied().unwrap_or(ConnKind::Unknown)
    }

    pub fn mark_disconnected(&self, peer: &PeerId) {
        self.map.write().remove(peer);
        self.events.emit(Event::PeerDisconnected { peer_id: *peer });
    }
}

#[derive(Debug)]
pub struct ConnTrackerHook {
    map: Arc<RwLock<HashMap<PeerId, ConnKind>>>,
    events: EventBus,
}

impl EndpointHooks for ConnTrackerHook {
    #[allow(clippy::manual_async_fn)]
    fn after_handshake<'a>(
        &'a self,
        conn: &'a Connection,
    ) -> impl std::future::Future<Output = AfterHandshakeOutcome> + Send + 'a {
        async move {
            let peer = PeerId(*conn.remote_id().as_bytes());
            let kind = if conn.paths().into_iter().any(|p| p.is_ip()) {
                ConnKind::Direct
            } else {
                ConnKind::Relay
            };
            self.map.write().insert(peer, kind);
            self.events.emit(Event::PeerConnected { peer_id: peer });
            AfterHandshakeOutcome::accept()
        }
    }
}

/// Binds the iroh endpoint off the node's long-lived Ed25519 identity —
/// iroh's own `SecretKey` is ed25519, so the vault identity *is* the
/// transport identity, with no separate keypair to manage.
pub async fn bind_endpoint(
    identity: &IdentityKey,
    hook: ConnTrackerHook,
) -> CoreResult<Endpoint> {
    let secret_key = SecretKey::from_bytes(&identity.to_bytes());
    Endpoint::builder(iroh::endpoint::presets::N0)
        .secret_key(secret_key)
        .alpns(vec![
            ALPN_MSG.to_vec(),
            ALPN_FILE.to_vec(),
            ALPN_INVITE.to_vec(),
            iroh_gossip::net::GOSSIP_ALPN.to_vec(),
        ])
        .hooks(hook)
        .bind()
        .await
        .map_err(|e| CoreError::DialFailed(e.to_string()))
}

/// Dials a peer's message ALPN with the spec's 15s budget.
pub async fn dial(endpoint: &Endpoint, peer: EndpointId) -> CoreResult<Connection> {
    tokio::time::timeout(DIAL_TIMEOUT, endpoint.connect(peer, ALPN_MSG))
        .await
        .map_err(|_| CoreError::Timeout)?
        .map_err(|e| CoreError::DialFailed(e.to_string()))
}

/// `SessionTransport` over a single iroh QUIC connection: each outgoing
/// frame opens a fresh unidirectional stream, length-prefixed. Simple,
/// and avoids head-of-line blocking between unrelated frames.
pub struct QuicSessionTransport {
    conn: Connection,
}

impl QuicSessionTransport {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

#[async_trait::async_trait]
impl SessionTransport for QuicSessionTransport {
    async fn send_frame(&self, bytes: &[u8]) -> CoreResult<()> {
        let mut send = self
            .conn
            .open_uni()
            .await
            .map_err(|e| CoreError::DialFailed(e.to_string()))?;
        write_framed(&mut send, bytes).await?;
        send.finish().map_err(|e| CoreError::DialFailed(e.to_string()))?;
        Ok(())
    }
}

/// Performs the application-level handshake as the dialing side: sends our
/// own `HandshakeMsg` on a fresh uni stream, waits for the peer's reply on
/// the next accepted uni stream, and establishes the session. Called by
/// `node.rs` right after [`dial`] completes.
pub async fn establish_outbound_session(
    identity: &IdentityKey,
    sessions: &crate::session::SessionManager,
    connection: Connection,
) -> CoreResult<Arc<crate::session::Session>> {
    let (my_secret, my_pub) = crate::session::new_ephemeral();
    let my_handshake = crate::session::build_handshake(identity, &my_pub);

    let mut send = connection
        .open_uni()
        .await
        .map_err(|e| CoreError::DialFailed(e.to_string()))?;
    write_framed(&mut send, &postcard::to_stdvec(&my_handshake)?).await?;
    send.finish().map_err(|e| CoreError::DialFailed(e.to_string()))?;

    let mut recv = tokio::time::timeout(HANDSHAKE_TIMEOUT, connection.accept_uni())
        .await
        .map_err(|_| CoreError::Timeout)?
        .map_err(|e| CoreError::HandshakeFailed(e.to_string()))?;
    let bytes = read_framed(&mut recv).await?;
    let remote_handshake: crate::session::HandshakeMsg = postcard::from_bytes(&bytes)?;

    sessions.establish(
        &remote_handshake,
        my_secret,
        Arc::new(QuicSessionTransport::new(connection)),
    )
}

/// Accepts incoming `/rchat/msg/1` streams. The first stream on a fresh
/// connection always carries the peer's `HandshakeMsg`; every stream after
/// that carries a session-sealed message frame, handed to `Messaging` once
/// decrypted. Registered on the `Router` alongside the file and invite
/// handlers.
#[derive(Clone)]
pub struct MessageProtocolHandler {
    pub identity: Arc<IdentityKey>,
    pub sessions: Arc<crate::session::SessionManager>,
    pub messaging: Arc<crate::messaging::Messaging>,
}

impl std::fmt::Debug for MessageProtocolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageProtocolHandler")
            .field("sessions", &self.sessions)
            .finish()
    }
}

impl ProtocolHandler for MessageProtocolHandler {
    async fn accept(&self, connection: Connection) -> Result<(), AcceptError> {
        let peer = PeerId(*connection.remote_id().as_bytes());

        if self.sessions.get(&peer).is_none() {
            let mut recv = match connection.accept_uni().await {
                Ok(r) => r,
                Err(_) => return Ok(()),
            };
            let Ok(bytes) = read_framed(&mut recv).await else {
                return Ok(());
            };
            let Ok(remote_handshake) = postcard::from_bytes::<crate::session::HandshakeMsg>(&bytes) else {
                return Ok(());
            };
            let (my_secret, my_pub) = crate::session::new_ephemeral();
            let my_handshake = crate::session::build_handshake(&self.identity, &my_pub);
            let mut send = connection
                .open_uni()
                .await
                .map_err(|e| AcceptError::from_err(e))?;
            if write_framed(&mut send, &postcard::to_stdvec(&my_handshake).unwrap_or_default())
                .await
                .is_err()
            {
                return Ok(());
            }
            let _ = send.finish();
            if self
                .sessions
                .establish(&remote_handshake, my_secret, Arc::new(QuicSessionTransport::new(connection.clone())))
                .is_err()
            {
                return Ok(());
            }
        }

        loop {
            let mut recv = match connection.accept_uni().await {
                Ok(r) => r,
                Err(_) => return Ok(()),
            };
            let bytes = match read_framed(&mut recv).await {
                Ok(b) => b,
                Err(_) => continue,
            };
            match self.sessions.receive(&peer, &bytes) {
                Ok(Some(plaintext)) => {
                    let _ = self.messaging.on_frame_received(peer, &plaintext).await;
                }
                Ok(None) | Err(_) => continue,
            }
        }
    }
}

/// Serves `/rchat/file/1` requests: reads a whole file announced earlier
/// over the message protocol and streams it back chunked, content-addressed
/// by `FileHash`. One accepted connection serves exactly one request — the
/// requester opens a fresh connection per download attempt.
#[derive(Clone)]
pub struct FileProtocolHandler {
    pub store: Arc<crate::store::Store>,
}

impl std::fmt::Debug for FileProtocolHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileProtocolHandler").finish()
    }
}

impl ProtocolHandler for FileProtocolHandler {
    async fn accept(&self, connection: Connection) -> Result<(), AcceptError> {
        use crate::file_transfer::{FileFrame, DEFAULT_CHUNK_SIZE};

        let mut recv = match connection.accept_uni().await {
            Ok(r) => r,
            Err(_) => return Ok(()),
        };
        let Ok(bytes) = read_framed(&mut recv).await else {
            return Ok(());
        };
        let Ok(FileFrame::Request { file_hash, offset }) = FileFrame::decode(&bytes) else {
            return Ok(());
        };

        let Ok(Some(file)) = self.store.get_file(&file_hash) else {
            return Ok(());
        };
        let Ok(contents) = std::fs::read(&file.local_path) else {
            return Ok(());
        };

        let mut send = match connection.open_uni().await {
            Ok(s) => s,
            Err(_) => return Ok(()),
        };
        let header = FileFrame::ResponseHeader {
            size: file.size_bytes,
            chunk_size: DEFAULT_CHUNK_SIZE as u32,
        };
        if write_framed(&mut send, &header.encode().unwrap_or_default()).await.is_err() {
            return Ok(());
        }
        for (index, chunk) in contents[offset as usize..].chunks(DEFAULT_CHUNK_SIZE).enumerate() {
            let frame = FileFrame::Chunk {
                index: index as u64,
                bytes: chunk.to_vec(),
            };
            if write_framed(&mut send, &frame.encode().unwrap_or_default()).await.is_err() {
                return Ok(());
            }
        }
        let _ = write_framed(&mut send, &FileFrame::End.encode().unwrap_or_default()).await;
        let _ = send.finish();
        Ok(())
    }
}

/// Client side of the file-transfer protocol: dials `peer` and requests
/// `file_hash`, writing the verified bytes to `dest_path`. Progress and
/// completion are reported through `transfers`.
///
/// Resumable: if a `dest_path.partial` file from a previous attempt
/// already exists, its length becomes the request offset and its content
/// seeds the running hash, so a retry after a dropped connection picks up
/// where it left off instead of re-downloading from zero. On hash
/// mismatch the partial file is moved into `quarantine_dir` rather than
/// left at `dest_path` (or kept around to poison the next resume).
pub async fn request_file_download(
    endpoint: &Endpoint,
    peer: EndpointId,
    transfers: &crate::file_transfer::TransferManager,
    file_hash: crate::crypto::hash::FileHash,
    dest_path: std::path::PathBuf,
    quarantine_dir: &std::path::Path,
) -> CoreResult<std::path::PathBuf> {
    use crate::file_transfer::FileFrame;
    use tokio::io::AsyncWriteExt;

    let peer_id = PeerId(*peer.as_bytes());

    if let Some(parent) = dest_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut partial_path = dest_path.clone();
    partial_path.as_mut_os_string().push(".partial");
    let resumed_prefix = std::fs::read(&partial_path).unwrap_or_default();
    let offset = resumed_prefix.len() as u64;

    let connection = tokio::time::timeout(DIAL_TIMEOUT, endpoint.connect(peer, ALPN_FILE))
        .await
        .map_err(|_| CoreError::Timeout)?
        .map_err(|e| CoreError::DialFailed(e.to_string()))?;

    let mut send = connection
        .open_uni()
        .await
        .map_err(|e| CoreError::DialFailed(e.to_string()))?;
    let request = FileFrame::Request { file_hash, offset };
    write_framed(&mut send, &request.encode()?).await?;
    send.finish().map_err(|e| CoreError::DialFailed(e.to_string()))?;

    let mut recv = tokio::time::timeout(DIAL_TIMEOUT, connection.accept_uni())
        .await
        .map_err(|_| CoreError::Timeout)?
        .map_err(|e| CoreError::DialFailed(e.to_string()))?;

    let mut partial_file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&partial_path)
        .await?;

    loop {
        let bytes = read_framed(&mut recv).await?;
        match FileFrame::decode(&bytes)? {
            FileFrame::ResponseHeader { size, .. } => {
                transfers.begin_request(peer_id, file_hash, size, &resumed_prefix);
            }
            FileFrame::Chunk { bytes, .. } => {
                transfers.on_chunk(peer_id, file_hash, &bytes);
                partial_file.write_all(&bytes).await?;
            }
            FileFrame::End => break,
            FileFrame::Request { .. } => {
                return Err(CoreError::ProtocolViolation("unexpected request on download stream".into()));
            }
        }
    }
    partial_file.flush().await?;
    drop(partial_file);

    transfers.finish(peer_id, file_hash, &partial_path, &dest_path, quarantine_dir)?;
    Ok(dest_path)
}

/// Builds the multiplexed router over one endpoint, wiring the message,
/// gossip, and file-transfer protocols together behind one ALPN-multiplexed
/// QUIC listener.
pub fn build_router(
    endpoint: Endpoint,
    message_handler: MessageProtocolHandler,
    gossip: iroh_gossip::net::Gossip,
    file_handler: FileProtocolHandler,
) -> Router {
    Router::builder(endpoint)
        .accept(ALPN_MSG, message_handler)
        .accept(ALPN_FILE, file_handler)
        .accept(iroh_gossip::net::GOSSIP_ALPN, gossip)
        .spawn()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_tracker_starts_unknown() {
        let tracker = ConnTracker::new(EventBus::new());
        assert_eq!(tracker.kind_of(&PeerId([1; 32])), ConnKind::Unknown);
    }

    #[test]
    fn disconnect_clears_tracked_kind() {
        let tracker = ConnTracker::new(EventBus::new());
        let peer = PeerId([2; 32]);
        tracker.map.write().insert(peer, ConnKind::Direct);
        tracker.mark_disconnected(&peer);
        assert_eq!(tracker.kind_of(&peer), ConnKind::Unknown);
    }
}
