//! Node (component L): the single command-dispatcher handle wiring every
//! subsystem (vault, store, session manager, messaging, file transfer,
//! discovery, pubsub, invitations, transport) behind the surface a UI — or
//! this crate's own CLI — drives.
//!
//! Networking only comes up once the vault is unlocked, since the iroh
//! `Endpoint` is bound off the node's long-lived Ed25519 identity, which
//! the vault only releases after a correct password. `check_auth_status`
//! and the vault commands work locked; everything peer-facing returns
//! `CoreError::VaultLocked` until `go_online` has run.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use iroh::protocol::Router;
use iroh::Endpoint;
use iroh_gossip::net::Gossip;
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use ulid::Ulid;

use crate::config::{AppPaths, Config};
use crate::crypto::hash::FileHash;
use crate::crypto::identity::{IdentityKey, PeerId};
use crate::discovery::mdns::MdnsDiscovery;
use crate::discovery::rendezvous::{PresenceRecord, RendezvousClient};
use crate::error::{CoreError, CoreResult};
use crate::event::{Event, EventBus};
use crate::file_transfer::TransferManager;
use crate::invite::{self, InviteAccept, InviteEngine, InviteOffer};
use crate::messaging::Messaging;
use crate::pubsub::PubSub;
use crate::session::SessionManager;
use crate::store::stickers::MAX_STICKER_BYTES;
use crate::store::theme::{theme_presets, ThemeConfig, ThemePresetInfo};
use crate::store::types::{ChatMessage, ContentType, Envelope, FileObject, FileOrigin, Sticker, TrustedPeer, UserProfile};
use crate::store::Store;
use crate::transport::{self, ConnTracker, FileProtocolHandler, MessageProtocolHandler};
use crate::vault::Vault;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    pub is_setup: bool,
    pub is_unlocked: bool,
    pub is_online: bool,
}

/// Everything that only exists while the node is online. Dropping it tears
/// the endpoint, router, and discovery subsystems down.
struct NetRuntime {
    identity: Arc<IdentityKey>,
    sessions: Arc<SessionManager>,
    messaging: Arc<Messaging>,
    transfers: Arc<TransferManager>,
    invites: Arc<InviteEngine>,
    conn_tracker: Arc<ConnTracker>,
    endpoint: Endpoint,
    router: Router,
    pubsub: PubSub,
    mdns: Option<MdnsDiscovery>,
    rendezvous: Option<RendezvousClient>,
    presence_task: Option<tokio::task::JoinHandle<()>>,
}

pub struct Node {
    paths: AppPaths,
    vault: Arc<Vault>,
    store: Arc<Store>,
    events: EventBus,
    config: SyncMutex<Config>,
    runtime: RwLock<Option<NetRuntime>>,
}

impl Node {
    pub fn new(paths: AppPaths) -> CoreResult<Self> {
        let vault = Arc::new(Vault::open(paths.vault_path()));
        let store = Arc::new(Store::open(paths.store_path())?);
        let config = Config::load(paths.config_path())?;
        Ok(Self {
            paths,
            vault,
            store,
            events: EventBus::new(),
            config: SyncMutex::new(config),
            runtime: RwLock::new(None),
        })
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    // ── Auth & vault ───────────────────────────────────────────────────

    pub async fn check_auth_status(&self) -> AuthStatus {
        let status = self.vault.status();
        let is_online = self.runtime.read().await.is_some();
        AuthStatus {
            is_setup: status.is_setup,
            is_unlocked: status.is_unlocked,
            is_online,
        }
    }

    #[instrument(skip(self, password))]
    pub async fn init_vault(&self, password: &str) -> CoreResult<()> {
        self.vault.setup(password)?;
        if self.config.lock().online_by_default {
            if let Err(e) = self.go_online().await {
                warn!(error = %e, "vault set up but bringing networking online failed");
            }
        }
        self.emit_auth_status().await;
        Ok(())
    }

    #[instrument(skip(self, password))]
    pub async fn unlock_vault(&self, password: &str) -> CoreResult<()> {
        self.vault.unlock(password)?;
        if self.config.lock().online_by_default {
            if let Err(e) = self.go_online().await {
                warn!(error = %e, "vault unlocked but bringing networking online failed");
            }
        }
        self.emit_auth_status().await;
        Ok(())
    }

    /// Destructive: wipes the vault and every identity-dependent row in
    /// the store, and tears down networking first so nothing touches the
    /// identity mid-reset.
    #[instrument(skip(self))]
    pub async fn reset_vault(&self) -> CoreResult<()> {
        self.go_offline().await;
        self.vault.reset()?;
        self.store.wipe_all()?;
        self.emit_auth_status().await;
        Ok(())
    }

    pub fn save_api_token(&self, token: String) -> CoreResult<()> {
        self.vault.set_api_token(token)
    }

    pub async fn toggle_online_status(&self, enabled: bool) -> CoreResult<()> {
        if enabled {
            self.go_online().await?;
        } else {
            self.go_offline().await;
        }
        self.emit_auth_status().await;
        Ok(())
    }

    /// Fast discovery is a local-only concern (mDNS browse interval);
    /// toggling it doesn't need networking to be up yet, so it's recorded
    /// in config and applied the next time `go_online` runs. The running
    /// `mdns-sd` daemon itself has no "faster" knob to reach into, so a
    /// live toggle would require tearing down and restarting discovery —
    /// deferred to the next connect for now.
    pub fn set_fast_discovery(&self, enabled: bool) -> CoreResult<()> {
        let mut config = self.config.lock();
        config.fast_discovery = enabled;
        config.save(self.paths.config_path())
    }

    async fn emit_auth_status(&self) {
        let status = self.check_auth_status().await;
        self.events.emit(Event::AuthStatus {
            is_setup: status.is_setup,
            is_unlocked: status.is_unlocked,
            is_online: status.is_online,
        });
    }

    async fn go_online(&self) -> CoreResult<()> {
        if self.runtime.read().await.is_some() {
            return Ok(());
        }
        let identity = self.vault.identity()?;
        let sessions = Arc::new(SessionManager::new(identity.clone()));
        let messaging = Arc::new(Messaging::new(
            self.store.clone(),
            self.events.clone(),
            sessions.clone(),
            identity.peer_id(),
        ));
        let transfers = Arc::new(TransferManager::new(self.events.clone()));
        let invites = Arc::new(InviteEngine::new());
        let conn_tracker = Arc::new(ConnTracker::new(self.events.clone()));
        let endpoint = transport::bind_endpoint(&identity, conn_tracker.hook()).await?;

        let gossip = Gossip::builder().spawn(endpoint.clone());
        let pubsub = PubSub::new(gossip.clone(), identity.clone());

        let message_handler = MessageProtocolHandler {
            identity: identity.clone(),
            sessions: sessions.clone(),
            messaging: messaging.clone(),
        };
        let file_handler = FileProtocolHandler {
            store: self.store.clone(),
        };
        let router = transport::build_router(endpoint.clone(), message_handler, gossip, file_handler);

        let rendezvous = self.config.lock().rendezvous_url.clone().map(RendezvousClient::new);
        let mdns = match MdnsDiscovery::start(identity.peer_id(), 0, self.events.clone()) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(error = %e, "mDNS discovery failed to start, continuing without it");
                None
            }
        };

        let presence_task = rendezvous.clone().map(|client| {
            tokio::spawn(presence_loop(client, identity.clone(), self.store.clone()))
        });

        info!(peer_id = %identity.peer_id(), "node online");
        *self.runtime.write().await = Some(NetRuntime {
            identity,
            sessions,
            messaging,
            transfers,
            invites,
            conn_tracker,
            endpoint,
            router,
            pubsub,
            mdns,
            rendezvous,
            presence_task,
        });
        Ok(())
    }

    async fn go_offline(&self) {
        if let Some(runtime) = self.runtime.write().await.take() {
            if let Some(task) = &runtime.presence_task {
                task.abort();
            }
            if let Some(mdns) = &runtime.mdns {
                let _ = mdns.stop();
            }
            let _ = runtime.router.shutdown().await;
            runtime.endpoint.close().await;
            info!("node offline");
        }
    }

    // ── Profile ─────────────────────────────────────────────────────────

    pub fn get_user_profile(&self) -> CoreResult<UserProfile> {
        self.store.get_user_profile()
    }

    pub fn update_user_profile(&self, alias: Option<&str>, avatar_ref: Option<&str>) -> CoreResult<()> {
        self.store.update_user_profile(alias, avatar_ref)
    }

    // ── Trusted peers ───────────────────────────────────────────────────

    pub fn get_trusted_peers(&self) -> CoreResult<Vec<TrustedPeer>> {
        self.store.get_trusted_peers()
    }

    pub async fn delete_peer(&self, peer_id: PeerId) -> CoreResult<()> {
        self.store.delete_peer(&peer_id)?;
        if let Some(runtime) = self.runtime.read().await.as_ref() {
            runtime.sessions.close(&peer_id).await;
            runtime.conn_tracker.mark_disconnected(&peer_id);
        }
        Ok(())
    }

    pub fn get_pinned_peers(&self) -> CoreResult<Vec<PeerId>> {
        self.store.get_pinned_peers()
    }

    pub fn set_peer_pinned(&self, peer_id: PeerId, pinned: bool) -> CoreResult<()> {
        self.store.set_peer_pinned(&peer_id, pinned)
    }

    // ── Envelopes & chat assignment ─────────────────────────────────────

    pub fn get_envelopes(&self) -> CoreResult<Vec<Envelope>> {
        self.store.get_envelopes()
    }

    pub fn create_envelope(&self, id: &str, name: &str, icon: &str) -> CoreResult<()> {
        self.store.create_envelope(id, name, icon, now())
    }

    pub fn update_envelope(&self, id: &str, name: &str, icon: &str) -> CoreResult<()> {
        self.store.update_envelope(id, name, icon)
    }

    pub fn delete_envelope(&self, id: &str) -> CoreResult<()> {
        self.store.delete_envelope(id)
    }

    pub fn get_chat_assignments(&self) -> CoreResult<Vec<(PeerId, Option<String>)>> {
        self.store.get_chat_assignments()
    }

    pub fn move_chat_to_envelope(&self, peer_id: PeerId, envelope_id: Option<&str>) -> CoreResult<()> {
        self.store.move_chat_to_envelope(&peer_id, envelope_id)
    }

    // ── Chat history & messaging ────────────────────────────────────────

    pub fn get_chat_latest_times(&self) -> CoreResult<std::collections::HashMap<String, i64>> {
        self.store.get_chat_latest_times()
    }

    pub fn get_chat_history(&self, chat_id: &str) -> CoreResult<Vec<ChatMessage>> {
        self.store.get_chat_history(chat_id)
    }

    pub async fn send_message(&self, peer_id: PeerId, message: &str) -> CoreResult<String> {
        let runtime = self.runtime.read().await;
        let runtime = runtime.as_ref().ok_or(CoreError::VaultLocked)?;
        runtime.messaging.send_message(peer_id, message).await
    }

    /// Never leaves the node, so unlike every other send path this doesn't
    /// need networking up — only the identity, to stamp `sender_peer_id`.
    pub fn send_message_to_self(&self, message: &str) -> CoreResult<String> {
        let sender_peer_id = self.vault.identity()?.peer_id();
        let msg_id = Ulid::new().to_string();
        let msg = ChatMessage {
            msg_id: msg_id.clone(),
            chat_id: "self".to_string(),
            direction: crate::store::types::Direction::Out,
            sender_peer_id,
            content_type: ContentType::Text,
            text: Some(message.to_string()),
            file_hash: None,
            file_name: None,
            created_at: now(),
            status: crate::store::types::MessageStatus::Read,
        };
        self.store.insert_message(&msg)?;
        Ok(msg_id)
    }

    pub async fn mark_messages_read(&self, chat_id: &str) -> CoreResult<()> {
        let runtime = self.runtime.read().await;
        let runtime = runtime.as_ref().ok_or(CoreError::VaultLocked)?;
        runtime.messaging.mark_messages_read(chat_id).await
    }

    /// `request_connection(peer_id)`: dials a known, trusted peer directly
    /// (bypassing discovery) and performs the application handshake.
    pub async fn request_connection(&self, peer_id: PeerId) -> CoreResult<()> {
        let runtime = self.runtime.read().await;
        let runtime = runtime.as_ref().ok_or(CoreError::VaultLocked)?;
        let endpoint_id = peer_id.to_endpoint_id().ok_or(CoreError::UnknownPeer)?;
        let connection = transport::dial(&runtime.endpoint, endpoint_id).await?;
        transport::establish_outbound_session(&runtime.identity, &runtime.sessions, connection).await?;
        runtime.messaging.flush_pending_for_peer(&peer_id).await?;
        Ok(())
    }

    // ── File / image / document / video transfer ────────────────────────

    /// Shared by `send_image`/`send_document`/`send_video`: copies the
    /// bytes into the content store under their hash, announces them to
    /// the peer, and returns the assigned `msg_id`.
    async fn send_file_bytes(
        &self,
        peer_id: PeerId,
        content_type: ContentType,
        bytes: &[u8],
        mime_hint: &str,
        file_name: &str,
    ) -> CoreResult<String> {
        let runtime = self.runtime.read().await;
        let runtime = runtime.as_ref().ok_or(CoreError::VaultLocked)?;
        let hash = FileHash::of(bytes);
        let local_path = self.paths.files_dir().join(hash.prefix()).join(hash.to_hex());
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&local_path, bytes)?;
        self.store.upsert_file(&FileObject {
            hash,
            size_bytes: bytes.len() as u64,
            mime_hint: mime_hint.to_string(),
            local_path: local_path.to_string_lossy().into_owned(),
            first_seen: now(),
            origin: FileOrigin::SelfOrigin,
        })?;
        runtime.transfers.mark_sharing(peer_id, hash);
        runtime
            .messaging
            .send_file(peer_id, content_type, hash, bytes.len() as u64, mime_hint, file_name)
            .await
    }

    pub async fn send_image(&self, peer_id: PeerId, bytes: &[u8], file_name: &str) -> CoreResult<String> {
        self.send_file_bytes(peer_id, ContentType::Image, bytes, "image", file_name).await
    }

    pub async fn send_document(&self, peer_id: PeerId, bytes: &[u8], file_name: &str) -> CoreResult<String> {
        self.send_file_bytes(peer_id, ContentType::Document, bytes, "document", file_name).await
    }

    pub async fn send_video(&self, peer_id: PeerId, bytes: &[u8], file_name: &str) -> CoreResult<String> {
        self.send_file_bytes(peer_id, ContentType::Video, bytes, "video", file_name).await
    }

    /// Pulls a previously announced file from `peer_id` into the local
    /// content store. Coalesced: a second call for the same `(peer, hash)`
    /// while one is already in flight is a no-op.
    pub async fn download_file(&self, peer_id: PeerId, file_hash: FileHash) -> CoreResult<()> {
        let runtime = self.runtime.read().await;
        let runtime = runtime.as_ref().ok_or(CoreError::VaultLocked)?;
        let endpoint_id = peer_id.to_endpoint_id().ok_or(CoreError::UnknownPeer)?;
        let dest = self.paths.files_dir().join(file_hash.prefix()).join(file_hash.to_hex());
        let path = transport::request_file_download(
            &runtime.endpoint,
            endpoint_id,
            &runtime.transfers,
            file_hash,
            dest,
            &self.paths.quarantine_dir(),
        )
        .await?;
        self.store.upsert_file(&FileObject {
            hash: file_hash,
            size_bytes: std::fs::metadata(&path)?.len(),
            mime_hint: String::new(),
            local_path: path.to_string_lossy().into_owned(),
            first_seen: now(),
            origin: FileOrigin::Peer(peer_id),
        })?;
        Ok(())
    }

    // ── Stickers ─────────────────────────────────────────────────────────

    pub fn get_stickers(&self) -> CoreResult<Vec<Sticker>> {
        self.store.get_stickers()
    }

    pub fn add_sticker(&self, webp_bytes: &[u8], name: &str) -> CoreResult<FileHash> {
        if webp_bytes.len() as u64 > MAX_STICKER_BYTES {
            return Err(CoreError::FileTooLarge);
        }
        if !crate::store::stickers::is_webp(webp_bytes) {
            return Err(CoreError::InvalidInput("sticker is not a WebP file".into()));
        }
        let hash = FileHash::of(webp_bytes);
        let path = self.paths.stickers_dir().join(hash.to_hex());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, webp_bytes)?;
        self.store.add_sticker(hash, name, now(), webp_bytes.len() as u64)?;
        Ok(hash)
    }

    pub fn delete_sticker(&self, file_hash: FileHash) -> CoreResult<()> {
        let path = self.paths.stickers_dir().join(file_hash.to_hex());
        self.store.delete_sticker(&file_hash)?;
        let _ = std::fs::remove_file(path);
        Ok(())
    }

    pub fn get_sticker_data(&self, file_hash: FileHash) -> CoreResult<Vec<u8>> {
        let path = self.paths.stickers_dir().join(file_hash.to_hex());
        std::fs::read(path).map_err(|_| CoreError::NotFound)
    }

    // ── Invitations ──────────────────────────────────────────────────────

    pub fn generate_invite_password(&self) -> String {
        invite::generate_invite_password()
    }

    /// `create_invite(invitee, password)`: publishes the AEAD-sealed offer
    /// on the password-derived offer topic and waits (up to the invite
    /// TTL) for a signed `InviteAccept` published back on the same topic.
    /// On success, the invitee becomes a trusted peer.
    #[instrument(skip(self, password))]
    pub async fn create_invite(&self, invitee_handle: &str, password: &str) -> CoreResult<()> {
        let runtime = self.runtime.read().await;
        let runtime = runtime.as_ref().ok_or(CoreError::VaultLocked)?;
        runtime.invites.begin(invitee_handle);
        let my_addrs = vec![runtime.identity.peer_id().to_hex()];
        let sealed_offer = runtime
            .invites
            .create_offer(invitee_handle, password, runtime.identity.peer_id(), my_addrs)?;

        let topic_name = invite::invite_offer_topic(password);
        let mut topic = runtime.pubsub.join(&topic_name, vec![]).await?;
        topic.publish(sealed_offer).await?;

        let deadline = tokio::time::Instant::now() + invite::INVITE_TTL;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(CoreError::InviteExpired);
            }
            let Some((author, payload)) = tokio::time::timeout(remaining, topic.recv_verified())
                .await
                .ok()
                .flatten()
            else {
                return Err(CoreError::InviteExpired);
            };
            let Ok(accept) = InviteEngine::open_accept(password, &payload) else {
                continue;
            };
            if accept.invitee_peer_id != author {
                // Claimed identity doesn't match the pubsub message's
                // authenticated author — reject and keep waiting.
                continue;
            }
            runtime.invites.mark_redeemed(invitee_handle)?;
            self.store.insert_trusted_peer(author, invitee_handle, now())?;
            return Ok(());
        }
    }

    /// `redeem_and_connect(inviter_handle, password)`: joins the same
    /// offer topic, waits for the inviter's sealed offer, publishes back a
    /// signed accept, then dials and handshakes with the now-known peer.
    #[instrument(skip(self, password))]
    pub async fn redeem_and_connect(&self, inviter_handle: &str, password: &str) -> CoreResult<PeerId> {
        let runtime = self.runtime.read().await;
        let runtime = runtime.as_ref().ok_or(CoreError::VaultLocked)?;

        let topic_name = invite::invite_offer_topic(password);
        let mut topic = runtime.pubsub.join(&topic_name, vec![]).await?;

        let deadline = tokio::time::Instant::now() + invite::INVITE_TTL;
        let offer: InviteOffer = loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(CoreError::InviteExpired);
            }
            let Some((_author, payload)) = tokio::time::timeout(remaining, topic.recv_verified())
                .await
                .ok()
                .flatten()
            else {
                return Err(CoreError::InviteExpired);
            };
            if let Ok(offer) = InviteEngine::open_offer(password, &payload) {
                break offer;
            }
        };

        let accept = InviteAccept {
            invitee_peer_id: runtime.identity.peer_id(),
            fresh_nonce: rand::random(),
        };
        let sealed_accept = InviteEngine::seal_accept(password, &accept)?;
        topic.publish(sealed_accept).await?;

        self.store
            .insert_trusted_peer(offer.inviter_peer_id, inviter_handle, now())?;
        let endpoint_id = offer
            .inviter_peer_id
            .to_endpoint_id()
            .ok_or(CoreError::UnknownPeer)?;
        let connection = transport::dial(&runtime.endpoint, endpoint_id).await?;
        transport::establish_outbound_session(&runtime.identity, &runtime.sessions, connection).await?;
        Ok(offer.inviter_peer_id)
    }

    /// Publishes (or re-publishes) this node's current reachability to the
    /// internet rendezvous directory, if one is configured. A no-op if
    /// `rendezvous_url` was never set.
    pub async fn publish_presence(&self) -> CoreResult<()> {
        let runtime = self.runtime.read().await;
        let runtime = runtime.as_ref().ok_or(CoreError::VaultLocked)?;
        let Some(client) = &runtime.rendezvous else {
            return Ok(());
        };
        let record = PresenceRecord::sign(&runtime.identity, vec![runtime.identity.peer_id().to_hex()])?;
        client.publish(&record).await
    }

    // ── Theme ─────────────────────────────────────────────────────────────

    pub fn get_theme(&self) -> CoreResult<ThemeConfig> {
        self.store.get_theme()
    }

    pub fn update_theme(&self, theme: &ThemeConfig) -> CoreResult<()> {
        self.store.update_theme(theme)
    }

    pub fn list_theme_presets(&self) -> Vec<ThemePresetInfo> {
        theme_presets()
    }

    pub fn apply_preset(&self, name: &str) -> CoreResult<ThemeConfig> {
        self.store.apply_preset(name)
    }

    pub fn get_selected_preset(&self) -> CoreResult<Option<String>> {
        self.store.get_selected_preset()
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Background task spawned by `go_online` while a rendezvous directory is
/// configured: republishes this node's own presence record on
/// `MIN_PUBLISH_INTERVAL`, and on the same cadence polls the directory for
/// every trusted peer's record so an off-LAN peer's reachability is picked
/// up without the user manually reconnecting.
async fn presence_loop(client: RendezvousClient, identity: Arc<IdentityKey>, store: Arc<Store>) {
    let mut ticker = tokio::time::interval(crate::discovery::rendezvous::MIN_PUBLISH_INTERVAL);
    loop {
        ticker.tick().await;
        match PresenceRecord::sign(&identity, vec![identity.peer_id().to_hex()]) {
            Ok(record) => {
                if let Err(e) = client.publish(&record).await {
                    warn!(error = %e, "failed to publish presence record");
                }
            }
            Err(e) => warn!(error = %e, "failed to sign presence record"),
        }

        let peers = match store.get_trusted_peers() {
            Ok(peers) => peers,
            Err(e) => {
                warn!(error = %e, "failed to list trusted peers for presence poll");
                continue;
            }
        };
        for peer in peers {
            match client.poll(&peer.peer_id).await {
                Ok(Some(record)) if record.verify().is_ok() => {
                    info!(peer_id = %peer.peer_id, "rendezvous: fresh presence record for trusted peer");
                }
                Ok(_) => {}
                Err(e) => warn!(peer_id = %peer.peer_id, error = %e, "rendezvous poll failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn node_at(dir: &std::path::Path) -> Node {
        Node::new(AppPaths::at(dir)).unwrap()
    }

    #[tokio::test]
    async fn fresh_node_is_not_setup() {
        let dir = tempdir().unwrap();
        let node = node_at(dir.path());
        let status = node.check_auth_status().await;
        assert!(!status.is_setup);
        assert!(!status.is_unlocked);
    }

    #[tokio::test]
    async fn init_vault_unlocks_without_networking() {
        let dir = tempdir().unwrap();
        let node = node_at(dir.path());
        node.config.lock().online_by_default = false;
        node.init_vault("correcthorse").await.unwrap();
        let status = node.check_auth_status().await;
        assert!(status.is_setup);
        assert!(status.is_unlocked);
        assert!(!status.is_online);
    }

    #[tokio::test]
    async fn self_message_works_while_offline() {
        let dir = tempdir().unwrap();
        let node = node_at(dir.path());
        node.config.lock().online_by_default = false;
        node.init_vault("correcthorse").await.unwrap();
        let msg_id = node.send_message_to_self("hi me").unwrap();
        let history = node.get_chat_history("self").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].msg_id, msg_id);
    }

    #[tokio::test]
    async fn send_to_peer_without_network_is_locked() {
        let dir = tempdir().unwrap();
        let node = node_at(dir.path());
        node.config.lock().online_by_default = false;
        node.init_vault("correcthorse").await.unwrap();
        let result = node.send_message(PeerId([1; 32]), "hello").await;
        assert!(matches!(result, Err(CoreError::VaultLocked)));
    }

    #[tokio::test]
    async fn envelope_and_peer_bookkeeping_roundtrips() {
        let dir = tempdir().unwrap();
        let node = node_at(dir.path());
        node.create_envelope("work", "Work", "briefcase").unwrap();
        let peer = PeerId([7; 32]);
        node.store.insert_trusted_peer(peer, "bob", now()).unwrap();
        node.move_chat_to_envelope(peer, Some("work")).unwrap();
        let assignments = node.get_chat_assignments().unwrap();
        assert!(assignments.contains(&(peer, Some("work".to_string()))));
        node.set_peer_pinned(peer, true).unwrap();
        assert_eq!(node.get_pinned_peers().unwrap(), vec![peer]);
    }
}
