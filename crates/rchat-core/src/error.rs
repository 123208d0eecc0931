//! The typed error taxonomy surfaced across the command dispatcher.
//!
//! Every fallible operation in this crate returns `Result<T, CoreError>`.
//! `anyhow` is deliberately absent here — it's reserved for the CLI binary,
//! which only needs to print and exit, not match on error kind.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    // ── Auth ────────────────────────────────────────────────────────────
    #[error("vault has not been set up")]
    VaultNotSetUp,
    #[error("vault is already set up")]
    VaultAlreadySetUp,
    #[error("vault is locked")]
    VaultLocked,
    #[error("invalid password")]
    InvalidPassword,

    // ── Trust ───────────────────────────────────────────────────────────
    #[error("unknown peer")]
    UnknownPeer,
    #[error("peer is not trusted")]
    NotTrusted,
    #[error("peer identity does not match the expected key")]
    IdentityMismatch,

    // ── Transport ───────────────────────────────────────────────────────
    #[error("no route to peer")]
    NoRoute,
    #[error("dial failed: {0}")]
    DialFailed(String),
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("operation timed out")]
    Timeout,

    // ── Protocol ────────────────────────────────────────────────────────
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("sequence replay detected")]
    SequenceReplay,
    #[error("unsupported protocol version")]
    UnsupportedVersion,

    // ── Resource ────────────────────────────────────────────────────────
    #[error("backpressure exceeded")]
    BackpressureExceeded,
    #[error("storage full")]
    StorageFull,
    #[error("file too large")]
    FileTooLarge,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // ── Store ───────────────────────────────────────────────────────────
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),

    // ── Invite ──────────────────────────────────────────────────────────
    #[error("invite expired")]
    InviteExpired,
    #[error("invite mismatch")]
    InviteMismatch,

    // ── Infrastructure (not part of the spec taxonomy, but every real
    // node needs an escape hatch for the crates it depends on) ─────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(String),
}

impl From<postcard::Error> for CoreError {
    fn from(e: postcard::Error) -> Self {
        CoreError::MalformedFrame(e.to_string())
    }
}
