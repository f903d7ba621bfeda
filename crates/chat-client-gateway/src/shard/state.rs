//! Shard connection state
//!
//! Session-scoped state that survives individual socket connections. The
//! connection handle is replaced on every reconnect; this struct lives
//! for the process duration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;

/// Sequence sentinel meaning "none received yet"
pub const NO_SEQUENCE: i64 = -1;

/// Connection state of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Never connected
    Idle,
    /// Opening the first socket
    Connecting,
    /// Re-opening the socket after a disconnect
    Reconnecting,
    /// Socket open, waiting for HELLO
    Nearly,
    /// IDENTIFY sent, waiting for READY
    Identifying,
    /// RESUME sent, waiting for RESUMED
    Resuming,
    /// READY received, guild availability still streaming in
    WaitingForGuilds,
    /// Fully operational
    Ready,
    /// Socket closed
    Disconnected,
}

impl ConnectionState {
    /// States in which a heartbeat is sent even when the previous one was
    /// not acknowledged (the server defers acks during the handshake)
    #[must_use]
    pub const fn forces_heartbeat(self) -> bool {
        matches!(self, Self::Identifying | Self::Resuming | Self::WaitingForGuilds)
    }
}

/// Session state for one shard
pub struct ShardSession {
    shard_id: u32,
    state: RwLock<ConnectionState>,
    /// Last received sequence number; `NO_SEQUENCE` until the first dispatch
    sequence: AtomicI64,
    /// Sequence snapshot taken when the connection drops, used for RESUME
    close_sequence: AtomicI64,
    session_id: RwLock<Option<String>>,
    resume_url: RwLock<Option<String>>,
    ping_ms: AtomicU64,
    last_heartbeat_acked: AtomicBool,
    /// Guild ids from READY whose GUILD_CREATE is still pending
    expected_guilds: RwLock<HashSet<String>>,
    connected_at: RwLock<Option<Instant>>,
}

impl ShardSession {
    /// Create session state for a shard
    #[must_use]
    pub fn new(shard_id: u32) -> Self {
        Self {
            shard_id,
            state: RwLock::new(ConnectionState::Idle),
            sequence: AtomicI64::new(NO_SEQUENCE),
            close_sequence: AtomicI64::new(NO_SEQUENCE),
            session_id: RwLock::new(None),
            resume_url: RwLock::new(None),
            ping_ms: AtomicU64::new(0),
            last_heartbeat_acked: AtomicBool::new(true),
            expected_guilds: RwLock::new(HashSet::new()),
            connected_at: RwLock::new(None),
        }
    }

    /// Shard identity
    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    /// Get the current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Set the connection state
    pub async fn set_state(&self, state: ConnectionState) {
        let mut guard = self.state.write().await;
        if *guard != state {
            tracing::debug!(shard_id = self.shard_id, ?state, "Shard state changed");
            *guard = state;
        }
    }

    /// Last received sequence number
    pub fn sequence(&self) -> i64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Record a received sequence number (monotonic; stale values ignored)
    pub fn set_sequence(&self, seq: i64) {
        self.sequence.fetch_max(seq, Ordering::SeqCst);
    }

    /// Snapshot the sequence for a later RESUME
    pub fn snapshot_close_sequence(&self) {
        let seq = self.sequence();
        if seq != NO_SEQUENCE {
            self.close_sequence.store(seq, Ordering::SeqCst);
        }
    }

    /// Best sequence to resume from
    pub fn resume_sequence(&self) -> i64 {
        self.sequence()
            .max(self.close_sequence.load(Ordering::SeqCst))
    }

    /// Get the session id, if READY has been seen
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    /// Get the preferred resume gateway URL
    pub async fn resume_url(&self) -> Option<String> {
        self.resume_url.read().await.clone()
    }

    /// Store session identity from READY
    pub async fn set_session(&self, session_id: String, resume_url: Option<String>) {
        *self.session_id.write().await = Some(session_id);
        *self.resume_url.write().await = resume_url;
    }

    /// Check whether a RESUME is possible
    pub async fn can_resume(&self) -> bool {
        self.session_id.read().await.is_some() && self.resume_sequence() >= 0
    }

    /// Forget the session entirely (server rejected resumption)
    pub async fn clear_session(&self) {
        *self.session_id.write().await = None;
        *self.resume_url.write().await = None;
        self.sequence.store(NO_SEQUENCE, Ordering::SeqCst);
        self.close_sequence.store(NO_SEQUENCE, Ordering::SeqCst);
    }

    /// Round-trip latency measured on the last heartbeat ack
    pub fn ping_ms(&self) -> u64 {
        self.ping_ms.load(Ordering::SeqCst)
    }

    /// Record a measured round-trip
    pub fn set_ping_ms(&self, ping: u64) {
        self.ping_ms.store(ping, Ordering::SeqCst);
    }

    /// Whether the last heartbeat was acknowledged
    pub fn last_heartbeat_acked(&self) -> bool {
        self.last_heartbeat_acked.load(Ordering::SeqCst)
    }

    /// Mark a heartbeat as sent, awaiting its ack
    pub fn mark_heartbeat_sent(&self) {
        self.last_heartbeat_acked.store(false, Ordering::SeqCst);
    }

    /// Mark the pending heartbeat as acknowledged
    pub fn ack_heartbeat(&self) {
        self.last_heartbeat_acked.store(true, Ordering::SeqCst);
    }

    /// Replace the set of guilds whose availability is pending
    pub async fn set_expected_guilds(&self, guilds: impl IntoIterator<Item = String>) {
        *self.expected_guilds.write().await = guilds.into_iter().collect();
    }

    /// Remove a guild that arrived; returns true when none remain
    pub async fn guild_arrived(&self, guild_id: &str) -> bool {
        let mut guard = self.expected_guilds.write().await;
        guard.remove(guild_id);
        guard.is_empty()
    }

    /// Take the guilds still pending, leaving the set empty
    pub async fn take_expected_guilds(&self) -> HashSet<String> {
        std::mem::take(&mut *self.expected_guilds.write().await)
    }

    /// Record the moment the socket opened
    pub async fn mark_connected(&self) {
        *self.connected_at.write().await = Some(Instant::now());
        self.last_heartbeat_acked.store(true, Ordering::SeqCst);
    }

    /// Time since the socket opened, if connected
    pub async fn connected_for(&self) -> Option<std::time::Duration> {
        self.connected_at.read().await.map(|at| at.elapsed())
    }
}

impl std::fmt::Debug for ShardSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardSession")
            .field("shard_id", &self.shard_id)
            .field("sequence", &self.sequence())
            .field("ping_ms", &self.ping_ms())
            .finish()
    }
}
