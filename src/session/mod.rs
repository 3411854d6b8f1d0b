//! Resumable chunked-upload session tracking.
//!
//! The [`ChunkSessionStore`] is the authoritative registry for in-flight
//! chunked uploads. It owns the session lifecycle (`active -> completed` or
//! `active -> aborted`, both terminal), per-part bookkeeping, and time-based
//! expiry. It is backend-agnostic: provider-specific state rides along in
//! `provider_data` as an opaque payload the store copies but never interprets.
//!
//! The registry is guarded by a single `RwLock`; every operation is O(1) map
//! access plus a small-struct clone, and no I/O ever happens under the lock.
//! Expired sessions are purged lazily on access, and [`cleanup_expired`]
//! supports periodic sweeping on top of that.
//!
//! [`cleanup_expired`]: ChunkSessionStore::cleanup_expired

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UploadError};
use crate::provider::Metadata;

/// Maximum parts per session - the S3 multipart limit.
pub const MAX_PARTS: u32 = 10_000;

/// Fallback expiration applied to chunked upload sessions when a custom TTL
/// is not provided.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Injectable clock, fixed in tests for deterministic expiry.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Lifecycle stage of a chunked upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkSessionState {
    /// Chunks may still be uploaded.
    Active,
    /// Set after the finalization step succeeds. Terminal.
    Completed,
    /// Set when the session is canceled by the client or due to errors. Terminal.
    Aborted,
}

/// Metadata for one uploaded chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPart {
    /// Zero-based position within the final object.
    pub index: u32,
    /// Bytes actually written for this part.
    pub size: u64,
    /// Backend-supplied integrity token (empty if unavailable).
    pub checksum: String,
    pub etag: String,
    /// Set by the store at registration time if the backend left it unset.
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl ChunkPart {
    pub fn new(index: u32, size: u64) -> Self {
        Self {
            index,
            size,
            checksum: String::new(),
            etag: String::new(),
            uploaded_at: None,
        }
    }
}

/// Caller-supplied definition for a session about to be registered.
///
/// The store assigns `created_at` from its own clock and defaults
/// `expires_at` to `created_at + ttl` when not provided.
#[derive(Debug, Clone, Default)]
pub struct NewChunkSession {
    pub id: String,
    pub key: String,
    pub total_size: u64,
    pub part_size: u64,
    pub metadata: Metadata,
    pub expires_at: Option<DateTime<Utc>>,
    pub provider_data: HashMap<String, serde_json::Value>,
}

impl NewChunkSession {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            ..Self::default()
        }
    }
}

/// One in-flight resumable upload.
///
/// Values returned by the store are always independent copies; the store's
/// internal record is never aliased to a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkSession {
    pub id: String,
    /// Final destination path/object name.
    pub key: String,
    /// Expected final byte size. Advisory: completion does not cross-check it.
    pub total_size: u64,
    /// Nominal chunk size used by the client. Advisory.
    pub part_size: u64,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: ChunkSessionState,
    /// One part per index; ascending iteration order is what assembly relies on.
    pub uploaded_parts: BTreeMap<u32, ChunkPart>,
    /// Backend-specific state (e.g. a multipart upload id). Opaque here.
    pub provider_data: HashMap<String, serde_json::Value>,
}

/// In-process chunk session registry backed by an `RwLock`d map.
pub struct ChunkSessionStore {
    ttl: chrono::Duration,
    sessions: RwLock<HashMap<String, ChunkSession>>,
    clock: Clock,
}

impl ChunkSessionStore {
    /// Create a store with the provided TTL (or [`DEFAULT_SESSION_TTL`] if zero).
    pub fn new(ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() { DEFAULT_SESSION_TTL } else { ttl };
        Self {
            ttl: chrono::Duration::from_std(ttl)
                .unwrap_or_else(|_| chrono::Duration::seconds(1800)),
            sessions: RwLock::new(HashMap::new()),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock. Used by tests to pin time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Register a new upload session.
    ///
    /// Fails with [`UploadError::SessionExists`] when the id collides with a
    /// live entry; a collision with an already-expired entry replaces it.
    pub fn create(&self, new: NewChunkSession) -> Result<ChunkSession> {
        if new.id.is_empty() {
            return Err(UploadError::validation("id", "cannot be empty"));
        }
        if new.key.is_empty() {
            return Err(UploadError::validation("key", "cannot be empty"));
        }

        let now = self.now();
        let session = ChunkSession {
            id: new.id,
            key: new.key,
            total_size: new.total_size,
            part_size: new.part_size,
            metadata: new.metadata,
            created_at: now,
            expires_at: new.expires_at.unwrap_or(now + self.ttl),
            state: ChunkSessionState::Active,
            uploaded_parts: BTreeMap::new(),
            provider_data: new.provider_data,
        };

        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&session.id) {
            if existing.expires_at > now {
                return Err(UploadError::SessionExists);
            }
            // Expired leftover under the same id: the new session replaces it.
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    /// Return a copy of the session if it exists and has not expired.
    ///
    /// An expired entry is treated as absent and purged on this read path.
    pub fn get(&self, id: &str) -> Option<ChunkSession> {
        let now = self.now();
        {
            let sessions = self.sessions.read();
            match sessions.get(id) {
                None => return None,
                Some(session) if session.expires_at > now => return Some(session.clone()),
                Some(_) => {}
            }
        }

        let mut sessions = self.sessions.write();
        if sessions.get(id).is_some_and(|s| s.expires_at <= now) {
            sessions.remove(id);
        }
        None
    }

    /// Remove a session. Idempotent: removing an absent id is a no-op.
    pub fn delete(&self, id: &str) {
        self.sessions.write().remove(id);
    }

    /// Record an uploaded part for the given session.
    ///
    /// The first caller to register an index wins; a second registration of
    /// the same index fails with [`UploadError::PartDuplicate`] and never
    /// overwrites the recorded part.
    pub fn add_part(&self, id: &str, mut part: ChunkPart) -> Result<ChunkSession> {
        if part.index >= MAX_PARTS {
            return Err(UploadError::PartOutOfRange);
        }

        let now = self.now();
        let mut sessions = self.sessions.write();
        match sessions.entry(id.to_string()) {
            Entry::Vacant(_) => Err(UploadError::SessionNotFound),
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at <= now {
                    entry.remove();
                    return Err(UploadError::SessionNotFound);
                }
                if entry.get().state != ChunkSessionState::Active {
                    return Err(UploadError::SessionClosed);
                }
                if entry.get().uploaded_parts.contains_key(&part.index) {
                    return Err(UploadError::PartDuplicate);
                }
                if part.uploaded_at.is_none() {
                    part.uploaded_at = Some(now);
                }
                let session = entry.get_mut();
                session.uploaded_parts.insert(part.index, part);
                Ok(session.clone())
            }
        }
    }

    /// Transition an active session to `completed`. Does not delete it.
    pub fn mark_completed(&self, id: &str) -> Result<ChunkSession> {
        self.update_state(id, ChunkSessionState::Completed)
    }

    /// Transition an active session to `aborted`. Does not delete it.
    pub fn mark_aborted(&self, id: &str) -> Result<ChunkSession> {
        self.update_state(id, ChunkSessionState::Aborted)
    }

    fn update_state(&self, id: &str, next: ChunkSessionState) -> Result<ChunkSession> {
        let now = self.now();
        let mut sessions = self.sessions.write();
        match sessions.entry(id.to_string()) {
            Entry::Vacant(_) => Err(UploadError::SessionNotFound),
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at <= now {
                    entry.remove();
                    return Err(UploadError::SessionNotFound);
                }
                if entry.get().state != ChunkSessionState::Active {
                    return Err(UploadError::SessionClosed);
                }
                entry.get_mut().state = next;
                Ok(entry.get().clone())
            }
        }
    }

    /// Remove every session whose `expires_at <= now`, regardless of state.
    /// Returns the removed ids.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut sessions = self.sessions.write();
        let removed: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &removed {
            sessions.remove(id);
        }
        removed
    }

    /// Spawn a background task sweeping expired sessions on an interval.
    ///
    /// Lazy per-access eviction already keeps reads correct; the sweeper
    /// bounds memory held by sessions that are never touched again.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = store.cleanup_expired(store.now());
                if !removed.is_empty() {
                    tracing::debug!(count = removed.len(), "swept expired chunk sessions");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for ChunkSessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}
