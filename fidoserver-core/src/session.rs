//! Outstanding ceremony challenges.
//!
//! The relying party issues a challenge and records a [`PendingSession`] under the
//! challenge's digest. A ceremony consumes that session exactly once, which is what makes
//! a replayed response fail with `ChallengeNotFound`.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

use crate::config::CoreConfig;
use crate::crypto::compute_sha256;
use crate::error::{FidoError, FidoResult};

/// SHA-256 of a challenge, exactly as its text appears in the client data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChallengeDigest(pub [u8; 32]);

impl ChallengeDigest {
    /// Digest the challenge text.
    pub fn of(challenge: &str) -> Self {
        ChallengeDigest(compute_sha256(challenge.as_bytes()))
    }
}

/// What the relying party recorded when it issued a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSession {
    /// The user the challenge was issued to.
    pub username: String,
    /// The user handle.
    pub user_id: String,
    /// The display name, recorded into the registration flags.
    pub display_name: String,
    /// The user icon, if any.
    pub icon: Option<String>,
    /// When the challenge was issued.
    pub created_at: SystemTime,
}

impl PendingSession {
    fn expired(&self, now: SystemTime, ttl: Duration) -> bool {
        // A session stamped in the future has not expired.
        now.duration_since(self.created_at)
            .map(|age| age > ttl)
            .unwrap_or(false)
    }
}

/// Pending sessions keyed by challenge digest. Share it between the code that issues
/// challenges and the orchestrator with an `Arc`.
pub struct ChallengeSessionStore {
    sessions: DashMap<ChallengeDigest, PendingSession>,
    ttl: Duration,
}

impl ChallengeSessionStore {
    /// An empty store whose sessions live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        ChallengeSessionStore {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Record a session. A session already recorded under the same digest is replaced
    /// and returned.
    pub fn put(&self, digest: ChallengeDigest, session: PendingSession) -> Option<PendingSession> {
        self.sessions.insert(digest, session)
    }

    /// Remove and return the session for `digest`. Of any number of concurrent callers
    /// for one digest, at most one receives the session.
    pub fn take(&self, digest: &ChallengeDigest, now: SystemTime) -> FidoResult<PendingSession> {
        let (_, session) = self.sessions.remove(digest).ok_or_else(|| {
            debug!("no pending session for challenge");
            FidoError::ChallengeNotFound
        })?;

        if session.expired(now, self.ttl) {
            debug!(username = %session.username, "pending session has expired");
            return Err(FidoError::ChallengeNotFound);
        }

        Ok(session)
    }

    /// Drop every session older than the ttl. Returns how many were removed.
    pub fn sweep_expired(&self, now: SystemTime) -> usize {
        let ttl = self.ttl;
        let mut removed = 0;
        self.sessions.retain(|_, session| {
            let keep = !session.expired(now, ttl);
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            debug!(removed, "swept expired sessions");
        }
        removed
    }

    /// The number of pending sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Determine if there are no pending sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl From<&CoreConfig> for ChallengeSessionStore {
    fn from(config: &CoreConfig) -> Self {
        ChallengeSessionStore::new(config.session_ttl_duration())
    }
}

impl std::fmt::Debug for ChallengeSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeSessionStore")
            .field("sessions", &self.sessions.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
