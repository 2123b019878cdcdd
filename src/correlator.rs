//! Session correlator for multi-step interactive operations.
//!
//! When an operation needs one more piece of input (a new filename, a
//! password), the dispatcher sends a prompt message and registers a
//! `PendingOperation` keyed by that prompt. An arbitrary later reply is
//! matched back to exactly one pending operation, and only when it replies to
//! the exact prompt *and* comes from the user who started the flow. One keyed
//! table replaces per-request reply listeners, so pending state is bounded
//! and swept.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Identifies one prompt-for-input message: the chat it was sent to plus the
/// message id the transport assigned to it.
///
/// Message ids are only unique within a chat, so the chat is part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken {
    /// Chat the prompt lives in
    pub chat: i64,
    /// Transport message id of the prompt
    pub message: i64,
}

/// Which follow-up input the pending operation is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpKind {
    /// Waiting for a new filename
    Rename,
    /// Waiting for a password to encrypt the archive with
    ArchiveWithPassword,
    /// Waiting for an extraction password (or the "none" sentinel)
    Extract,
}

/// An in-flight operation that has a downloaded file and awaits a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    /// User who started the flow; only their reply may resolve it
    pub owner: i64,
    /// What the follow-up input means
    pub kind: FollowUpKind,
    /// Downloaded input artifact, exclusively owned by this flow
    pub local_path: PathBuf,
    /// When the session was opened, for staleness sweeps
    pub created_at: Instant,
}

/// Why a follow-up did not resolve a session
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// Unknown token, or the session already resolved or expired
    #[error("no pending operation for this prompt")]
    NoSuchSession,
    /// Well-formed reply, but not from the session owner
    #[error("reply is not from the session owner")]
    OwnerMismatch,
}

/// Bounded table of open sessions with exactly-once resolution
pub struct SessionCorrelator {
    sessions: Mutex<HashMap<CorrelationToken, PendingOperation>>,
    timeout: Duration,
}

impl SessionCorrelator {
    /// Create a correlator whose sessions go stale after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Register a new open session under the prompt's token.
    ///
    /// The token comes from the transport (the id of the prompt message just
    /// sent), so it is fresh and unique by construction; at most one session
    /// is ever active per token.
    pub fn open(&self, token: CorrelationToken, owner: i64, kind: FollowUpKind, local_path: PathBuf) {
        let op = PendingOperation {
            owner,
            kind,
            local_path,
            created_at: Instant::now(),
        };
        self.lock().insert(token, op);
    }

    /// Match a reply against the session table.
    ///
    /// On success the session is atomically removed and returned, so two
    /// concurrent replies racing on the same token resolve at most once; the
    /// loser sees `NoSuchSession`. An `OwnerMismatch` leaves the session
    /// open for the real owner.
    ///
    /// # Errors
    ///
    /// `NoSuchSession` if the token is unknown or already terminal,
    /// `OwnerMismatch` if `replier` is not the owner.
    pub fn resolve(
        &self,
        token: CorrelationToken,
        replier: i64,
    ) -> Result<PendingOperation, CorrelationError> {
        let mut sessions = self.lock();
        match sessions.remove(&token) {
            None => Err(CorrelationError::NoSuchSession),
            Some(op) if op.owner != replier => {
                // Put it back: a foreign reply must not consume the session.
                sessions.insert(token, op);
                Err(CorrelationError::OwnerMismatch)
            }
            Some(op) => Ok(op),
        }
    }

    /// Remove and return every open session older than the timeout.
    ///
    /// The caller owns the aftermath: notifying the owner and deleting the
    /// associated artifact.
    pub fn expire_stale(&self, now: Instant) -> Vec<(CorrelationToken, PendingOperation)> {
        let mut sessions = self.lock();
        let stale: Vec<CorrelationToken> = sessions
            .iter()
            .filter(|(_, op)| now.saturating_duration_since(op.created_at) >= self.timeout)
            .map(|(token, _)| *token)
            .collect();
        stale
            .into_iter()
            .filter_map(|token| sessions.remove(&token).map(|op| (token, op)))
            .collect()
    }

    /// Number of currently open sessions
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CorrelationToken, PendingOperation>> {
        // A poisoned lock means a panic while holding it; the table itself
        // is still structurally valid, so keep serving.
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
