//! Premium entitlement store.
//!
//! Maps a Telegram user ID to an absolute expiry timestamp. Every mutation is
//! persisted synchronously as one consistent JSON snapshot (write to a
//! temporary file, then rename) before the call returns, so an acknowledged
//! grant or revoke survives a crash. Expired records are treated as absent by
//! `is_active` but stay on disk until an explicit `revoke` or a new `grant`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Errors from loading or persisting the entitlement table
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading the persisted file failed
    #[error("failed to read entitlement file: {0}")]
    Read(#[source] std::io::Error),
    /// Writing the snapshot failed
    #[error("failed to persist entitlement file: {0}")]
    Persist(#[source] std::io::Error),
    /// The persisted file is not valid JSON of the expected shape
    #[error("entitlement file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// On-disk shape: `{"premium_users": {"<uid>": {"expiry": <epoch secs>}}}`
#[derive(Debug, Default, Serialize, Deserialize)]
struct EntitlementFile {
    premium_users: HashMap<String, EntitlementRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct EntitlementRecord {
    expiry: i64,
}

/// Persistent user → expiry table guarded by a single writer lock.
///
/// All read-modify-write cycles run under the same mutex, so concurrent
/// grants and revokes never interleave partial updates.
pub struct EntitlementStore {
    path: PathBuf,
    table: Mutex<HashMap<i64, i64>>,
}

impl EntitlementStore {
    /// Load the store from `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Read` if the file exists but cannot be read, or
    /// `StoreError::Malformed` if it is not the expected JSON shape.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let table = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: EntitlementFile = serde_json::from_slice(&bytes)?;
                file.premium_users
                    .into_iter()
                    .filter_map(|(uid, rec)| uid.parse::<i64>().ok().map(|id| (id, rec.expiry)))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StoreError::Read(e)),
        };

        info!(path = %path.display(), users = table.len(), "Entitlement store loaded");
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    /// Grant (or extend by overwrite) premium for `duration_secs` from now.
    ///
    /// Returns the new absolute expiry timestamp.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Persist` if the snapshot cannot be written; the
    /// in-memory table is left unchanged in that case.
    pub async fn grant(&self, user_id: i64, duration_secs: i64) -> Result<i64, StoreError> {
        self.grant_at(user_id, duration_secs, now_epoch()).await
    }

    /// Time-parameterized variant of [`Self::grant`] used by tests.
    ///
    /// # Errors
    ///
    /// Same as [`Self::grant`].
    pub async fn grant_at(
        &self,
        user_id: i64,
        duration_secs: i64,
        now: i64,
    ) -> Result<i64, StoreError> {
        let expiry = now.saturating_add(duration_secs.max(0));
        let mut table = self.table.lock().await;
        let previous = table.insert(user_id, expiry);
        if let Err(e) = self.persist(&table).await {
            // Roll back so memory and disk stay consistent.
            match previous {
                Some(old) => table.insert(user_id, old),
                None => table.remove(&user_id),
            };
            return Err(e);
        }
        Ok(expiry)
    }

    /// Remove the record for `user_id`; a no-op if none exists.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Persist` if the snapshot cannot be written.
    pub async fn revoke(&self, user_id: i64) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        let Some(previous) = table.remove(&user_id) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&table).await {
            table.insert(user_id, previous);
            return Err(e);
        }
        Ok(())
    }

    /// True iff a record exists and has not expired.
    pub async fn is_active(&self, user_id: i64) -> bool {
        self.is_active_at(user_id, now_epoch()).await
    }

    /// Time-parameterized variant of [`Self::is_active`] used by tests.
    pub async fn is_active_at(&self, user_id: i64, now: i64) -> bool {
        self.table
            .lock()
            .await
            .get(&user_id)
            .is_some_and(|expiry| *expiry > now)
    }

    /// The stored expiry, even if it already passed.
    ///
    /// Callers distinguish "never granted" (`None`) from "expired"
    /// (`Some` with a past timestamp).
    pub async fn expiry_of(&self, user_id: i64) -> Option<i64> {
        self.table.lock().await.get(&user_id).copied()
    }

    /// Write one consistent snapshot: temp file in the same directory, then
    /// rename over the target.
    async fn persist(&self, table: &HashMap<i64, i64>) -> Result<(), StoreError> {
        let file = EntitlementFile {
            premium_users: table
                .iter()
                .map(|(id, expiry)| (id.to_string(), EntitlementRecord { expiry: *expiry }))
                .collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(StoreError::Persist)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(StoreError::Persist)
    }
}

/// Current wall-clock time as seconds since the Unix epoch.
pub fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fresh_store(dir: &tempfile::TempDir) -> EntitlementStore {
        EntitlementStore::load(dir.path().join("premium.json"))
            .await
            .expect("load empty store")
    }

    #[tokio::test]
    async fn grant_is_active_until_expiry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = fresh_store(&dir).await;

        store.grant_at(7, 60, 1000).await.expect("grant");
        assert!(store.is_active_at(7, 1000).await);
        assert!(store.is_active_at(7, 1059).await);
        // expiry <= now means inactive, without any further mutation
        assert!(!store.is_active_at(7, 1060).await);
        assert!(!store.is_active_at(7, 9999).await);
    }

    #[tokio::test]
    async fn expired_record_is_kept_until_revoked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = fresh_store(&dir).await;

        store.grant_at(7, 60, 1000).await.expect("grant");
        assert!(!store.is_active_at(7, 2000).await);
        // expiry_of still reports the stored timestamp
        assert_eq!(store.expiry_of(7).await, Some(1060));

        store.revoke(7).await.expect("revoke");
        assert_eq!(store.expiry_of(7).await, None);
    }

    #[tokio::test]
    async fn revoke_always_deactivates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = fresh_store(&dir).await;

        assert!(store.revoke(7).await.is_ok(), "revoke of absent is a no-op");

        store.grant_at(7, 1_000_000, 1000).await.expect("grant");
        store.revoke(7).await.expect("revoke");
        assert!(!store.is_active_at(7, 1001).await);
    }

    #[tokio::test]
    async fn grant_overwrites_existing_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = fresh_store(&dir).await;

        store.grant_at(7, 60, 1000).await.expect("first grant");
        store.grant_at(7, 10, 2000).await.expect("second grant");
        assert_eq!(store.expiry_of(7).await, Some(2010));
    }

    #[tokio::test]
    async fn mutations_survive_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("premium.json");

        let store = EntitlementStore::load(&path).await.expect("load");
        store.grant_at(1, 100, 1000).await.expect("grant 1");
        store.grant_at(2, 100, 1000).await.expect("grant 2");
        store.revoke(1).await.expect("revoke 1");
        drop(store);

        let reloaded = EntitlementStore::load(&path).await.expect("reload");
        assert_eq!(reloaded.expiry_of(1).await, None);
        assert_eq!(reloaded.expiry_of(2).await, Some(1100));
    }

    #[tokio::test]
    async fn lifetime_grant_saturates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = fresh_store(&dir).await;

        store.grant_at(7, i64::MAX, 1000).await.expect("grant");
        assert!(store.is_active_at(7, i64::MAX - 1).await);
    }
}
