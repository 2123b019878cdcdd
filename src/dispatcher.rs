//! Action dispatcher: drives one file operation from arrival to cleanup.
//!
//! Every flow owns a fresh temporary directory under the work dir. For
//! stateless operations the directory lives for the duration of one call;
//! for operations awaiting a follow-up it is kept alive inside the pending
//! session and reclaimed on resolution or expiry. No artifact survives its
//! flow, whichever way the flow ends.

use crate::channel::{Channel, MessageRef};
use crate::config;
use crate::correlator::{
    CorrelationError, CorrelationToken, FollowUpKind, PendingOperation, SessionCorrelator,
};
use crate::entitlements::EntitlementStore;
use crate::ops::{archive, extract, transcode, ExecutorError};
use crate::utils::sanitize_file_name;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Everything the operation menu can offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Ask for a new filename, then deliver the renamed file
    Rename,
    /// Zip immediately
    Zip,
    /// Ask for a password, then deliver an encrypted zip
    ZipWithPassword,
    /// Ask for a password (or "0"), then extract
    Unzip,
    /// Compress a video immediately
    Compress,
}

impl Operation {
    /// Short code used inside callback payloads
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Rename => "rename",
            Self::Zip => "zip",
            Self::ZipWithPassword => "zippass",
            Self::Unzip => "unzip",
            Self::Compress => "vcompress",
        }
    }

    /// Inverse of [`Self::code`]
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "rename" => Some(Self::Rename),
            "zip" => Some(Self::Zip),
            "zippass" => Some(Self::ZipWithPassword),
            "unzip" => Some(Self::Unzip),
            "vcompress" => Some(Self::Compress),
            _ => None,
        }
    }
}

/// A file offered to a user, operation not yet chosen.
///
/// Lives only in process memory, keyed by a short id embedded in the menu,
/// and is consumed by the first selection.
#[derive(Debug, Clone)]
pub struct PendingSelection {
    owner: i64,
    file_ref: String,
    file_name: String,
    created_at: Instant,
}

/// Dispatcher-level failures the transport layer reacts to
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The user holds no active entitlement
    #[error("no active premium entitlement")]
    NotEntitled,
    /// The menu was already consumed, expired, or belongs to someone else
    #[error("this menu is no longer available")]
    StaleSelection,
    /// The status message could not even be sent
    #[error("channel delivery failed: {0}")]
    Delivery(#[from] anyhow::Error),
}

/// Removes a flow's artifact directory on every exit path.
struct FlowDir(PathBuf);

impl Drop for FlowDir {
    fn drop(&mut self) {
        remove_dir_quiet(&self.0);
    }
}

fn remove_dir_quiet(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), error = %e, "Failed to remove flow directory");
        }
    }
}

/// Drives operation lifecycles against the entitlement store, the session
/// correlator and the filesystem.
pub struct Dispatcher {
    store: Arc<EntitlementStore>,
    correlator: Arc<SessionCorrelator>,
    selections: Mutex<HashMap<u64, PendingSelection>>,
    next_selection: AtomicU64,
    work_dir: PathBuf,
    ffmpeg_path: String,
}

impl Dispatcher {
    /// Create a dispatcher writing its artifacts under `work_dir`.
    pub fn new(
        store: Arc<EntitlementStore>,
        correlator: Arc<SessionCorrelator>,
        work_dir: PathBuf,
        ffmpeg_path: String,
    ) -> Self {
        Self {
            store,
            correlator,
            selections: Mutex::new(HashMap::new()),
            next_selection: AtomicU64::new(1),
            work_dir,
            ffmpeg_path,
        }
    }

    /// A file arrived: gate on entitlement and register the selection.
    ///
    /// Returns the selection id the menu buttons carry.
    ///
    /// # Errors
    ///
    /// `NotEntitled` if the sender holds no active entitlement.
    pub async fn on_file_received(
        &self,
        owner: i64,
        file_ref: String,
        file_name: String,
    ) -> Result<u64, DispatchError> {
        if !self.store.is_active(owner).await {
            return Err(DispatchError::NotEntitled);
        }

        let id = self.next_selection.fetch_add(1, Ordering::Relaxed);
        self.selections_lock().insert(
            id,
            PendingSelection {
                owner,
                file_ref,
                file_name,
                created_at: Instant::now(),
            },
        );
        info!(owner, selection = id, "Registered pending selection");
        Ok(id)
    }

    /// The user picked an operation from the menu.
    ///
    /// Re-checks entitlement (it may have lapsed since upload), downloads
    /// the file with progress reporting, then either runs a stateless
    /// executor or opens a follow-up session. Executor and delivery
    /// failures are converted to user-facing messages here and do not
    /// propagate.
    ///
    /// # Errors
    ///
    /// `NotEntitled` or `StaleSelection` for the transport to answer with a
    /// toast; `Delivery` if not even the status message could be sent.
    pub async fn on_action_chosen(
        &self,
        ch: &dyn Channel,
        owner: i64,
        selection_id: u64,
        op: Operation,
    ) -> Result<(), DispatchError> {
        let selection = self.take_selection(selection_id, owner)?;
        if !self.store.is_active(owner).await {
            return Err(DispatchError::NotEntitled);
        }

        let status = ch.send_text("📥 Downloading…").await?;

        let flow = match tempfile::Builder::new()
            .prefix("flow-")
            .tempdir_in(&self.work_dir)
        {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "Failed to create flow directory");
                let _ = ch.edit_text(status, "❌ Internal storage error.").await;
                return Ok(());
            }
        };

        let local = flow
            .path()
            .join(sanitize_file_name(&selection.file_name, "file"));
        if let Err(e) = ch
            .download_to_local(&selection.file_ref, &local, status)
            .await
        {
            warn!(owner, error = %e, "Download failed");
            let _ = ch.edit_text(status, "❌ Download failed, try again.").await;
            return Ok(());
        }

        match op {
            Operation::Zip => self.finish_zip(ch, status, &local).await,
            Operation::Compress => self.finish_compress(ch, status, &local).await,
            Operation::Rename | Operation::ZipWithPassword | Operation::Unzip => {
                self.open_follow_up(ch, owner, op, flow, local, status).await;
            }
        }
        Ok(())
    }

    /// A reply arrived that may answer a pending prompt.
    ///
    /// # Errors
    ///
    /// `NoSuchSession` / `OwnerMismatch` when the reply does not correlate;
    /// callers drop both silently since the reply may simply be unrelated
    /// conversation.
    pub async fn on_follow_up(
        &self,
        ch: &dyn Channel,
        token: CorrelationToken,
        replier: i64,
        payload: &str,
    ) -> Result<(), CorrelationError> {
        let op = self.correlator.resolve(token, replier)?;
        info!(owner = op.owner, kind = ?op.kind, "Resolved pending operation");

        // The artifact directory dies with this flow, success or not.
        let _guard = op.local_path.parent().map(|p| FlowDir(p.to_path_buf()));

        match op.kind {
            FollowUpKind::Rename => self.finish_rename(ch, &op.local_path, payload).await,
            FollowUpKind::ArchiveWithPassword => {
                self.finish_encrypted_zip(ch, &op.local_path, payload).await;
            }
            FollowUpKind::Extract => self.finish_extract(ch, &op.local_path, payload).await,
        }
        Ok(())
    }

    /// Reclaim stale sessions and selections.
    ///
    /// Artifact directories of expired sessions are removed here; the
    /// returned list lets the transport layer notify the owners.
    pub fn reclaim_stale(&self) -> Vec<(CorrelationToken, PendingOperation)> {
        let now = Instant::now();

        let selection_timeout = Duration::from_secs(config::SELECTION_TIMEOUT_SECS);
        self.selections_lock()
            .retain(|_, s| now.saturating_duration_since(s.created_at) < selection_timeout);

        let expired = self.correlator.expire_stale(now);
        for (token, op) in &expired {
            info!(owner = op.owner, chat = token.chat, "Abandoning stale session");
            if let Some(dir) = op.local_path.parent() {
                remove_dir_quiet(dir);
            }
        }
        expired
    }

    fn take_selection(&self, id: u64, owner: i64) -> Result<PendingSelection, DispatchError> {
        let mut selections = self.selections_lock();
        match selections.remove(&id) {
            Some(s) if s.owner == owner => Ok(s),
            // A foreign click must not consume someone else's selection.
            Some(s) => {
                selections.insert(id, s);
                Err(DispatchError::StaleSelection)
            }
            None => Err(DispatchError::StaleSelection),
        }
    }

    async fn finish_zip(&self, ch: &dyn Channel, status: MessageRef, local: &Path) {
        match archive::create_zip(local, parent_of(local)) {
            Ok(out) => {
                deliver_document(ch, &out, "🗜 ZIP Ready").await;
                let _ = ch.edit_text(status, "🌟 Task completed.").await;
            }
            Err(e) => {
                let _ = ch
                    .edit_text(status, &format!("❌ Failed to create zip: {e}"))
                    .await;
            }
        }
    }

    async fn finish_compress(&self, ch: &dyn Channel, status: MessageRef, local: &Path) {
        let _ = ch
            .edit_text(status, "🎥 Compressing video (this may take time)…")
            .await;
        match transcode::compress_video(&self.ffmpeg_path, local, config::VIDEO_BITRATE).await {
            Ok(out) => {
                if let Err(e) = ch.reply_media(&out, "✨ Video Compressed").await {
                    warn!(error = %e, "Result delivery failed");
                }
                let _ = ch.edit_text(status, "🌟 Task completed.").await;
            }
            Err(e) => {
                let _ = ch
                    .edit_text(status, &format!("❌ Video compress failed: {e}"))
                    .await;
            }
        }
    }

    async fn open_follow_up(
        &self,
        ch: &dyn Channel,
        owner: i64,
        op: Operation,
        flow: tempfile::TempDir,
        local: PathBuf,
        status: MessageRef,
    ) {
        let (kind, prompt) = match op {
            Operation::Rename => (
                FollowUpKind::Rename,
                "✏️ Send new filename (reply to this message):",
            ),
            Operation::ZipWithPassword => (
                FollowUpKind::ArchiveWithPassword,
                "🔑 Send password for zip (reply to this message):",
            ),
            _ => (
                FollowUpKind::Extract,
                "🔑 Send password (reply with '0' if none):",
            ),
        };

        // The prompt is the edited status message, so its id is the
        // correlation token a reply will carry.
        if let Err(e) = ch.edit_text(status, prompt).await {
            warn!(owner, error = %e, "Prompt delivery failed, abandoning flow");
            return; // flow drops here and takes the artifact with it
        }

        let token = CorrelationToken {
            chat: ch.chat_key(),
            message: status.0,
        };
        // The directory now belongs to the pending session; it is
        // reclaimed on resolution or by the stale sweep.
        let _ = flow.keep();
        self.correlator.open(token, owner, kind, local);
    }

    async fn finish_rename(&self, ch: &dyn Channel, local: &Path, new_name: &str) {
        let safe = sanitize_file_name(new_name, "");
        if safe.is_empty() {
            let _ = ch.send_text("Invalid filename.").await;
            return;
        }

        let dest = parent_of(local).join(&safe);
        if let Err(e) = tokio::fs::rename(local, &dest).await {
            let _ = ch.send_text(&format!("❌ Rename failed: {e}")).await;
            return;
        }
        let caption = format!("✨ Renamed to <code>{}</code>", html_escape::encode_text(&safe));
        deliver_document(ch, &dest, &caption).await;
        let _ = ch.send_text("🌟 Task completed.").await;
    }

    async fn finish_encrypted_zip(&self, ch: &dyn Channel, local: &Path, password: &str) {
        let password = password.trim();
        if password.is_empty() {
            let _ = ch.send_text("Invalid password.").await;
            return;
        }

        match archive::create_encrypted_zip(local, parent_of(local), password) {
            Ok(out) => {
                deliver_document(ch, &out, "🔒 Encrypted ZIP ready.").await;
                let _ = ch.send_text("🌟 Task completed.").await;
            }
            Err(e) => {
                let _ = ch.send_text(&format!("❌ Failed to create zip: {e}")).await;
            }
        }
    }

    async fn finish_extract(&self, ch: &dyn Channel, local: &Path, password: &str) {
        let password = match password.trim() {
            "0" => None,
            p => Some(p),
        };

        match extract::extract_all(local, parent_of(local), password) {
            Ok(files) => {
                for file in &files {
                    let name = file.file_name().and_then(|n| n.to_str()).unwrap_or("file");
                    let caption =
                        format!("Extracted: <code>{}</code>", html_escape::encode_text(name));
                    deliver_document(ch, file, &caption).await;
                }
                let _ = ch.send_text("🌟 Task completed.").await;
            }
            Err(e @ (ExecutorError::WrongPasswordOrCorrupt | ExecutorError::EmptyArchive)) => {
                let _ = ch.send_text(&format!("❌ {e}")).await;
            }
            Err(e) => {
                let _ = ch.send_text(&format!("❌ Extract failed: {e}")).await;
            }
        }
    }

    fn selections_lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingSelection>> {
        self.selections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Best-effort result delivery; a failed upload is logged, never surfaced,
/// because the operation itself already completed locally.
async fn deliver_document(ch: &dyn Channel, path: &Path, caption: &str) {
    if let Err(e) = ch.reply_document(path, caption).await {
        warn!(path = %path.display(), error = %e, "Result delivery failed");
    }
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or(Path::new("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_codes_roundtrip() {
        for op in [
            Operation::Rename,
            Operation::Zip,
            Operation::ZipWithPassword,
            Operation::Unzip,
            Operation::Compress,
        ] {
            assert_eq!(Operation::from_code(op.code()), Some(op));
        }
        assert_eq!(Operation::from_code("selfdestruct"), None);
    }
}
