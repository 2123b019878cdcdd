//! Telegram implementation of the [`Channel`] transport seam.

use crate::bot::resilient;
use crate::channel::{Channel, MessageRef};
use crate::utils::ProgressTracker;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::Path;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatId, FileId, InputFile, MessageId, ParseMode};
use tokio::io::AsyncWriteExt;
use tracing::warn;

static VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];

/// One user's Telegram conversation
pub struct TelegramChannel {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramChannel {
    /// Bind a channel to a chat.
    #[must_use]
    pub const fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

fn to_message_id(message: MessageRef) -> MessageId {
    MessageId(i32::try_from(message.0).unwrap_or(i32::MAX))
}

#[async_trait]
impl Channel for TelegramChannel {
    fn chat_key(&self) -> i64 {
        self.chat_id.0
    }

    async fn send_text(&self, text: &str) -> Result<MessageRef> {
        let msg = resilient::send_html_resilient(&self.bot, self.chat_id, text).await?;
        Ok(MessageRef(i64::from(msg.id.0)))
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<()> {
        resilient::edit_html_resilient(&self.bot, self.chat_id, to_message_id(message), text).await
    }

    async fn reply_document(&self, path: &Path, caption: &str) -> Result<()> {
        self.bot
            .send_document(self.chat_id, InputFile::file(path.to_path_buf()))
            .caption(caption.to_string())
            .parse_mode(ParseMode::Html)
            .await
            .context("send_document failed")?;
        Ok(())
    }

    async fn reply_media(&self, path: &Path, caption: &str) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        if extension.as_deref().is_some_and(|e| VIDEO_EXTENSIONS.contains(&e)) {
            match self
                .bot
                .send_video(self.chat_id, InputFile::file(path.to_path_buf()))
                .caption(caption.to_string())
                .parse_mode(ParseMode::Html)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Native video send failed; falling back to document"
                    );
                }
            }
        }

        self.reply_document(path, caption).await
    }

    async fn download_to_local(
        &self,
        file_ref: &str,
        dest: &Path,
        status: MessageRef,
    ) -> Result<()> {
        let file = self
            .bot
            .get_file(FileId(file_ref.to_string()))
            .await
            .context("get_file failed")?;
        let total = u64::from(file.meta.size);

        let mut out = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("cannot create {}", dest.display()))?;

        let mut tracker = ProgressTracker::new();
        let mut transferred: u64 = 0;
        let mut stream = self.bot.download_file_stream(&file.path);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("download stream failed")?;
            out.write_all(&chunk).await.context("write failed")?;
            transferred = transferred.saturating_add(chunk.len() as u64);

            if let Some(bar) = tracker.update(transferred, total) {
                let text = format!("📥 <b>Downloading…</b>\n{bar}");
                let _ = self.edit_text(status, &text).await;
            }
        }
        out.flush().await.context("flush failed")?;

        Ok(())
    }
}
