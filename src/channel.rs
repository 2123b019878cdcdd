//! The messaging transport surface the core depends on.
//!
//! The dispatcher drives one conversation through this trait; the Telegram
//! implementation lives in `bot::telegram_channel`, and tests substitute a
//! recording mock. Channel failures are delivery failures: the local side
//! effects of an operation stand regardless of whether a send went through.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Transport-assigned identifier of a message within a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef(pub i64);

/// One user's conversation with the bot
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable identity of the conversation this channel is bound to,
    /// used to scope correlation tokens.
    fn chat_key(&self) -> i64;

    /// Send a message, returning its transport id.
    async fn send_text(&self, text: &str) -> Result<MessageRef>;

    /// Replace the text of a previously sent message.
    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<()>;

    /// Deliver a local file as a document attachment.
    async fn reply_document(&self, path: &Path, caption: &str) -> Result<()>;

    /// Deliver a local file as native media where the transport supports
    /// it, falling back to a document otherwise.
    async fn reply_media(&self, path: &Path, caption: &str) -> Result<()>;

    /// Download the transport file `file_ref` to the exact path `dest`,
    /// reporting progress by editing the `status` message with a
    /// monotonically non-decreasing percentage.
    async fn download_to_local(&self, file_ref: &str, dest: &Path, status: MessageRef)
        -> Result<()>;
}
