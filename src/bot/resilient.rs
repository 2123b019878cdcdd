//! Telegram API calls with automatic retry on transient failures.
//!
//! Sends and edits go through exponential backoff with jitter. Edits
//! additionally tolerate the expected "message is not modified" and
//! "message to edit not found" responses, which matter for progress
//! updates racing against user actions.

use crate::config::{
    TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
};
use anyhow::Result;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message, MessageId, ParseMode};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::{debug, warn};

const ERROR_NOT_MODIFIED: &str = "message is not modified";
const ERROR_NOT_FOUND: &str = "message to edit not found";

/// Run a Telegram API operation with exponential backoff and jitter.
///
/// # Errors
///
/// Returns the last error once all attempts are exhausted.
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}

/// Send an HTML message, retrying on transient failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn send_html_resilient(bot: &Bot, chat_id: ChatId, text: &str) -> Result<Message> {
    retry_telegram_operation(|| async {
        bot.send_message(chat_id, text.to_string())
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Edit a message to new HTML text, retrying on transient failures.
///
/// "Not modified" and "not found" responses count as success: the first
/// means the text already matches, the second that the target is gone and
/// there is nothing left to update.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn edit_html_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
) -> Result<()> {
    let result = retry_telegram_operation(|| async {
        bot.edit_message_text(chat_id, msg_id, text.to_string())
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| anyhow::anyhow!("Telegram edit error: {e}"))
    })
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string();
            if msg.contains(ERROR_NOT_MODIFIED) || msg.contains(ERROR_NOT_FOUND) {
                debug!("Edit skipped: {msg}");
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}
