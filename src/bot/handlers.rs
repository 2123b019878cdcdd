//! Command, file, callback and reply handlers.

use crate::bot::denial_cache::DenialCache;
use crate::bot::telegram_channel::TelegramChannel;
use crate::config::{Settings, MAX_DOWNLOAD_SIZE};
use crate::correlator::CorrelationToken;
use crate::dispatcher::{DispatchError, Dispatcher, Operation};
use crate::entitlements::{now_epoch, EntitlementStore};
use crate::utils::format_expiry;
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode,
};
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

/// Bot commands
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show the start menu
    #[command(description = "start and show the menu.")]
    Start,
    /// Check own premium status
    #[command(description = "check your premium status.")]
    PremiumStatus,
    /// Grant premium (owner only)
    #[command(description = "grant premium: /approve <user_id> <seconds>.")]
    Approve(String),
    /// Revoke premium (owner only)
    #[command(description = "revoke premium: /remove <user_id>.")]
    Remove(String),
}

/// Sender's user id, or 0 when Telegram omits the sender
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

fn is_owner(user_id: i64, settings: &Settings) -> bool {
    user_id == settings.owner_id
}

fn start_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("📜 Commands Menu", "cmd_menu")],
        vec![InlineKeyboardButton::callback("👑 Admin Panel", "admin_panel")],
    ])
}

fn back_keyboard(target: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback("⬅️ Back", target)]])
}

fn action_keyboard(selection_id: u64) -> InlineKeyboardMarkup {
    let button = |label: &str, op: Operation| {
        InlineKeyboardButton::callback(label, format!("{}|{selection_id}", op.code()))
    };
    InlineKeyboardMarkup::new(vec![
        vec![button("✏️ Rename", Operation::Rename)],
        vec![
            button("🗜 ZIP", Operation::Zip),
            button("🔒 ZIP+Pass", Operation::ZipWithPassword),
        ],
        vec![
            button("🔓 UNZIP", Operation::Unzip),
            button("🎥 Compress", Operation::Compress),
        ],
    ])
}

const START_TEXT: &str = "<b>🌸 Premium File Manager Bot</b>\n\
    Rename • ZIP • Password ZIP • Extract • Compress • Premium System";

const COMMANDS_MENU_TEXT: &str = "<b>📜 Full Commands Menu</b>\n\n\
    <b>File Tools:</b>\n\
    ✏️ Rename\n\
    🗜 ZIP\n\
    🔒 ZIP (Password)\n\
    🔓 UNZIP\n\
    🎥 Compress Video\n\n\
    <b>Premium Commands:</b>\n\
    /premiumstatus – check your premium\n\
    /approve &lt;user_id&gt; &lt;seconds&gt;\n\
    /remove &lt;user_id&gt;\n\n\
    <b>Examples:</b>\n\
    <code>/approve 123456 60</code> → 1 min\n\
    <code>/approve 123456 86400</code> → 1 day\n\
    <code>/approve 123456 31536000</code> → 1 year\n\
    <code>/approve 123456 9999999999</code> → lifetime";

const ADMIN_PANEL_TEXT: &str = "<b>👑 ADMIN PANEL</b>\nPremium Control System\n\n\
    Reply to a user's message with /approve &lt;seconds&gt; or /remove,\n\
    or address them by id.";

/// Handle /start.
///
/// # Errors
///
/// Returns an error if the Telegram send fails.
pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(msg.chat.id, START_TEXT)
        .parse_mode(ParseMode::Html)
        .reply_markup(start_keyboard())
        .await?;
    Ok(())
}

/// Handle /premiumstatus.
///
/// # Errors
///
/// Returns an error if the Telegram send fails.
pub async fn premium_status(bot: Bot, msg: Message, store: Arc<EntitlementStore>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let text = match store.expiry_of(user_id).await {
        None => "❌ You are not a premium user.".to_string(),
        Some(expiry) if expiry <= now_epoch() => "❌ Your premium has expired.".to_string(),
        Some(expiry) => {
            let username = msg
                .from
                .as_ref()
                .and_then(|u| u.username.clone())
                .unwrap_or_else(|| "NoUsername".to_string());
            format!(
                "👤 User: @{username}\n⭐ Status: Premium\n⏳ Expires: <code>{}</code>\n🟢 Active",
                format_expiry(expiry)
            )
        }
    };
    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

/// Resolve the admin command target: either the replied-to user plus the
/// whole argument string, or the first argument parsed as a user id with
/// the rest returned for further parsing.
fn admin_target(msg: &Message, args: &str) -> Result<(i64, Vec<String>), &'static str> {
    let parts: Vec<String> = args.split_whitespace().map(str::to_string).collect();
    if let Some(reply) = msg.reply_to_message() {
        let user = reply.from.as_ref().ok_or("Cannot identify that user.")?;
        return Ok((user.id.0.cast_signed(), parts));
    }
    match parts.split_first() {
        Some((first, rest)) => {
            let user_id = first
                .parse::<i64>()
                .map_err(|_| "Invalid user id. Use a numeric id or reply to the user.")?;
            Ok((user_id, rest.to_vec()))
        }
        None => Err("Usage: give a user id or reply to the user's message."),
    }
}

/// Handle /approve (owner only).
///
/// # Errors
///
/// Returns an error if the Telegram send fails.
pub async fn approve(
    bot: Bot,
    msg: Message,
    store: Arc<EntitlementStore>,
    settings: Arc<Settings>,
    args: String,
) -> Result<()> {
    if !is_owner(get_user_id_safe(&msg), &settings) {
        bot.send_message(msg.chat.id, "🚫 Only owner can approve!").await?;
        return Ok(());
    }

    let (target, rest) = match admin_target(&msg, &args) {
        Ok(parsed) => parsed,
        Err(usage) => {
            bot.send_message(msg.chat.id, usage).await?;
            return Ok(());
        }
    };
    let Some(seconds) = rest.first().and_then(|s| s.parse::<i64>().ok()) else {
        bot.send_message(msg.chat.id, "Invalid seconds. Use a number (seconds).")
            .await?;
        return Ok(());
    };

    match store.grant(target, seconds).await {
        Ok(expiry) => {
            info!(target, seconds, "Premium granted");
            bot.send_message(
                msg.chat.id,
                format!(
                    "✅ Approved: <code>{target}</code>\nExpires: <code>{}</code>",
                    format_expiry(expiry)
                ),
            )
            .parse_mode(ParseMode::Html)
            .await?;
        }
        Err(e) => {
            warn!(target, error = %e, "Failed to persist grant");
            bot.send_message(msg.chat.id, "❌ Failed to save premium data.")
                .await?;
        }
    }
    Ok(())
}

/// Handle /remove (owner only).
///
/// # Errors
///
/// Returns an error if the Telegram send fails.
pub async fn remove(
    bot: Bot,
    msg: Message,
    store: Arc<EntitlementStore>,
    settings: Arc<Settings>,
    args: String,
) -> Result<()> {
    if !is_owner(get_user_id_safe(&msg), &settings) {
        bot.send_message(msg.chat.id, "🚫 Only owner allowed!").await?;
        return Ok(());
    }

    let (target, _) = match admin_target(&msg, &args) {
        Ok(parsed) => parsed,
        Err(usage) => {
            bot.send_message(msg.chat.id, usage).await?;
            return Ok(());
        }
    };

    match store.revoke(target).await {
        Ok(()) => {
            info!(target, "Premium revoked");
            bot.send_message(
                msg.chat.id,
                format!("❌ Removed premium: <code>{target}</code>"),
            )
            .parse_mode(ParseMode::Html)
            .await?;
        }
        Err(e) => {
            warn!(target, error = %e, "Failed to persist revoke");
            bot.send_message(msg.chat.id, "❌ Failed to save premium data.")
                .await?;
        }
    }
    Ok(())
}

/// The transport file handle, display name and size of an inbound
/// document, video or audio message.
fn inbound_file(msg: &Message) -> Option<(String, String, u32)> {
    if let Some(doc) = msg.document() {
        return Some((
            doc.file.id.0.clone(),
            doc.file_name.clone().unwrap_or_else(|| "file".to_string()),
            doc.file.size,
        ));
    }
    if let Some(video) = msg.video() {
        return Some((
            video.file.id.0.clone(),
            video.file_name.clone().unwrap_or_else(|| "video.mp4".to_string()),
            video.file.size,
        ));
    }
    if let Some(audio) = msg.audio() {
        return Some((
            audio.file.id.0.clone(),
            audio.file_name.clone().unwrap_or_else(|| "audio.mp3".to_string()),
            audio.file.size,
        ));
    }
    None
}

/// A document, video or audio arrived: gate and show the operation menu.
///
/// # Errors
///
/// Returns an error if the Telegram send fails.
pub async fn handle_file(
    bot: Bot,
    msg: Message,
    dispatcher: Arc<Dispatcher>,
    denials: Arc<DenialCache>,
) -> Result<()> {
    let Some((file_ref, file_name, size)) = inbound_file(&msg) else {
        return Ok(());
    };
    let owner = get_user_id_safe(&msg);

    if size > MAX_DOWNLOAD_SIZE {
        bot.send_message(
            msg.chat.id,
            "❌ File is too large: the limit for bot downloads is 20 MB.",
        )
        .await?;
        return Ok(());
    }

    match dispatcher.on_file_received(owner, file_ref, file_name.clone()).await {
        Ok(selection_id) => {
            bot.send_message(
                msg.chat.id,
                format!(
                    "📄 <code>{}</code>\nChoose an action:",
                    html_escape::encode_text(&file_name)
                ),
            )
            .parse_mode(ParseMode::Html)
            .reply_markup(action_keyboard(selection_id))
            .await?;
        }
        Err(DispatchError::NotEntitled) => {
            if denials.should_notify(owner).await {
                bot.send_message(
                    msg.chat.id,
                    "❌ You are not a premium user.\nAsk owner to approve you.",
                )
                .await?;
                denials.mark_notified(owner).await;
            }
        }
        Err(e) => warn!(owner, error = %e, "File intake failed"),
    }
    Ok(())
}

/// Route inline keyboard presses: static menu navigation or an operation
/// selection.
///
/// # Errors
///
/// Returns an error if the Telegram send fails.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    dispatcher: Arc<Dispatcher>,
    settings: Arc<Settings>,
) -> Result<()> {
    let Some(data) = q.data.clone() else {
        return Ok(());
    };

    match data.as_str() {
        "cmd_menu" => return edit_menu(&bot, &q, COMMANDS_MENU_TEXT, back_keyboard("start_back")).await,
        "admin_panel" => return show_admin_panel(&bot, &q, &settings).await,
        "start_back" => return edit_menu(&bot, &q, START_TEXT, start_keyboard()).await,
        _ => {}
    }

    let Some((op, selection_id)) = parse_action(&data) else {
        let _ = bot
            .answer_callback_query(q.id.clone())
            .text("Unknown action.")
            .show_alert(true)
            .await;
        return Ok(());
    };

    let Some(chat_id) = q.message.as_ref().map(|m| m.chat().id) else {
        return Ok(());
    };
    let user_id = q.from.id.0.cast_signed();
    let channel = TelegramChannel::new(bot.clone(), chat_id);

    info!(user_id, op = op.code(), selection_id, "Action chosen");
    match dispatcher.on_action_chosen(&channel, user_id, selection_id, op).await {
        Ok(()) => {
            // May be answered too late after a long download; that only
            // costs the ack, so ignore failures.
            let _ = bot.answer_callback_query(q.id.clone()).await;
        }
        Err(DispatchError::NotEntitled) => {
            let _ = bot
                .answer_callback_query(q.id.clone())
                .text("❌ Your premium expired or not active.")
                .show_alert(true)
                .await;
        }
        Err(DispatchError::StaleSelection) => {
            let _ = bot
                .answer_callback_query(q.id.clone())
                .text("This menu is no longer available.")
                .show_alert(true)
                .await;
        }
        Err(DispatchError::Delivery(e)) => {
            warn!(user_id, error = %e, "Could not even open the status message");
            let _ = bot.answer_callback_query(q.id.clone()).await;
        }
    }
    Ok(())
}

fn parse_action(data: &str) -> Option<(Operation, u64)> {
    let (code, id) = data.split_once('|')?;
    Some((Operation::from_code(code)?, id.parse().ok()?))
}

async fn edit_menu(
    bot: &Bot,
    q: &CallbackQuery,
    text: &str,
    keyboard: InlineKeyboardMarkup,
) -> Result<()> {
    let _ = bot.answer_callback_query(q.id.clone()).await;
    if let Some(message) = q.message.as_ref() {
        bot.edit_message_text(message.chat().id, message.id(), text)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboard)
            .await?;
    }
    Ok(())
}

async fn show_admin_panel(bot: &Bot, q: &CallbackQuery, settings: &Settings) -> Result<()> {
    if !is_owner(q.from.id.0.cast_signed(), settings) {
        let _ = bot
            .answer_callback_query(q.id.clone())
            .text("🚫 Only owner allowed!")
            .show_alert(true)
            .await;
        return Ok(());
    }
    edit_menu(bot, q, ADMIN_PANEL_TEXT, back_keyboard("cmd_menu")).await
}

/// A text reply arrived: it may answer a pending prompt.
///
/// # Errors
///
/// Returns an error if the Telegram send fails.
pub async fn handle_reply(bot: Bot, msg: Message, dispatcher: Arc<Dispatcher>) -> Result<()> {
    let (Some(text), Some(reply_to)) = (msg.text(), msg.reply_to_message()) else {
        return Ok(());
    };

    let token = CorrelationToken {
        chat: msg.chat.id.0,
        message: i64::from(reply_to.id.0),
    };
    let replier = get_user_id_safe(&msg);
    let channel = TelegramChannel::new(bot, msg.chat.id);

    if let Err(e) = dispatcher.on_follow_up(&channel, token, replier, text).await {
        // Unrelated conversation or a stale prompt: not an error to the
        // sender, so stay silent.
        debug!(replier, chat = token.chat, reason = %e, "Reply did not correlate");
    }
    Ok(())
}
