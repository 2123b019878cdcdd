/// Flood protection for denial messages
pub mod denial_cache;
/// Command, file, callback and reply handlers
pub mod handlers;
/// Retrying Telegram API helpers
pub mod resilient;
/// Telegram implementation of the channel seam
pub mod telegram_channel;

pub use denial_cache::DenialCache;
