use dotenvy::dotenv;
use filevalet::bot::handlers::{self, Command};
use filevalet::bot::DenialCache;
use filevalet::config::{self, Settings};
use filevalet::correlator::SessionCorrelator;
use filevalet::dispatcher::Dispatcher as ActionDispatcher;
use filevalet::entitlements::EntitlementStore;
use filevalet::health;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatId};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting the bot token from log output
struct RedactionPatterns {
    url_token: Regex,
    bare_token: Regex,
}

impl RedactionPatterns {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            url_token: Regex::new(r"(https?://[^/]+/bot)[0-9]+:[A-Za-z0-9_-]+")?,
            bare_token: Regex::new(r"[0-9]{8,10}:[A-Za-z0-9_-]{35}")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let pass = self.url_token.replace_all(input, "$1[TELEGRAM_TOKEN]");
        self.bare_token
            .replace_all(&pass, "[TELEGRAM_TOKEN]")
            .to_string()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        self.inner.write_all(self.patterns.redact(&s).as_bytes())?;
        // Report the original length to satisfy the contract even when the
        // redacted text differs in size.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: self.patterns.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile redaction patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting filevalet...");

    let settings = init_settings();
    tokio::fs::create_dir_all(&settings.work_dir).await?;

    let store = init_store(&settings).await;
    let correlator = Arc::new(SessionCorrelator::new(Duration::from_secs(
        config::SESSION_TIMEOUT_SECS,
    )));
    let dispatcher = Arc::new(ActionDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&correlator),
        settings.work_dir.clone(),
        settings.ffmpeg_path.clone(),
    ));
    let denials = init_denial_cache();

    let bot = Bot::new(settings.telegram_token.clone());

    let shutdown = CancellationToken::new();
    let health_port = settings.health_port;
    let health_task = tokio::spawn(async move {
        if let Err(e) = health::serve(health_port).await {
            error!("Liveness probe failed: {}", e);
        }
    });
    let sweep_task = tokio::spawn(sweep_loop(
        bot.clone(),
        Arc::clone(&dispatcher),
        shutdown.clone(),
    ));

    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![store, settings, dispatcher, denials])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    shutdown.cancel();
    let _ = sweep_task.await;
    health_task.abort();

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        patterns,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

async fn init_store(settings: &Settings) -> Arc<EntitlementStore> {
    match EntitlementStore::load(settings.entitlement_file.clone()).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to load entitlement store: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_denial_cache() -> Arc<DenialCache> {
    Arc::new(DenialCache::new(
        config::DENIAL_COOLDOWN_SECS,
        config::DENIAL_CACHE_TTL_SECS,
        config::DENIAL_CACHE_MAX_SIZE,
    ))
}

/// Periodically reclaim stale sessions and tell their owners.
async fn sweep_loop(bot: Bot, dispatcher: Arc<ActionDispatcher>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(config::SWEEP_INTERVAL_SECS));
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {
                for (token, op) in dispatcher.reclaim_stale() {
                    if let Err(e) = bot
                        .send_message(
                            ChatId(token.chat),
                            "⌛ Operation expired: no reply received in time.",
                        )
                        .await
                    {
                        warn!(owner = op.owner, error = %e, "Expiry notice delivery failed");
                    }
                }
            }
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::filter(|msg: Message| {
                        msg.document().is_some() || msg.video().is_some() || msg.audio().is_some()
                    })
                    .endpoint(handle_file),
                )
                .branch(
                    dptree::filter(|msg: Message| {
                        msg.text().is_some() && msg.reply_to_message().is_some()
                    })
                    .endpoint(handle_reply),
                ),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    store: Arc<EntitlementStore>,
    settings: Arc<Settings>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => handlers::start(bot, msg).await,
        Command::PremiumStatus => handlers::premium_status(bot, msg, store).await,
        Command::Approve(args) => handlers::approve(bot, msg, store, settings, args).await,
        Command::Remove(args) => handlers::remove(bot, msg, store, settings, args).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_file(
    bot: Bot,
    msg: Message,
    dispatcher: Arc<ActionDispatcher>,
    denials: Arc<DenialCache>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_file(bot, msg, dispatcher, denials).await {
        error!("File handler error: {}", e);
    }
    respond(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    dispatcher: Arc<ActionDispatcher>,
    settings: Arc<Settings>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_callback(bot, q, dispatcher, settings).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}

async fn handle_reply(
    bot: Bot,
    msg: Message,
    dispatcher: Arc<ActionDispatcher>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = handlers::handle_reply(bot, msg, dispatcher).await {
        error!("Reply handler error: {}", e);
    }
    respond(())
}
