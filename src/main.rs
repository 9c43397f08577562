use std::sync::Arc;

use chrono::Local;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use alex_assist::agent::{Agent, AgentDeps};
use alex_assist::channels::{ChannelManager, CliChannel, TelegramChannel};
use alex_assist::config::AppConfig;
use alex_assist::engine::{EngineDeps, FlowEngine};
use alex_assist::llm::create_synthesizer;
use alex_assist::scheduler::{DailyTrigger, Scheduler};
use alex_assist::session::SessionRegistry;
use alex_assist::store::{FileJournal, LibSqlRegistry, MemoryRegistry, UserRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    // Initialize tracing: stderr always, plus a daily rolling file when configured.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "alex.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    eprintln!("📝 Alex v{}", env!("CARGO_PKG_VERSION"));

    // ── Synthesizer ──────────────────────────────────────────────────────
    let synth = create_synthesizer(config.llm.as_ref())?;
    eprintln!("   Model: {}", synth.model_name());

    // ── Persistence ──────────────────────────────────────────────────────
    let single_contact = !config.engine.multi_user;
    let registry: Arc<dyn UserRegistry> =
        match LibSqlRegistry::new_local(&config.db_path, single_contact).await {
            Ok(registry) => Arc::new(registry),
            Err(e) => {
                tracing::error!(
                    path = %config.db_path.display(),
                    "Failed to open registry database, registrations will not persist: {}",
                    e
                );
                Arc::new(MemoryRegistry::new(single_contact))
            }
        };
    eprintln!("   Database: {}", config.db_path.display());

    let journal = Arc::new(FileJournal::new(&config.journal_path));
    eprintln!("   Journal: {}", journal.path().display());

    // ── Scheduler ────────────────────────────────────────────────────────
    let (notify_tx, notify_rx) = tokio::sync::mpsc::channel(64);
    let trigger = DailyTrigger::at(config.schedule.morning_time)?;
    let scheduler = Arc::new(Scheduler::new(trigger, single_contact, notify_tx));
    let armed = scheduler.load_from(registry.as_ref(), Local::now()).await;
    eprintln!(
        "   Morning invitation: {} ({} user(s) armed)",
        config.schedule.morning_time.format("%H:%M"),
        armed
    );

    // ── Engine ───────────────────────────────────────────────────────────
    let engine = Arc::new(FlowEngine::new(
        config.engine.clone(),
        EngineDeps {
            sessions: Arc::new(SessionRegistry::new()),
            journal,
            registry,
            synth,
            schedule: Some(Arc::clone(&scheduler)),
        },
    ));

    // ── Channels ─────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new(config.engine.send_timeout);
    channels.add(Box::new(CliChannel::new()));

    if let Some(token) = config.telegram_token.clone() {
        let allowed_users = config.telegram_allowed_users.clone();
        eprintln!(
            "   Telegram: enabled (allowed: {})",
            if allowed_users.iter().any(|u| u == "*") {
                "everyone".to_string()
            } else {
                allowed_users.join(", ")
            }
        );
        let telegram = TelegramChannel::new(token, allowed_users, config.engine.send_timeout);
        channels.add(Box::new(telegram));
    }

    channels.health_check_all().await;

    eprintln!("   Channels: {}\n", channels.names().join(", "));

    // ── Agent ────────────────────────────────────────────────────────────
    let agent = Agent::new(
        AgentDeps {
            engine,
            scheduler: Some(scheduler),
            scheduler_tick: config.schedule.tick_interval,
            invitations: notify_rx,
        },
        channels,
    );
    agent.run().await?;

    Ok(())
}
