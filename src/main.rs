use std::sync::Arc;

use board_monitor::board::{BoardSource, TrelloSource};
use board_monitor::config::{ConfigStore, MemoryConfigStore, MonitorConfig, SettingsFile};
use board_monitor::engine::{PollEngine, PollScheduler};
use board_monitor::notify::{LogNotifier, Notifier, TelegramNotifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = MonitorConfig::from_env()?;

    eprintln!("📋 Board Monitor v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Board API: {}", config.trello_api_base);
    eprintln!("   Poll every: {}s", config.poll_interval_secs);

    // ── Settings ──────────────────────────────────────────────────────
    let store: Arc<dyn ConfigStore> = Arc::new(MemoryConfigStore::new());
    let lists = match &config.settings_path {
        Some(path) => {
            let file = SettingsFile::load(path)?;
            eprintln!("   Settings: {}", path.display());
            file.apply(store.as_ref())?
        }
        None => {
            eprintln!("   Settings: none (set BOARD_MONITOR_SETTINGS to monitor lists)");
            Vec::new()
        }
    };

    // ── Collaborators ─────────────────────────────────────────────────
    let source: Arc<dyn BoardSource> = Arc::new(TrelloSource::new(
        config.trello_api_base.clone(),
        config.trello_api_key.clone(),
        config.trello_token.clone(),
        config.http_timeout,
    )?);

    let notifier: Arc<dyn Notifier> = match &config.telegram_bot_token {
        Some(token) => Arc::new(TelegramNotifier::new(token.clone())),
        None => Arc::new(LogNotifier),
    };
    eprintln!("   Notifier: {}", notifier.name());

    // ── Engine ────────────────────────────────────────────────────────
    let engine = Arc::new(PollEngine::new(source, Arc::clone(&store), notifier));
    for (name, list_id) in &lists {
        if let Err(e) = engine.register_list(name, list_id).await {
            tracing::error!(list = %name, "Failed to register list: {e}");
        }
    }
    eprintln!("   Lists: {}\n", engine.lists().await.len());

    let scheduler = PollScheduler::new(Arc::clone(&engine));
    scheduler.start(config.poll_interval_secs).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    scheduler.stop().await;

    Ok(())
}
