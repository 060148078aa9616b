//! # Hookclock: scheduled webhook events
//!
//! Runs the cron generator and event processor against a shared store,
//! keeps the trigger set in sync with the trigger file and serves the
//! inspection API.
//!
//! Usage:
//!   hookclock                                   # ~/.hookclock/config.toml
//!   hookclock --config ./hookclock.toml
//!   hookclock --database-url postgres://localhost/hookclock --port 9000
//!   hookclock --no-gateway --log-json

mod reload;

use anyhow::Result;
use clap::Parser;
use hookclock_core::{HookclockConfig, SharedTriggers, TriggerFile};
use hookclock_scheduler::{
    Clock, EngineConfig, EventStore, PgEventStore, ScheduledEventEngine, SqliteEventStore,
    SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "hookclock",
    version,
    about = "⏰ Hookclock: cron and one-off webhook scheduler"
)]
struct Cli {
    /// Config file (default: ~/.hookclock/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database URL or SQLite path, overrides [database].url
    #[arg(long)]
    database_url: Option<String>,

    /// Trigger file, overrides [triggers].path
    #[arg(long)]
    triggers: Option<String>,

    /// Gateway port, overrides [gateway].port
    #[arg(short, long)]
    port: Option<u16>,

    /// Do not start the HTTP API
    #[arg(long)]
    no_gateway: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        "hookclock=debug,hookclock_scheduler=debug,hookclock_gateway=debug,tower_http=debug"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<HookclockConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            HookclockConfig::load_from(std::path::Path::new(&shellexpand::tilde(path).to_string()))?
        }
        None => HookclockConfig::load()?,
    };
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    if let Some(path) = &cli.triggers {
        config.triggers.path = path.clone();
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if cli.no_gateway {
        config.gateway.enabled = false;
    }
    Ok(config)
}

async fn open_store(config: &HookclockConfig) -> Result<Arc<dyn EventStore>> {
    let url = config.database.expanded_url();
    if config.database.is_postgres() {
        let store = PgEventStore::connect(&url, config.database.max_connections).await?;
        tracing::info!("🐘 Event store: PostgreSQL");
        Ok(Arc::new(store))
    } else {
        let store = SqliteEventStore::open(std::path::Path::new(&url))?;
        tracing::info!("💾 Event store: SQLite at {}", url);
        Ok(Arc::new(store))
    }
}

/// Waits for Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("👋 Received Ctrl-C");
            }
            _ = terminate.recv() => tracing::info!("👋 Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("👋 Received Ctrl-C");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = load_config(&cli)?;
    let store = open_store(&config).await?;

    let triggers_path = config.triggers.expanded_path();
    let trigger_file = TriggerFile::load(&triggers_path)?;
    tracing::info!(
        "⏰ Loaded {} cron trigger(s) from {}",
        trigger_file.cron_triggers.len(),
        triggers_path.display()
    );
    let triggers = Arc::new(SharedTriggers::new(trigger_file.cron_triggers));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let handle = ScheduledEventEngine::new(store.clone(), triggers.clone())?
        .with_config(EngineConfig::from(&config))
        .with_clock(clock.clone())
        .start()
        .await?;
    let cancel = handle.cancellation_token();

    let reloader = reload::TriggerReloader::new(
        triggers_path,
        triggers.clone(),
        store.clone(),
        clock.clone(),
        Duration::from_secs(config.triggers.refresh_secs.max(1)),
    );
    let reload_task = tokio::spawn(reloader.run(cancel.clone()));

    let gateway_task = if config.gateway.enabled {
        let state = hookclock_gateway::AppState {
            store: store.clone(),
            triggers: triggers.clone(),
            reporter: handle.reporter(),
            locked: handle.locked(),
            clock: clock.clone(),
            start_time: std::time::Instant::now(),
        };
        let gateway_config = config.gateway.clone();
        let gateway_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = hookclock_gateway::serve(&gateway_config, state, gateway_cancel).await {
                tracing::error!("❌ Gateway stopped: {e}");
            }
        }))
    } else {
        tracing::info!("🌐 Gateway disabled");
        None
    };

    shutdown_signal().await?;

    let reporter = handle.reporter();
    let unlocked = handle.shutdown().await?;
    let stats = reporter.stats();
    for task in [Some(reload_task), gateway_task].into_iter().flatten() {
        task.await.ok();
    }
    tracing::info!(
        "✅ Stopped: {} delivered, {} retried, {} errored, {} dead, {} unlocked",
        stats.delivered,
        stats.retried,
        stats.errored,
        stats.dead,
        unlocked
    );
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sigterm_triggers_shutdown() {
        let waiter = tokio::spawn(shutdown_signal());
        // Let the handler register before the signal is sent.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let result = tokio::time::timeout(Duration::from_secs(5), waiter).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
