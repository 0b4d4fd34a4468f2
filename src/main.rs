mod client;
mod config;
mod control;
mod settings;
mod telemetry;
mod types;
mod web;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::client::{BackendApi, HttpBackend};
use crate::config::{ConsoleConfig, SettingsCatalog};
use crate::control::{CommandControl, ControlCommand};
use crate::settings::SettingsStore;
use crate::telemetry::PollerConfig;
use crate::types::{Setting, SettingValue, TradeFeed};
use crate::web::{start_console_server, AppState};

#[derive(Parser)]
#[command(name = "piphawk-console")]
#[command(version)]
#[command(about = "Operator console for the PipHawk trading bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "console.toml", global = true)]
    config: String,

    /// Backend base URL (overrides config and PIPHAWK_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the web dashboard
    Serve {
        /// Dashboard port (default from config: 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show the bot's runtime settings
    Settings,
    /// Change one runtime setting
    Set {
        /// Setting key, e.g. AI_COOLDOWN_SEC_OPEN
        key: String,
        /// New value (number, true/false, or an option name)
        value: String,
    },
    /// Show the most recent trades
    Trades {
        /// Number of trades to fetch (default from config: 100)
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Emergency stop: halt the bot and flatten positions
    Panic,
    /// Start, stop or restart the bot's job
    Control {
        /// start | stop | restart
        command: ControlCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    if cli.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    info!("PipHawk Console v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ConsoleConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config))?;
    if let Some(url) = cli.api_url {
        config.api_url = Some(url);
    }
    if let Commands::Serve { port: Some(port) } = &cli.command {
        config.port = *port;
    }
    config.validate().map_err(|errors| anyhow!(errors.join(", ")))?;

    let catalog = Arc::new(config.catalog().context("Failed to load settings catalog")?);
    let backend = HttpBackend::from_config(&config).context("Failed to build HTTP client")?;
    if backend.is_configured() {
        info!("Backend: {}", config.backend_url().unwrap_or_default());
    } else {
        warn!("No backend URL configured; requests will not be sent");
    }
    let api: Arc<dyn BackendApi> = Arc::new(backend);

    match cli.command {
        Commands::Serve { .. } => run_console(config, api, catalog).await?,
        Commands::Settings => show_settings(api, catalog).await,
        Commands::Set { key, value } => set_setting(api, catalog, &key, &value).await?,
        Commands::Trades { limit } => show_trades(api, limit.unwrap_or(config.trade_limit)).await,
        Commands::Panic => send_command(api, ControlCommand::PanicStop, &config).await,
        Commands::Control { command } => {
            if command == ControlCommand::PanicStop {
                warn!("Use the `panic` subcommand for an emergency stop");
            }
            send_command(api, command, &config).await
        }
    }

    Ok(())
}

async fn run_console(config: ConsoleConfig, api: Arc<dyn BackendApi>, catalog: Arc<SettingsCatalog>) -> Result<()> {
    let state = AppState::mount(
        api,
        catalog,
        PollerConfig::from_console(&config),
        config.command_timeout(),
    )
    .await;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
    };

    let served = start_console_server(state.clone(), config.port, shutdown).await;
    state.unmount().await;
    served
}

async fn show_settings(api: Arc<dyn BackendApi>, catalog: Arc<SettingsCatalog>) {
    let store = SettingsStore::load(api, catalog).await;
    let snapshot = store.snapshot().await;

    println!("\n=== Runtime Settings ===");
    if snapshot.is_empty() {
        println!("(none)");
        return;
    }

    for setting in snapshot.iter() {
        let (value, detail) = match setting {
            Setting::Numeric(s) => (s.wire_value().to_string(), format!("[{} - {}]", s.min, s.max)),
            Setting::Boolean(s) => ((if s.value { "on" } else { "off" }).to_string(), String::new()),
            Setting::Enumerated(s) => (
                s.value.clone().unwrap_or_else(|| "-".to_string()),
                format!("({})", s.options.join(" | ")),
            ),
        };
        println!("{:<28} {:<24} {:>8} {}", setting.key(), setting.label(), value, detail);
    }
}

async fn set_setting(api: Arc<dyn BackendApi>, catalog: Arc<SettingsCatalog>, key: &str, raw: &str) -> Result<()> {
    let store = SettingsStore::load(api, catalog).await;
    let pending = store.edit(key, SettingValue::from_cli(raw)).await?;

    info!("Sending {} (seq {})", serde_json::to_string(&pending.patch)?, pending.seq);
    pending.request.await?;
    Ok(())
}

async fn show_trades(api: Arc<dyn BackendApi>, limit: usize) {
    let trades = match api.fetch_recent_trades(limit).await {
        Ok(trades) => trades,
        Err(e) => {
            error!("Failed to fetch trades: {}", e);
            return;
        }
    };

    let mut feed = TradeFeed::default();
    feed.replace(trades, limit);

    let dash = || "-".to_string();
    println!("\n=== Recent Trades ===");
    for trade in feed.trades() {
        println!(
            "{:>10} {:<10} {:<20} {:>10} {:>10} {:>10} {:>10}",
            trade.id.to_string(),
            trade.instrument,
            trade.open_time.as_ref().map(|t| t.to_string()).unwrap_or_else(dash),
            trade.units.map(|u| u.to_string()).unwrap_or_else(dash),
            trade.open_price.map(|p| p.to_string()).unwrap_or_else(dash),
            trade.realized_pnl.map(|p| p.round_dp(2).to_string()).unwrap_or_else(dash),
            trade.state.map(|s| s.to_string()).unwrap_or_else(dash)
        );
    }

    let stats = feed.stats();
    println!(
        "\nWins: {} | Losses: {} | Win rate: {} | P/L: {}",
        stats.wins,
        stats.losses,
        stats
            .win_rate
            .map(|rate| format!("{}%", rate))
            .unwrap_or_else(|| "-".to_string()),
        stats.total_pnl.round_dp(2)
    );
}

async fn send_command(api: Arc<dyn BackendApi>, command: ControlCommand, config: &ConsoleConfig) {
    let control = CommandControl::new(command, api, config.command_timeout());
    if let Some(request) = control.trigger() {
        if let Err(e) = request.await {
            error!("Command task failed: {}", e);
        }
    }
}
