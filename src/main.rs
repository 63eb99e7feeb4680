//! IV Spread Monitor - Main Entry Point

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use iv_spread_monitor::config::Config;
use iv_spread_monitor::market::{build_http_client, default_sources, DataAcquirer};
use iv_spread_monitor::monitor::{CycleReport, MonitorLoop, TradingCalendar};
use iv_spread_monitor::notify::{LogNotifier, Notifier, TelegramNotifier};
use iv_spread_monitor::persistence::PositionStore;
use iv_spread_monitor::risk::{Position, PositionTracker, TrackerConfig};
use iv_spread_monitor::strategy::minimal_lots;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// IV Spread Monitor CLI
#[derive(Parser)]
#[command(name = "iv-spread-monitor")]
#[command(version, about = "Cross-border commodity option IV spread monitor")]
struct Cli {
    /// Path to a config file (toml, yaml or json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll continuously until interrupted (default)
    Run,

    /// Run a single monitoring cycle and exit
    Once {
        /// Run even outside trading hours
        #[arg(short, long)]
        force: bool,
    },

    /// List configured instruments and thresholds
    List,

    /// Show positions from the persisted store
    Positions,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::List => show_instruments(&config),
        Commands::Positions => show_positions(&config),
        Commands::Once { force } => run_once(&config, force).await,
        Commands::Run => run(&config).await,
    }
}

async fn run(config: &Config) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║                 IV SPREAD MONITOR                          ║");
    info!("╚════════════════════════════════════════════════════════════╝");
    log_config(config);

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_shutdown_listener(shutdown.clone());

    let mut monitor = build_monitor(config)?.with_shutdown(shutdown);
    monitor.run().await;

    info!("👋 IV spread monitor shutdown complete");
    Ok(())
}

async fn run_once(config: &Config, force: bool) -> Result<()> {
    let mut monitor = build_monitor(config)?;
    let now = Utc::now();

    let report = if force {
        monitor.scan(now).await
    } else {
        monitor.run_cycle(now).await
    };
    print_report(&report);
    Ok(())
}

/// Wire sources, tracker, notifier and calendar into a monitor.
fn build_monitor(config: &Config) -> Result<MonitorLoop> {
    let registry = Arc::new(config.registry()?);

    let http = build_http_client(&config.sources)?;
    let sources = default_sources(&config.sources, &http)?;
    // A chain-page attempt issues two requests
    let source_timeout = Duration::from_secs(config.sources.request_timeout_secs * 2);
    let acquirer = DataAcquirer::new(registry.clone(), sources, source_timeout);
    info!("📡 [INIT] Source chain: {}", acquirer.source_names().join(" → "));

    let store = PositionStore::new(&config.store.path);
    let tracker = PositionTracker::restore(TrackerConfig::from(&config.monitor), store)
        .with_context(|| format!("Position store {} is unreadable", config.store.path.display()))?;
    info!(
        "📂 [POSITION] Restored {} record(s), {} open",
        tracker.positions().count(),
        tracker.open_count()
    );

    let notifier: Arc<dyn Notifier> = match TelegramNotifier::from_config(http, &config.telegram) {
        Some(telegram) => {
            info!("✅ [INIT] Telegram delivery enabled");
            Arc::new(telegram)
        }
        None => {
            warn!("⚠️  [INIT] Telegram not configured, alerts go to the log only");
            Arc::new(LogNotifier)
        }
    };

    let calendar = TradingCalendar::from_config(&config.monitor)?;

    Ok(MonitorLoop::new(
        registry,
        acquirer,
        tracker,
        notifier,
        calendar,
        config.monitor.clone(),
    ))
}

fn spawn_shutdown_listener(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("🛑 Shutdown signal received");
        shutdown.store(true, Ordering::SeqCst);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "iv-monitor.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("iv_spread_monitor=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    let monitor = &config.monitor;
    info!("📋 Configuration:");
    info!("   Poll Interval: {}s", monitor.poll_interval_secs);
    info!("   Min Signal Interval: {}s", monitor.min_signal_interval_secs);
    info!("   Expiry Lead: {}d", monitor.expiry_lead_days);
    info!("   Max Holding: {}d", monitor.max_holding_days);
    info!("   Timezone: {}", monitor.timezone);
    for window in &monitor.trading_hours {
        info!(
            "   Trading Window: {} - {}",
            window.start.format("%H:%M"),
            window.end.format("%H:%M")
        );
    }
    info!("   Skip Weekends: {}", monitor.skip_weekends);
    info!("   HV Window: {} days", config.sources.hv_window);
    info!("   Discount Rate: {}", config.sources.risk_free_rate);
    info!("   Request Timeout: {}s", config.sources.request_timeout_secs);
    info!("   Position Store: {}", config.store.path.display());
    for spec in config.instruments.iter().filter(|s| s.enabled) {
        info!(
            "   {} ({}/{}): open {} / close {} / stop {}",
            spec.id,
            spec.domestic.exchange,
            spec.foreign.exchange,
            spec.thresholds.open,
            spec.thresholds.close,
            spec.thresholds.stop_loss
        );
    }
}

fn print_report(report: &CycleReport) {
    print!("{}", format_report(report));
}

/// Render a cycle report for the terminal.
fn format_report(report: &CycleReport) -> String {
    let mut out = String::new();
    if report.skipped {
        out.push_str("\n💤 Outside trading hours, nothing fetched (use --force to override)\n");
        return out;
    }

    let pct = |v: Option<Decimal>| {
        v.map(|v| format!("{:.2}%", v))
            .unwrap_or_else(|| "n/a".to_string())
    };

    out.push_str("\n📊 Observations\n");
    for obs in &report.observations {
        let _ = writeln!(
            out,
            "   ├─ {}: domestic {} | foreign {} | diff {} [{}]",
            obs.instrument_id,
            pct(obs.domestic_iv),
            pct(obs.foreign_iv),
            obs.diff
                .map(|d| format!("{:+.2}", d))
                .unwrap_or_else(|| "n/a".to_string()),
            obs.data_quality
        );
    }

    if !report.signals.is_empty() {
        out.push_str("\n🚨 Signals\n");
        for signal in &report.signals {
            let _ = writeln!(
                out,
                "   ├─ {} {} ({})",
                signal.instrument_id,
                signal.label(),
                signal.direction
            );
        }
    }
    if !report.outages.is_empty() {
        let _ = writeln!(out, "\n⚠️  Data unavailable: {}", report.outages.join(", "));
    }
    if !report.store_failures.is_empty() {
        let _ = writeln!(out, "\n❌ Store write failed: {}", report.store_failures.join(", "));
    }
    out.push('\n');
    out
}

fn show_instruments(config: &Config) -> Result<()> {
    let registry = config.registry()?;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              MONITORED INSTRUMENTS                         ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    for spec in registry.all() {
        let status = if spec.enabled { "✅" } else { "⏸ " };
        println!("\n{} {} ({} / {})", status, spec.id, spec.name, spec.name_en);
        for (label, leg) in [("Domestic:", &spec.domestic), ("Foreign: ", &spec.foreign)] {
            println!(
                "   ├─ {} {} {} ({}, {} {}/lot)",
                label, leg.exchange, leg.symbol, leg.unit, leg.lot_size, leg.base_unit
            );
        }
        if let Some(sizing) = minimal_lots(spec) {
            println!(
                "   ├─ Hedge: {} × {} vs {} × {} ({}%)",
                sizing.domestic_lots,
                spec.domestic.exchange,
                sizing.foreign_lots,
                spec.foreign.exchange,
                sizing.hedge_ratio.round_dp(1)
            );
        }
        println!(
            "   ├─ Thresholds: open {} / close {} / stop {} / min {}",
            spec.thresholds.open,
            spec.thresholds.close,
            spec.thresholds.stop_loss,
            spec.thresholds.min_diff
        );
        let next_expiry = spec.expiry_after(Utc::now().date_naive());
        println!("   └─ Next Expiry: {}", next_expiry);
    }

    println!();
    Ok(())
}

fn show_positions(config: &Config) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              POSITION STORE                                ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let store = PositionStore::new(&config.store.path);
    let positions = store
        .load()
        .with_context(|| format!("Failed to read {}", store.path().display()))?;

    print!("{}", format_positions(store.path(), &positions, Utc::now()));
    Ok(())
}

/// Render stored positions as of `now`.
fn format_positions(
    path: &Path,
    positions: &BTreeMap<String, Position>,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    if positions.is_empty() {
        let _ = writeln!(out, "\n📭 No positions in {}\n", path.display());
        return out;
    }

    for position in positions.values() {
        let _ = writeln!(out, "\n🔓 {} [{:?}]", position.instrument_id, position.status);
        let _ = writeln!(out, "   ├─ Direction:  {}", position.direction);
        let _ = writeln!(
            out,
            "   ├─ Open Diff:  {:+.2} pts [{}]",
            position.open_diff, position.data_quality
        );
        let _ = writeln!(
            out,
            "   ├─ Opened:     {} ({}d held)",
            position.opened_at.format("%Y-%m-%d %H:%M:%S UTC"),
            position.days_held(now)
        );
        let _ = writeln!(
            out,
            "   ├─ Expiry:     {} ({}d left)",
            position.expiry,
            position.days_to_expiry(now.date_naive())
        );
        if let (Some(closed_at), Some(reason)) = (position.closed_at, position.close_reason) {
            let _ = writeln!(
                out,
                "   ├─ Closed:     {} ({})",
                closed_at.format("%Y-%m-%d %H:%M:%S UTC"),
                reason
            );
        }
        if let Some(diff) = position.close_diff {
            let _ = writeln!(out, "   ├─ Close Diff: {:+.2} pts", diff);
        }
        let status = if position.is_open() {
            "holding"
        } else {
            "closed, cleared next cycle"
        };
        let _ = writeln!(out, "   └─ Status:     {}", status);
    }

    out.push('\n');
    out
}
