//! deskrun CLI — run analysis sessions and inspect configuration.
//!
//! Commands:
//! - `run` — run a batch of tickers through the scripted stage pipeline
//! - `check-config` — validate a TOML session config and print the result
//! - `windows` — parse market-hour windows and report the next launch time

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};

use deskrun_core::{ScriptedBroker, ScriptedExecutor, TickerId, TickerPhase};
use deskrun_driver::{market_hours, RunDriver, RunMode, SessionConfig, SessionStatus};

#[derive(Parser)]
#[command(
    name = "deskrun",
    about = "deskrun CLI — multi-ticker analysis pipeline runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of tickers through the stage pipeline.
    Run {
        /// Tickers to analyze (e.g., NVDA AAPL TSLA).
        #[arg(required = true)]
        tickers: Vec<String>,

        /// Scheduling mode: single, loop, market-hours.
        #[arg(long, default_value = "single")]
        mode: String,

        /// Path to a TOML session config.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Concurrent ticker workers (overrides config).
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Loop interval in seconds (overrides config).
        #[arg(long)]
        interval: Option<u64>,

        /// Market-hour windows, e.g. "9:30,12:00,15:30" (overrides config).
        #[arg(long)]
        windows: Option<String>,

        /// Place scripted orders for actionable decisions.
        #[arg(long, default_value_t = false)]
        auto_execute: bool,

        /// Allow short recommendations.
        #[arg(long, default_value_t = false)]
        allow_shorts: bool,

        /// Loop/market-hours: stop after this many iterations.
        #[arg(long, default_value_t = 1)]
        iterations: u64,

        /// Per-stage delay in milliseconds for the scripted executor.
        #[arg(long, default_value_t = 50)]
        stage_delay_ms: u64,

        /// Print the final status snapshot as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Validate a TOML session config file.
    CheckConfig {
        /// Path to the TOML config.
        config: PathBuf,

        /// Also check mode-specific requirements: single, loop, market-hours.
        #[arg(long)]
        mode: Option<String>,
    },
    /// Parse market-hour windows and report today's schedule.
    Windows {
        /// Comma-separated times, e.g. "9:30,12:00,15:30".
        spec: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            tickers,
            mode,
            config,
            max_parallel,
            interval,
            windows,
            auto_execute,
            allow_shorts,
            iterations,
            stage_delay_ms,
            json,
        } => run_session(
            tickers,
            &mode,
            config,
            max_parallel,
            interval,
            windows,
            auto_execute,
            allow_shorts,
            iterations,
            stage_delay_ms,
            json,
        ),
        Commands::CheckConfig { config, mode } => check_config(&config, mode.as_deref()),
        Commands::Windows { spec } => show_windows(&spec),
    }
}

fn parse_mode(name: &str) -> Result<RunMode> {
    match name {
        "single" => Ok(RunMode::Single),
        "loop" => Ok(RunMode::Loop),
        "market-hours" | "market_hours" => Ok(RunMode::MarketHours),
        _ => bail!("unknown mode '{name}'. Valid: single, loop, market-hours"),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_session(
    tickers: Vec<String>,
    mode: &str,
    config_path: Option<PathBuf>,
    max_parallel: Option<usize>,
    interval: Option<u64>,
    windows: Option<String>,
    auto_execute: bool,
    allow_shorts: bool,
    iterations: u64,
    stage_delay_ms: u64,
    json: bool,
) -> Result<()> {
    let mode = parse_mode(mode)?;

    let mut config = match config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path.display()))?;
            SessionConfig::from_toml_str(&raw)?
        }
        None => SessionConfig::default(),
    };
    if let Some(n) = max_parallel {
        config.max_parallel = n;
    }
    if let Some(secs) = interval {
        config.loop_interval_secs = secs;
    }
    if let Some(spec) = windows {
        config.market_hour_windows = market_hours::parse_windows(&spec)?;
    }
    config.pipeline.auto_execute = auto_execute;
    config.pipeline.allow_shorts = allow_shorts;

    let ids: Vec<TickerId> = tickers.iter().map(|t| TickerId::new(t)).collect();
    let executor =
        ScriptedExecutor::new().with_stage_delay(Duration::from_millis(stage_delay_ms));
    let broker = Arc::new(ScriptedBroker::new());
    let orders: Arc<dyn deskrun_core::OrderExecutor> = broker.clone();
    let driver = RunDriver::new(Arc::new(executor), orders);

    driver.start(&ids, mode, config)?;
    println!("Session started: {} ticker(s), mode {mode}", ids.len());

    // Poll until the requested number of iterations has completed, then
    // stop; single mode just waits for idle.
    let mut last_phases = String::new();
    loop {
        std::thread::sleep(Duration::from_millis(100));
        let snapshot = driver.status();

        let phases: Vec<String> = snapshot
            .tickers
            .iter()
            .map(|(t, s)| format!("{t}:{}", phase_label(&s.phase)))
            .collect();
        let line = phases.join("  ");
        if line != last_phases && !json {
            println!("  {line}");
            last_phases = line;
        }

        if snapshot.session.status == SessionStatus::Idle {
            break;
        }
        if mode != RunMode::Single && snapshot.session.iteration >= iterations {
            driver.stop()?;
            let deadline = Instant::now() + Duration::from_secs(120);
            while driver.status().session.status != SessionStatus::Idle {
                if Instant::now() > deadline {
                    bail!("session did not stop within 120s");
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            break;
        }
    }

    let snapshot = driver.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!();
    println!("=== Session Result ===");
    println!("Iterations:     {}", snapshot.session.iteration);
    for (ticker, state) in &snapshot.tickers {
        let decision = state
            .reports
            .iter()
            .rev()
            .find_map(|(_, r)| r.decision.as_ref())
            .map(|d| {
                format!(
                    "{} ({:.0}% confidence)",
                    d.action.label(allow_shorts),
                    d.confidence * 100.0
                )
            })
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<8} {:<10} decision: {}",
            ticker.as_str(),
            phase_label(&state.phase),
            decision
        );
        if let Some(error) = &state.error {
            println!("         error: {error}");
        }
    }
    let orders = broker.placed_orders();
    if !orders.is_empty() {
        println!();
        println!("--- Orders ---");
        for order in &orders {
            println!(
                "{:<12} {:?} ${:.2}",
                order.order_id, order.action, order.notional
            );
        }
    }
    println!();
    println!("Tool calls recorded: {}", snapshot.recent_tool_calls.len());
    Ok(())
}

fn phase_label(phase: &TickerPhase) -> String {
    match phase {
        TickerPhase::Pending => "pending".into(),
        TickerPhase::InStage(stage) => stage.name().to_string(),
        TickerPhase::Done => "done".into(),
        TickerPhase::Stopped => "stopped".into(),
        TickerPhase::Failed => "failed".into(),
    }
}

fn check_config(path: &PathBuf, mode: Option<&str>) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config = SessionConfig::from_toml_str(&raw)?;
    if let Some(mode) = mode {
        config.validate(Some(parse_mode(mode)?))?;
    }
    println!("OK: {}", path.display());
    println!("  max_parallel:  {}", config.max_parallel);
    println!("  loop interval: {}s", config.loop_interval_secs);
    println!(
        "  analysts:      {}",
        config
            .pipeline
            .analysts
            .iter()
            .map(|a| a.abbrev())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  rounds:        {} debate / {} risk",
        config.pipeline.debate_rounds, config.pipeline.risk_rounds
    );
    println!("  auto-execute:  {}", config.pipeline.auto_execute);
    Ok(())
}

fn show_windows(spec: &str) -> Result<()> {
    let windows = market_hours::parse_windows(spec)?;
    let now = Local::now().naive_local();
    let today = now.date();

    println!("Windows ({}):", windows.len());
    for window in &windows {
        println!("  {}", window.format("%H:%M"));
    }
    if market_hours::is_trading_day(today) {
        println!("Today ({today}) is a trading day.");
    } else {
        println!("Today ({today}) is not a trading day.");
    }
    match market_hours::next_window(now, &windows) {
        Some(next) => println!("Next launch: {}", next.format("%Y-%m-%d %H:%M")),
        None => println!("No upcoming window in the next 30 days."),
    }
    Ok(())
}
