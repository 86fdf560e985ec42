use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use swingbot::execution::{JsonlSink, TradeSink};
use swingbot::replay::{MarketScenario, ReplayRunner, ReplaySettings, ReplaySummary};
use swingbot::AppConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "swingbot=info,swingbot::confluence=debug";

#[derive(Parser)]
#[command(name = "swingbot", version, about = "Multi-timeframe swing capture pipeline")]
struct Cli {
    /// Configuration file (defaults to ./swingbot.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the state machine over a seeded synthetic 5m series with a paper exchange
    Replay {
        #[arg(long, value_enum, default_value = "swings")]
        scenario: MarketScenario,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 600)]
        bars: usize,
        /// Leverage requested for every entry
        #[arg(long)]
        leverage: Option<f64>,
        /// Append closed trades as JSON lines
        #[arg(long)]
        trades_out: Option<PathBuf>,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Replay {
            scenario,
            seed,
            bars,
            leverage,
            trades_out,
        } => {
            let settings = ReplaySettings {
                scenario,
                seed,
                bars,
                leverage: leverage.unwrap_or(config.risk.default_leverage),
                ..ReplaySettings::default()
            };
            let summary = ReplayRunner::new(config, settings).run().await?;

            if let Some(path) = trades_out {
                let sink = JsonlSink::new(&path);
                for trade in &summary.trades {
                    sink.record(trade)?;
                }
                tracing::info!(path = %path.display(), trades = summary.trades.len(), "trade records written");
            }
            print_report(scenario, seed, &summary);
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

// ============================================================================
// Reporting
// ============================================================================

fn print_report(scenario: MarketScenario, seed: u64, summary: &ReplaySummary) {
    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║              SWINGBOT REPLAY                          ║");
    println!("╚═══════════════════════════════════════════════════════╝");
    println!("   Scenario: {scenario:?}  Seed: {seed}  Bars: {}", summary.bars);

    println!("\n📡 Signals ({}):", summary.signals.len());
    println!(
        "{:<6} {:>10} {:>10} {:>10} {:>10} {:>5} {:>8} {:>8}",
        "Side", "Entry", "Stop", "TP1", "TP3", "Tier", "Regime", "Score"
    );
    println!("{}", "─".repeat(74));
    for signal in &summary.signals {
        println!(
            "{:<6} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>5} {:>8} {:>8.1}",
            signal.side.to_string(),
            signal.entry,
            signal.stop_loss,
            signal.tp1,
            signal.tp3,
            signal.tier.to_string(),
            signal.regime.to_string(),
            signal.confluence_score
        );
    }

    println!("\n💼 Trades ({}):", summary.trades.len());
    println!(
        "{:<6} {:>10} {:>10} {:>10} {:>8} {:>8} {:<14}",
        "Side", "Entry", "Exit", "P&L", "R", "Hold(m)", "Exit reason"
    );
    println!("{}", "─".repeat(74));
    for trade in &summary.trades {
        println!(
            "{:<6} {:>10.4} {:>10.4} {:>10.2} {:>8.2} {:>8} {:<14}",
            trade.signal.side.to_string(),
            trade.execution.entry_price,
            trade.exit.average_exit_price,
            trade.performance.realized_pnl,
            trade.performance.r_multiple,
            trade.performance.hold_minutes,
            format!("{:?}", trade.exit.reason)
        );
    }

    let counters = &summary.status.counters;
    let metrics = &summary.metrics;
    println!("\n📊 Pipeline:");
    println!("   Final state: {}", summary.status.state);
    println!(
        "   Candidates: {} detected, {} expired",
        counters.candidates_detected, counters.candidates_expired
    );
    println!(
        "   Micro: {} confirmed, {} rejected, {} vetoes",
        counters.micro_confirms, counters.micro_rejects, counters.vetoes
    );
    println!(
        "   Executions: {}  Entries rejected: {}  Orders: {}  Resets: {}",
        counters.executions, summary.entries_rejected, summary.orders_submitted, counters.resets
    );

    println!("\n📈 Performance:");
    println!("   Total P&L: ${:.2}", metrics.total_pnl);
    println!(
        "   Win rate: {:.1}% ({}W / {}L)",
        metrics.win_rate, metrics.winning_trades, metrics.losing_trades
    );
    println!("   Avg R: {:.2}  Profit factor: {:.2}", metrics.avg_r_multiple, metrics.profit_factor);
    println!("   Max drawdown: ${:.2}", metrics.max_drawdown);
    println!("\n═══════════════════════════════════════════════════════\n");
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
