mod config;
mod data;
mod engine;
mod execution;
mod metrics;
mod monitoring;
mod strategies;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, EnvConfig, Mode};
use crate::data::provider::{PolymarketProvider, PriceProvider};
use crate::data::storage::DataStore;
use crate::engine::backtest::{load_series, HistoricalStepper};
use crate::engine::paper::LiveStepper;
use crate::engine::rolling::RollingStepper;
use crate::engine::CancelToken;
use crate::monitoring::logger::TradeLogger;
use crate::monitoring::snapshot::{load_snapshot, SnapshotWriter};
use crate::strategies::build_strategy;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("status") => {
            let config_path = args.get(1).map(String::as_str).unwrap_or("config.toml");
            print_status(config_path)
        }
        Some(config_path) => run_session(config_path).await,
        None => run_session("config.toml").await,
    }
}

async fn run_session(config_path: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let env = EnvConfig::load();
    let store = DataStore::new(&config.session.data_dir)?;
    let strategy = build_strategy(&config.session.strategy, &config.strategies)?;
    info!(
        strategy = %config.session.strategy,
        mode = ?config.session.mode,
        starting_cash = config.session.starting_cash,
        "starting session"
    );

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested, finishing current tick");
                cancel.cancel();
            }
        });
    }

    let metrics = match config.session.mode {
        Mode::Backtest => {
            let provider = PolymarketProvider::new(&env, config.api.clone())?;
            let series = load_series(
                &provider,
                &store,
                config.session.num_markets,
                config.backtest.use_cache,
            )
            .await?;
            HistoricalStepper::new(strategy, &config.session, &config.risk, series)
                .run()
                .await
        }
        Mode::Paper => {
            let provider: Arc<dyn PriceProvider> =
                Arc::new(PolymarketProvider::new(&env, config.api.clone())?);
            let stepper = LiveStepper::new(
                provider,
                strategy,
                config.session.clone(),
                &config.risk,
                config.paper.clone(),
                SnapshotWriter::new(snapshot_path(&config)),
                TradeLogger::new(trades_path(&config))?,
            );
            stepper.run(cancel).await
        }
        Mode::Rolling => {
            let provider: Arc<dyn PriceProvider> =
                Arc::new(PolymarketProvider::new(&env, config.api.clone())?);
            let stepper = RollingStepper::new(
                provider,
                strategy,
                config.session.clone(),
                &config.risk,
                config.rolling.clone(),
                SnapshotWriter::new(snapshot_path(&config)),
                TradeLogger::new(trades_path(&config))?,
            );
            stepper.run(cancel).await
        }
    };

    match metrics {
        Some(metrics) => println!("{metrics}"),
        None => info!("nothing to report, session produced no results"),
    }
    Ok(())
}

fn snapshot_path(config: &Config) -> PathBuf {
    Path::new(&config.session.data_dir).join(format!("state_{}.json", config.session.instance()))
}

fn trades_path(config: &Config) -> PathBuf {
    Path::new(&config.session.data_dir).join(format!("{}_trades.csv", config.session.instance()))
}

/// Print the latest snapshot of a running (or finished) session.
fn print_status(config_path: &str) -> Result<()> {
    let config = Config::load(config_path)?;
    let snap = load_snapshot(snapshot_path(&config))
        .context("no session snapshot found, is a session running?")?;

    let elapsed = (snap.updated_at - snap.session_start).num_minutes();
    let remaining = (snap.session_end - snap.updated_at).num_minutes().max(0);
    println!("Session:    {} ({} / {:?})", snap.instance, snap.strategy, snap.phase);
    println!("Updated:    {}", snap.updated_at.to_rfc3339());
    println!("Time:       {elapsed} min elapsed, {remaining} min remaining");
    println!("Cash:       ${:.2}", snap.cash);
    println!("Value:      ${:.2} ({:+.2}%)", snap.total_value, snap.total_return_pct);
    println!("Trades:     {} (tick {})", snap.num_trades, snap.tick);
    if let Some(running) = &snap.running {
        println!(
            "Running:    sharpe {:.2}, max drawdown {:.2}%, win rate {:.1}%",
            running.sharpe_ratio, running.max_drawdown_pct, running.win_rate_pct
        );
    }
    if snap.open_positions.is_empty() {
        println!("Positions:  none");
    } else {
        println!("Positions:");
        for pos in &snap.open_positions {
            println!(
                "  {:<30} {:>10.2} sh @ {:.4} (now {:.4}, {:+.2} uPnL)",
                pos.market_slug, pos.shares, pos.avg_cost, pos.current_price, pos.unrealized_pnl
            );
        }
    }
    if !snap.latest_signals.is_empty() {
        println!("Signals:");
        for sig in &snap.latest_signals {
            println!(
                "  {:<24} {:?} @ {:.4} (conf {:.0}%) {}",
                sig.token_id,
                sig.action,
                sig.price,
                sig.confidence * 100.0,
                sig.reason
            );
        }
    }
    Ok(())
}
