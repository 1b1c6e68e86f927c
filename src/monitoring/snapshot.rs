use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::ledger::Ledger;
use crate::execution::types::Trade;
use crate::metrics::SummaryMetrics;
use crate::strategies::types::{Action, Outcome, Signal};

/// Trades kept in the snapshot, newest first.
const RECENT_TRADES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Starting,
    Running,
    Liquidating,
    Stopped,
}

/// Most recent strategy verdict for one token, kept even when it was a
/// HOLD so the status view shows what the strategy is thinking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalView {
    pub token_id: String,
    pub action: Action,
    pub outcome: Outcome,
    pub price: f64,
    pub confidence: f64,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
}

impl SignalView {
    pub fn from_signal(signal: &Signal, updated_at: DateTime<Utc>) -> Self {
        Self {
            token_id: signal.token_id.clone(),
            action: signal.action,
            outcome: signal.outcome,
            price: signal.price,
            confidence: signal.confidence,
            reason: signal.reason.clone(),
            updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionView {
    pub token_id: String,
    pub market_slug: String,
    pub shares: f64,
    pub avg_cost: f64,
    pub current_price: f64,
    pub unrealized_pnl: f64,
}

/// Point-in-time view of a running session, written to disk so a
/// separate status command can inspect live sessions without attaching
/// to the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub instance: String,
    pub strategy: String,
    pub mode: String,
    pub phase: SessionPhase,
    pub updated_at: DateTime<Utc>,
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
    pub tick: u64,
    pub cash: f64,
    pub total_value: f64,
    pub total_return_pct: f64,
    pub num_trades: usize,
    pub open_positions: Vec<PositionView>,
    /// Last verdict per watched token, sorted by token id.
    pub latest_signals: Vec<SignalView>,
    /// Newest first.
    pub recent_trades: Vec<Trade>,
    pub equity_curve: Vec<f64>,
    /// Running score; absent until the session has two equity samples.
    pub running: Option<SummaryMetrics>,
}

impl SessionSnapshot {
    pub fn capture(
        instance: &str,
        strategy: &str,
        mode: &str,
        phase: SessionPhase,
        session_start: DateTime<Utc>,
        session_end: DateTime<Utc>,
        ledger: &Ledger,
        current_prices: &HashMap<String, f64>,
        equity_curve: &[f64],
        latest_signals: &HashMap<String, SignalView>,
    ) -> Self {
        let total_value = ledger.total_value(current_prices);
        let total_return_pct = if ledger.starting_cash() > 0.0 {
            (total_value - ledger.starting_cash()) / ledger.starting_cash() * 100.0
        } else {
            0.0
        };

        let open_positions = ledger
            .open_positions()
            .map(|pos| {
                let price = current_prices
                    .get(&pos.token_id)
                    .copied()
                    .unwrap_or(pos.avg_cost);
                PositionView {
                    token_id: pos.token_id.clone(),
                    market_slug: pos.market_slug.clone(),
                    shares: pos.shares,
                    avg_cost: pos.avg_cost,
                    current_price: price,
                    unrealized_pnl: pos.unrealized_pnl(price),
                }
            })
            .collect();

        let recent_trades: Vec<Trade> = ledger
            .trade_log()
            .iter()
            .rev()
            .take(RECENT_TRADES)
            .cloned()
            .collect();
        let running = (equity_curve.len() >= 2).then(|| {
            SummaryMetrics::compute(ledger.starting_cash(), equity_curve, ledger.trade_log())
        });

        let mut latest_signals: Vec<SignalView> = latest_signals.values().cloned().collect();
        latest_signals.sort_by(|a, b| a.token_id.cmp(&b.token_id));

        Self {
            instance: instance.to_string(),
            strategy: strategy.to_string(),
            mode: mode.to_string(),
            phase,
            updated_at: Utc::now(),
            session_start,
            session_end,
            tick: equity_curve.len() as u64,
            cash: ledger.cash(),
            total_value,
            total_return_pct,
            num_trades: ledger.trade_log().len(),
            open_positions,
            latest_signals,
            recent_trades,
            equity_curve: equity_curve.to_vec(),
            running,
        }
    }
}

/// Writes snapshots atomically: a status reader never sees a torn file
/// because the JSON lands in a temp file first and is renamed over the
/// target.
pub struct SnapshotWriter {
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn write(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move snapshot into {}", self.path.display()))?;
        Ok(())
    }
}

pub fn load_snapshot(path: impl Into<PathBuf>) -> Result<SessionSnapshot> {
    let path = path.into();
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("no snapshot at {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("corrupt snapshot at {}", path.display()))
}
