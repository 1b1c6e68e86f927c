use std::fmt;

use serde::{Deserialize, Serialize};

use crate::execution::types::Trade;
use crate::strategies::types::Action;

/// Annualization factor for Sharpe: history bars arrive at 12-hour
/// fidelity, so one year holds 730 of them.
const PERIODS_PER_YEAR: f64 = 730.0;

/// Session performance summary; also embedded in the live snapshot as
/// the running score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryMetrics {
    pub starting_cash: f64,
    pub final_value: f64,
    pub total_return_pct: f64,
    pub num_trades: usize,
    pub num_round_trips: usize,
    pub win_rate_pct: f64,
    pub avg_pnl_per_round_trip: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
}

impl SummaryMetrics {
    /// Compute the summary from the per-bar equity curve and the trade
    /// log. `equity_curve` holds portfolio value after each bar,
    /// including the final liquidation value.
    pub fn compute(starting_cash: f64, equity_curve: &[f64], trades: &[Trade]) -> Self {
        let final_value = equity_curve.last().copied().unwrap_or(starting_cash);
        let total_return_pct = if starting_cash > 0.0 {
            (final_value - starting_cash) / starting_cash * 100.0
        } else {
            0.0
        };

        let round_trips: Vec<&Trade> = trades
            .iter()
            .filter(|t| t.action == Action::Sell)
            .collect();
        let num_round_trips = round_trips.len();
        let wins = round_trips.iter().filter(|t| t.pnl > 0.0).count();
        let win_rate_pct = if num_round_trips > 0 {
            wins as f64 / num_round_trips as f64 * 100.0
        } else {
            0.0
        };
        let avg_pnl_per_round_trip = if num_round_trips > 0 {
            round_trips.iter().map(|t| t.pnl).sum::<f64>() / num_round_trips as f64
        } else {
            0.0
        };

        Self {
            starting_cash,
            final_value,
            total_return_pct,
            num_trades: trades.len(),
            num_round_trips,
            win_rate_pct,
            avg_pnl_per_round_trip,
            sharpe_ratio: sharpe_ratio(equity_curve),
            max_drawdown_pct: max_drawdown_pct(equity_curve),
        }
    }
}

/// Annualized Sharpe over per-bar portfolio returns, zero risk-free
/// rate. Returns 0.0 when there are fewer than two returns or no
/// variance to normalize by.
fn sharpe_ratio(equity_curve: &[f64]) -> f64 {
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|pair| pair[0] > 0.0)
        .map(|pair| pair[1] / pair[0] - 1.0)
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    // Sample standard deviation (n-1 denominator).
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    if std < 1e-12 {
        return 0.0;
    }
    mean / std * PERIODS_PER_YEAR.sqrt()
}

/// Largest peak-to-trough decline of the equity curve, as a positive
/// percentage of the peak.
fn max_drawdown_pct(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for &value in equity_curve {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let drawdown = (peak - value) / peak * 100.0;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

impl fmt::Display for SummaryMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== Session Summary =====")?;
        writeln!(f, "Starting cash:   ${:.2}", self.starting_cash)?;
        writeln!(f, "Final value:     ${:.2}", self.final_value)?;
        writeln!(f, "Total return:    {:+.2}%", self.total_return_pct)?;
        writeln!(f, "Trades:          {} ({} round trips)", self.num_trades, self.num_round_trips)?;
        writeln!(f, "Win rate:        {:.1}%", self.win_rate_pct)?;
        writeln!(f, "Avg PnL/trip:    ${:+.2}", self.avg_pnl_per_round_trip)?;
        writeln!(f, "Sharpe (ann.):   {:.2}", self.sharpe_ratio)?;
        write!(f, "Max drawdown:    {:.2}%", self.max_drawdown_pct)
    }
}
