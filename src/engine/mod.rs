pub mod backtest;
pub mod paper;
pub mod rolling;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::execution::executor::TradeExecutor;
use crate::execution::types::Trade;
use crate::strategies::types::{Action, Signal};
use crate::strategies::Strategy;

/// Cooperative shutdown flag shared between the session loop and the
/// signal handler.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if cancelled. Returns false
    /// when the sleep was interrupted. Sliced so a Ctrl-C never waits
    /// out a full poll interval.
    pub async fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(250);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.is_cancelled() {
                return false;
            }
            let step = remaining.min(SLICE);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
        !self.is_cancelled()
    }
}

/// Close every open position at the best known price (falling back to
/// each position's average cost when no quote is available). Used at
/// session end so the final portfolio value is fully realized.
pub async fn liquidate_all<E: TradeExecutor, S: Strategy + ?Sized>(
    executor: &mut E,
    strategy: &mut S,
    current_prices: &HashMap<String, f64>,
    timestamp: DateTime<Utc>,
) -> Vec<Trade> {
    let open: Vec<(String, String, f64)> = executor
        .ledger()
        .open_positions()
        .map(|pos| {
            let price = current_prices
                .get(&pos.token_id)
                .copied()
                .unwrap_or(pos.avg_cost);
            (pos.token_id.clone(), pos.market_slug.clone(), price)
        })
        .collect();

    let mut trades = Vec::new();
    for (token_id, market_slug, price) in open {
        let signal = Signal {
            action: Action::Sell,
            token_id,
            outcome: crate::strategies::types::Outcome::Yes,
            price,
            confidence: 1.0,
            reason: "session close".to_string(),
        };
        if let Some(trade) = executor.sell(&signal, &market_slug, timestamp).await {
            info!(token = %trade.token_id, pnl = trade.pnl, "liquidated at session close");
            strategy.on_trade_executed(&trade);
            trades.push(trade);
        }
    }
    trades
}
