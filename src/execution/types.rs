use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::strategies::types::{Action, Outcome};

/// A holding we currently own. Created on the first BUY of a token, removed
/// entirely on SELL. Owned and mutated exclusively by the Ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub token_id: String,
    pub outcome: Outcome,
    pub market_slug: String,
    pub shares: f64,
    /// Volume-weighted average price paid per share.
    pub avg_cost: f64,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    pub fn value_at(&self, price: f64) -> f64 {
        self.shares * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.avg_cost) * self.shares
    }
}

/// One executed BUY or SELL. Append-only: the trade log is the sole source
/// of truth for performance metrics and is never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub token_id: String,
    pub market_slug: String,
    pub action: Action,
    pub outcome: Outcome,
    pub shares: f64,
    pub price: f64,
    pub fee: f64,
    /// Cash spent including fee; negative on SELL (we received money).
    pub total_cost: f64,
    pub timestamp: DateTime<Utc>,
    /// Realized profit/loss; always 0.0 on BUY.
    pub pnl: f64,
}
