use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::execution::types::{Position, Trade};
use crate::strategies::types::{Action, Signal};

/// Simulated brokerage account: cash, open positions, and the append-only
/// trade log. All currency values are USDC-equivalent.
///
/// Invariant after every mutation:
/// `total_value(prices) == cash + total_exposure(prices)`.
#[derive(Debug)]
pub struct Ledger {
    cash: f64,
    starting_cash: f64,
    fee_rate: f64,
    /// Keyed by token id; at most one position per token.
    positions: HashMap<String, Position>,
    trade_log: Vec<Trade>,
}

impl Ledger {
    pub fn new(starting_cash: f64, fee_rate: f64) -> Self {
        Self {
            cash: starting_cash,
            starting_cash,
            fee_rate,
            positions: HashMap::new(),
            trade_log: Vec::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn starting_cash(&self) -> f64 {
        self.starting_cash
    }

    pub fn position(&self, token_id: &str) -> Option<&Position> {
        self.positions.get(token_id)
    }

    pub fn has_position(&self, token_id: &str) -> bool {
        self.positions.contains_key(token_id)
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn trade_log(&self) -> &[Trade] {
        &self.trade_log
    }

    /// Current market value of all open positions. Tokens without a fresh
    /// price fall back to their cost basis.
    pub fn total_exposure(&self, current_prices: &HashMap<String, f64>) -> f64 {
        self.positions
            .values()
            .map(|pos| {
                let price = current_prices
                    .get(&pos.token_id)
                    .copied()
                    .unwrap_or(pos.avg_cost);
                pos.value_at(price)
            })
            .sum()
    }

    /// Cash plus the market value of all open positions.
    pub fn total_value(&self, current_prices: &HashMap<String, f64>) -> f64 {
        self.cash + self.total_exposure(current_prices)
    }

    /// Buy as many shares as `spend_amount` buys at the signal price.
    /// Merges into an existing position using a volume-weighted average
    /// cost. Returns `None` (and records nothing) when the price is invalid
    /// or cash cannot cover spend plus fee.
    pub fn execute_buy(
        &mut self,
        signal: &Signal,
        market_slug: &str,
        spend_amount: f64,
        timestamp: DateTime<Utc>,
    ) -> Option<Trade> {
        let price = signal.price;
        if price <= 0.0 {
            debug!(token = %signal.token_id, price, "BUY rejected: invalid price");
            return None;
        }

        let fee = spend_amount * self.fee_rate;
        let total_cost = spend_amount + fee;

        if total_cost > self.cash {
            debug!(
                token = %signal.token_id,
                need = total_cost,
                have = self.cash,
                "BUY rejected: insufficient cash"
            );
            return None;
        }

        let shares = spend_amount / price;
        self.cash -= total_cost;

        match self.positions.get_mut(&signal.token_id) {
            Some(pos) => {
                let total_shares = pos.shares + shares;
                let total_spent = pos.shares * pos.avg_cost + spend_amount;
                pos.avg_cost = total_spent / total_shares;
                pos.shares = total_shares;
            }
            None => {
                self.positions.insert(
                    signal.token_id.clone(),
                    Position {
                        token_id: signal.token_id.clone(),
                        outcome: signal.outcome,
                        market_slug: market_slug.to_string(),
                        shares,
                        avg_cost: price,
                        opened_at: timestamp,
                    },
                );
            }
        }

        let trade = Trade {
            token_id: signal.token_id.clone(),
            market_slug: market_slug.to_string(),
            action: Action::Buy,
            outcome: signal.outcome,
            shares,
            price,
            fee,
            total_cost,
            timestamp,
            pnl: 0.0,
        };
        self.trade_log.push(trade.clone());
        Some(trade)
    }

    /// Sell the ENTIRE held quantity for the signal's token. Partial sells
    /// are not supported; this sidesteps partial-fill cost-basis
    /// accounting. Returns `None` when no position is open, which also
    /// guards against double-execution of the same SELL signal.
    pub fn execute_sell(
        &mut self,
        signal: &Signal,
        market_slug: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<Trade> {
        let pos = match self.positions.remove(&signal.token_id) {
            Some(pos) => pos,
            None => {
                debug!(token = %signal.token_id, "SELL rejected: no open position");
                return None;
            }
        };

        let price = signal.price;
        let proceeds = pos.shares * price;
        let fee = proceeds * self.fee_rate;
        let net_proceeds = proceeds - fee;
        let cost_basis = pos.shares * pos.avg_cost;
        let pnl = net_proceeds - cost_basis;

        self.cash += net_proceeds;

        let trade = Trade {
            token_id: signal.token_id.clone(),
            market_slug: market_slug.to_string(),
            action: Action::Sell,
            outcome: pos.outcome,
            shares: pos.shares,
            price,
            fee,
            total_cost: -net_proceeds,
            timestamp,
            pnl,
        };
        self.trade_log.push(trade.clone());
        Some(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::types::{Action, Outcome};

    const FEE: f64 = 0.002;

    fn signal(action: Action, token: &str, price: f64) -> Signal {
        Signal {
            action,
            token_id: token.to_string(),
            outcome: Outcome::Yes,
            price,
            confidence: 1.0,
            reason: "test".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_buy_opens_position_and_debits_cash() {
        let mut ledger = Ledger::new(1000.0, FEE);
        let sig = signal(Action::Buy, "tok", 0.50);

        let trade = ledger.execute_buy(&sig, "mkt", 100.0, now()).unwrap();

        assert_eq!(trade.action, Action::Buy);
        assert!((trade.shares - 200.0).abs() < 1e-9);
        assert!((trade.fee - 0.20).abs() < 1e-9);
        assert!((trade.total_cost - 100.20).abs() < 1e-9);
        assert_eq!(trade.pnl, 0.0);
        assert!((ledger.cash() - 899.80).abs() < 1e-9);

        let pos = ledger.position("tok").unwrap();
        assert!((pos.shares - 200.0).abs() < 1e-9);
        assert!((pos.avg_cost - 0.50).abs() < 1e-9);
    }

    #[test]
    fn test_buy_merges_with_volume_weighted_average() {
        let mut ledger = Ledger::new(1000.0, FEE);
        ledger
            .execute_buy(&signal(Action::Buy, "tok", 0.50), "mkt", 100.0, now())
            .unwrap();
        ledger
            .execute_buy(&signal(Action::Buy, "tok", 0.25), "mkt", 100.0, now())
            .unwrap();

        let pos = ledger.position("tok").unwrap();
        // 200 shares @ 0.50 + 400 shares @ 0.25 -> 600 shares, $200 spent.
        assert!((pos.shares - 600.0).abs() < 1e-9);
        assert!((pos.avg_cost - 200.0 / 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_buy_rejected_on_insufficient_cash() {
        let mut ledger = Ledger::new(50.0, FEE);
        let sig = signal(Action::Buy, "tok", 0.50);

        // 100 + fee > 50 cash.
        assert!(ledger.execute_buy(&sig, "mkt", 100.0, now()).is_none());
        assert_eq!(ledger.trade_log().len(), 0);
        assert_eq!(ledger.cash(), 50.0);
        assert!(!ledger.has_position("tok"));
    }

    #[test]
    fn test_buy_rejected_on_nonpositive_price() {
        let mut ledger = Ledger::new(1000.0, FEE);
        assert!(ledger
            .execute_buy(&signal(Action::Buy, "tok", 0.0), "mkt", 100.0, now())
            .is_none());
        assert!(ledger
            .execute_buy(&signal(Action::Buy, "tok", -0.1), "mkt", 100.0, now())
            .is_none());
        assert_eq!(ledger.trade_log().len(), 0);
    }

    #[test]
    fn test_sell_liquidates_entire_position() {
        let mut ledger = Ledger::new(1000.0, FEE);
        ledger
            .execute_buy(&signal(Action::Buy, "tok", 0.50), "mkt", 100.0, now())
            .unwrap();

        let trade = ledger
            .execute_sell(&signal(Action::Sell, "tok", 0.75), "mkt", now())
            .unwrap();

        assert_eq!(trade.action, Action::Sell);
        assert!((trade.shares - 200.0).abs() < 1e-9);
        // proceeds 150, fee 0.30, net 149.70, basis 100 -> pnl 49.70
        assert!((trade.pnl - 49.70).abs() < 1e-9);
        assert!(trade.total_cost < 0.0);
        assert!(!ledger.has_position("tok"));
    }

    #[test]
    fn test_sell_without_position_rejected_and_double_sell_fails() {
        let mut ledger = Ledger::new(1000.0, FEE);
        let sell = signal(Action::Sell, "tok", 0.50);
        assert!(ledger.execute_sell(&sell, "mkt", now()).is_none());

        ledger
            .execute_buy(&signal(Action::Buy, "tok", 0.50), "mkt", 100.0, now())
            .unwrap();
        assert!(ledger.execute_sell(&sell, "mkt", now()).is_some());
        // Second sell of the same signal: position is gone.
        assert!(ledger.execute_sell(&sell, "mkt", now()).is_none());
    }

    #[test]
    fn test_round_trip_costs_exactly_the_fees() {
        let mut ledger = Ledger::new(1000.0, FEE);
        let buy = signal(Action::Buy, "tok", 0.40);
        let bought = ledger.execute_buy(&buy, "mkt", 200.0, now()).unwrap();
        let sold = ledger
            .execute_sell(&signal(Action::Sell, "tok", 0.40), "mkt", now())
            .unwrap();

        // Unchanged price: PnL on the sell is exactly -sell_fee, and total
        // cash lost over the round trip is buy_fee + sell_fee.
        assert!((sold.pnl + sold.fee).abs() < 1e-9);
        let lost = 1000.0 - ledger.cash();
        assert!((lost - (bought.fee + sold.fee)).abs() < 1e-9);
        assert_eq!(ledger.open_position_count(), 0);
    }

    #[test]
    fn test_valuation_identity_and_avg_cost_fallback() {
        let mut ledger = Ledger::new(1000.0, FEE);
        ledger
            .execute_buy(&signal(Action::Buy, "a", 0.50), "m1", 100.0, now())
            .unwrap();
        ledger
            .execute_buy(&signal(Action::Buy, "b", 0.20), "m2", 50.0, now())
            .unwrap();

        let mut prices = HashMap::new();
        prices.insert("a".to_string(), 0.60);
        // No price for "b": falls back to its 0.20 cost basis.

        let exposure = ledger.total_exposure(&prices);
        let expected = 200.0 * 0.60 + 250.0 * 0.20;
        assert!((exposure - expected).abs() < 1e-9);
        assert!((ledger.total_value(&prices) - (ledger.cash() + exposure)).abs() < 1e-9);
    }
}
