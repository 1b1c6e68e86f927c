use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::execution::ledger::Ledger;
use crate::execution::types::Trade;
use crate::strategies::types::Signal;

/// Where approved trades go. The simulated executor fills against the
/// ledger instantly at the signal price; a real order-router would
/// implement this trait against an exchange API instead.
#[async_trait]
pub trait TradeExecutor: Send {
    fn ledger(&self) -> &Ledger;

    async fn buy(
        &mut self,
        signal: &Signal,
        market_slug: &str,
        spend_amount: f64,
        timestamp: DateTime<Utc>,
    ) -> Option<Trade>;

    async fn sell(
        &mut self,
        signal: &Signal,
        market_slug: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<Trade>;
}

/// Paper executor: every order fills in full at the quoted price, with
/// fees, against an in-memory ledger. No slippage model.
pub struct SimulatedExecutor {
    ledger: Ledger,
}

impl SimulatedExecutor {
    pub fn new(starting_cash: f64, fee_rate: f64) -> Self {
        Self {
            ledger: Ledger::new(starting_cash, fee_rate),
        }
    }
}

#[async_trait]
impl TradeExecutor for SimulatedExecutor {
    fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    async fn buy(
        &mut self,
        signal: &Signal,
        market_slug: &str,
        spend_amount: f64,
        timestamp: DateTime<Utc>,
    ) -> Option<Trade> {
        self.ledger
            .execute_buy(signal, market_slug, spend_amount, timestamp)
    }

    async fn sell(
        &mut self,
        signal: &Signal,
        market_slug: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<Trade> {
        self.ledger.execute_sell(signal, market_slug, timestamp)
    }
}
