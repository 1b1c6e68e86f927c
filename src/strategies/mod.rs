pub mod mean_reversion;
pub mod momentum;
pub mod random_baseline;
pub mod rsi;
pub mod types;

#[cfg(test)]
pub mod testutil;

use anyhow::bail;
use chrono::{DateTime, Utc};

use crate::config::StrategiesConfig;
use crate::data::types::PriceBar;
use crate::execution::types::Trade;
use crate::strategies::types::Signal;

/// Prices this close to resolution are untradeable: the market has
/// effectively decided and fees eat any remaining edge.
pub const MIN_TRADEABLE_PRICE: f64 = 0.01;
pub const MAX_TRADEABLE_PRICE: f64 = 0.99;

pub fn price_is_tradeable(price: f64) -> bool {
    price > MIN_TRADEABLE_PRICE && price < MAX_TRADEABLE_PRICE
}

/// A trading strategy observes one token's price series and emits at most
/// one signal per bar. `history` never includes the current bar; the
/// current quote arrives separately so a strategy cannot peek ahead.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn generate_signal(
        &mut self,
        token_id: &str,
        history: &[PriceBar],
        current_price: f64,
        current_time: DateTime<Utc>,
    ) -> Signal;

    /// Called after the risk gate and ledger accept a trade this strategy
    /// signalled. Default is to ignore it.
    fn on_trade_executed(&mut self, _trade: &Trade) {}
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn generate_signal(
        &mut self,
        token_id: &str,
        history: &[PriceBar],
        current_price: f64,
        current_time: DateTime<Utc>,
    ) -> Signal {
        (**self).generate_signal(token_id, history, current_price, current_time)
    }

    fn on_trade_executed(&mut self, trade: &Trade) {
        (**self).on_trade_executed(trade)
    }
}

/// Build a strategy by its config name.
pub fn build_strategy(name: &str, config: &StrategiesConfig) -> anyhow::Result<Box<dyn Strategy>> {
    match name {
        "momentum" => Ok(Box::new(momentum::MomentumStrategy::new(&config.momentum))),
        "mean_reversion" => Ok(Box::new(mean_reversion::MeanReversionStrategy::new(
            &config.mean_reversion,
        ))),
        "rsi" => Ok(Box::new(rsi::RsiStrategy::new(&config.rsi))),
        "random_baseline" => Ok(Box::new(random_baseline::RandomBaselineStrategy::new(
            &config.random_baseline,
        ))),
        other => bail!("unknown strategy '{other}' (expected momentum, mean_reversion, rsi, or random_baseline)"),
    }
}
