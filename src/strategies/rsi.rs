use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::config::RsiConfig;
use crate::data::types::PriceBar;
use crate::execution::types::Trade;
use crate::strategies::types::{Action, Outcome, Signal};
use crate::strategies::{price_is_tradeable, Strategy};

/// Relative Strength Index with Wilder smoothing. Buys oversold tokens,
/// exits held ones once they read overbought.
pub struct RsiStrategy {
    period: usize,
    oversold: f64,
    overbought: f64,
    held: HashSet<String>,
}

impl RsiStrategy {
    pub fn new(config: &RsiConfig) -> Self {
        Self {
            period: config.period,
            oversold: config.oversold,
            overbought: config.overbought,
            held: HashSet::new(),
        }
    }
}

/// Wilder RSI over a price series. Seeds the averages with a simple mean
/// of the first `period` changes, then applies the smoothing recursion.
/// Needs at least `period + 1` prices.
fn wilder_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = prices.windows(2).map(|pair| pair[1] - pair[0]).collect();

    let mut avg_gain = changes[..period].iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss = changes[..period]
        .iter()
        .filter(|c| **c < 0.0)
        .map(|c| -c)
        .sum::<f64>()
        / period as f64;

    for change in &changes[period..] {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss < 1e-12 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

impl Strategy for RsiStrategy {
    fn name(&self) -> &str {
        "rsi"
    }

    fn generate_signal(
        &mut self,
        token_id: &str,
        history: &[PriceBar],
        current_price: f64,
        _current_time: DateTime<Utc>,
    ) -> Signal {
        let mut prices: Vec<f64> = history.iter().map(|bar| bar.price).collect();
        prices.push(current_price);

        let rsi = match wilder_rsi(&prices, self.period) {
            Some(rsi) => rsi,
            None => return Signal::hold(token_id, current_price, "insufficient history"),
        };

        if self.held.contains(token_id) && rsi > self.overbought {
            return Signal {
                action: Action::Sell,
                token_id: token_id.to_string(),
                outcome: Outcome::Yes,
                price: current_price,
                confidence: ((rsi - self.overbought) / (100.0 - self.overbought)).min(1.0),
                reason: format!("overbought (RSI={rsi:.1})"),
            };
        }

        if rsi < self.oversold && price_is_tradeable(current_price) {
            return Signal {
                action: Action::Buy,
                token_id: token_id.to_string(),
                outcome: Outcome::Yes,
                price: current_price,
                confidence: ((self.oversold - rsi) / self.oversold).min(1.0),
                reason: format!("oversold (RSI={rsi:.1})"),
            };
        }

        Signal::hold(token_id, current_price, format!("RSI={rsi:.1} neutral"))
    }

    fn on_trade_executed(&mut self, trade: &Trade) {
        match trade.action {
            Action::Buy => {
                self.held.insert(trade.token_id.clone());
            }
            Action::Sell => {
                self.held.remove(&trade.token_id);
            }
            Action::Hold => {}
        }
    }
}
