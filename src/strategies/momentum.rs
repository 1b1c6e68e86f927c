use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::config::MomentumConfig;
use crate::data::types::PriceBar;
use crate::execution::types::Trade;
use crate::strategies::types::{Action, Outcome, Signal};
use crate::strategies::{price_is_tradeable, Strategy};

/// Trend-follower: buys when every recent move is flat-or-up with at
/// least one genuine up-move, exits the moment the trend shows a
/// down-move. The window is the last `lookback` historical prices plus
/// the current quote.
pub struct MomentumStrategy {
    lookback: usize,
    held: HashSet<String>,
}

impl MomentumStrategy {
    pub fn new(config: &MomentumConfig) -> Self {
        Self {
            lookback: config.lookback,
            held: HashSet::new(),
        }
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn generate_signal(
        &mut self,
        token_id: &str,
        history: &[PriceBar],
        current_price: f64,
        _current_time: DateTime<Utc>,
    ) -> Signal {
        if history.len() < self.lookback {
            return Signal::hold(token_id, current_price, "insufficient history");
        }

        let start = history.len() - self.lookback;
        let mut window: Vec<f64> = history[start..].iter().map(|bar| bar.price).collect();
        window.push(current_price);

        let mut ups = 0usize;
        let mut downs = 0usize;
        for pair in window.windows(2) {
            if pair[1] > pair[0] {
                ups += 1;
            } else if pair[1] < pair[0] {
                downs += 1;
            }
        }

        if self.held.contains(token_id) && downs > 0 {
            return Signal {
                action: Action::Sell,
                token_id: token_id.to_string(),
                outcome: Outcome::Yes,
                price: current_price,
                confidence: downs as f64 / self.lookback as f64,
                reason: format!("momentum broken: {downs} down-move(s) in window"),
            };
        }

        if downs == 0 && ups > 0 && price_is_tradeable(current_price) {
            return Signal {
                action: Action::Buy,
                token_id: token_id.to_string(),
                outcome: Outcome::Yes,
                price: current_price,
                confidence: (ups as f64 / self.lookback as f64).min(1.0),
                reason: format!("upward momentum: {ups} up-move(s), no down-moves"),
            };
        }

        Signal::hold(token_id, current_price, "no clear trend")
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
