use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::RandomBaselineConfig;
use crate::data::types::PriceBar;
use crate::execution::types::Trade;
use crate::strategies::types::{Action, Outcome, Signal};
use crate::strategies::{price_is_tradeable, Strategy};

/// Coin-flip control: trades at fixed probabilities regardless of price
/// action. Any real strategy should beat this over enough runs; if it
/// doesn't, the edge is imaginary. Seeded for reproducible runs.
pub struct RandomBaselineStrategy {
    buy_prob: f64,
    sell_prob: f64,
    rng: StdRng,
    held: HashSet<String>,
}

impl RandomBaselineStrategy {
    pub fn new(config: &RandomBaselineConfig) -> Self {
        Self {
            buy_prob: config.buy_prob,
            sell_prob: config.sell_prob,
            rng: StdRng::seed_from_u64(config.seed),
            held: HashSet::new(),
        }
    }
}

impl Strategy for RandomBaselineStrategy {
    fn name(&self) -> &str {
        "random_baseline"
    }

    fn generate_signal(
        &mut self,
        token_id: &str,
        _history: &[PriceBar],
        current_price: f64,
        _current_time: DateTime<Utc>,
    ) -> Signal {
        let roll: f64 = self.rng.gen();

        if self.held.contains(token_id) {
            if roll < self.sell_prob {
                return Signal {
                    action: Action::Sell,
                    token_id: token_id.to_string(),
                    outcome: Outcome::Yes,
                    price: current_price,
                    confidence: 0.5,
                    reason: "random exit".to_string(),
                };
            }
        } else if roll < self.buy_prob && price_is_tradeable(current_price) {
            return Signal {
                action: Action::Buy,
                token_id: token_id.to_string(),
                outcome: Outcome::Yes,
                price: current_price,
                confidence: 0.5,
                reason: "random entry".to_string(),
            };
        }

        Signal::hold(token_id, current_price, "random hold")
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
