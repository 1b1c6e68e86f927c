use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::config::MeanReversionConfig;
use crate::data::types::PriceBar;
use crate::execution::types::Trade;
use crate::strategies::types::{Action, Outcome, Signal};
use crate::strategies::{price_is_tradeable, Strategy};

/// Bets that prices stretched far from their rolling mean snap back.
/// Entry when the z-score drops below -threshold, exit once the price
/// has reverted to the mean or beyond.
pub struct MeanReversionStrategy {
    window: usize,
    z_threshold: f64,
    held: HashSet<String>,
}

impl MeanReversionStrategy {
    pub fn new(config: &MeanReversionConfig) -> Self {
        Self {
            window: config.window,
            z_threshold: config.z_threshold,
            held: HashSet::new(),
        }
    }
}

fn z_score(window: &[f64], current: f64) -> Option<f64> {
    let n = window.len();
    if n < 2 {
        return None;
    }
    let mean = window.iter().sum::<f64>() / n as f64;
    let variance = window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let std = variance.sqrt();
    if std < 1e-9 {
        return None;
    }
    Some((current - mean) / std)
}

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &str {
        "mean_reversion"
    }

    fn generate_signal(
        &mut self,
        token_id: &str,
        history: &[PriceBar],
        current_price: f64,
        _current_time: DateTime<Utc>,
    ) -> Signal {
        if history.len() < self.window {
            return Signal::hold(token_id, current_price, "insufficient history");
        }

        let start = history.len() - self.window;
        let window: Vec<f64> = history[start..].iter().map(|bar| bar.price).collect();
        let z = match z_score(&window, current_price) {
            Some(z) => z,
            None => return Signal::hold(token_id, current_price, "flat window, no dispersion"),
        };

        if self.held.contains(token_id) && z >= 0.0 {
            return Signal {
                action: Action::Sell,
                token_id: token_id.to_string(),
                outcome: Outcome::Yes,
                price: current_price,
                confidence: (z.abs() / 3.0).min(1.0),
                reason: format!("reverted to mean (z={z:.2})"),
            };
        }

        if z < -self.z_threshold && price_is_tradeable(current_price) {
            return Signal {
                action: Action::Buy,
                token_id: token_id.to_string(),
                outcome: Outcome::Yes,
                price: current_price,
                confidence: (z.abs() / 3.0).min(1.0),
                reason: format!("stretched below mean (z={z:.2})"),
            };
        }

        Signal::hold(token_id, current_price, format!("z={z:.2} inside band"))
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
