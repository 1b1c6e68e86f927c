use chrono::{Duration, Utc};

use crate::data::types::PriceBar;

/// Build a minute-spaced price series for one token, ending just before now.
pub fn bars(prices: &[f64]) -> Vec<PriceBar> {
    let start = Utc::now() - Duration::minutes(prices.len() as i64);
    prices
        .iter()
        .enumerate()
        .map(|(i, &price)| PriceBar {
            token_id: "tok".to_string(),
            timestamp: start + Duration::minutes(i as i64),
            price,
        })
        .collect()
}
