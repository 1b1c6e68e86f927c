use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::strategies::types::Outcome;

/// One binary prediction market. Immutable once fetched; a refresh replaces
/// the whole value rather than mutating fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub condition_id: String,
    pub question: String,
    pub slug: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub end_date: Option<DateTime<Utc>>,
    pub is_resolved: bool,
    pub outcome: Option<String>,
    pub platform: String,
}

impl Market {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.end_date, Some(end) if end <= now)
    }

    /// The two tradable sides of this market, YES first.
    pub fn outcome_tokens(&self) -> [(&str, Outcome); 2] {
        [
            (self.yes_token_id.as_str(), Outcome::Yes),
            (self.no_token_id.as_str(), Outcome::No),
        ]
    }

    /// Token for the other side of the market, if `token_id` is one of ours.
    pub fn opposite_token(&self, token_id: &str) -> Option<&str> {
        if token_id == self.yes_token_id {
            Some(self.no_token_id.as_str())
        } else if token_id == self.no_token_id {
            Some(self.yes_token_id.as_str())
        } else {
            None
        }
    }
}

/// One price observation for a token. Prices are probabilities in [0, 1]:
/// 0.72 means "the market thinks there's a 72% chance".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub token_id: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}
