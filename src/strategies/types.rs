use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

/// Which side of a binary market a signal or position refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

/// What a strategy says to do at one moment. The engines decide whether it
/// actually executes (risk gate, mutual exclusion, ledger checks).
#[derive(Debug, Clone)]
pub struct Signal {
    pub action: Action,
    pub token_id: String,
    /// Overwritten by the live engines to match the token side being
    /// evaluated when one strategy covers both sides of a market.
    pub outcome: Outcome,
    /// Price at the bar the signal was generated on.
    pub price: f64,
    /// 0.0-1.0, scales position sizing in the risk gate.
    pub confidence: f64,
    pub reason: String,
}

impl Signal {
    pub fn hold(token_id: &str, price: f64, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            token_id: token_id.to_string(),
            outcome: Outcome::Yes,
            price,
            confidence: 0.0,
            reason: reason.into(),
        }
    }
}
