use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::config::RiskConfig;
use crate::execution::ledger::Ledger;
use crate::strategies::types::{Action, Signal};

/// Why the risk gate refused a trade. The `Display` string is the
/// human-readable reason surfaced to logs and the session snapshot.
#[derive(Debug, Error)]
pub enum RiskRejection {
    #[error("SELL blocked: no open position in this token")]
    NoPositionToSell,

    #[error("BUY blocked: portfolio value is zero or negative")]
    PortfolioDepleted,

    #[error("BUY blocked: already at max position size (${held:.2} >= {cap_pct:.0}% of ${total_value:.2})")]
    PositionCapReached {
        held: f64,
        cap_pct: f64,
        total_value: f64,
    },

    #[error("BUY blocked: total exposure ${exposure:.2} already at {cap_pct:.0}% limit (${cap:.2})")]
    ExposureCapReached {
        exposure: f64,
        cap_pct: f64,
        cap: f64,
    },

    #[error("BUY blocked: no cash available")]
    NoCash,

    #[error("BUY blocked: trade size ${size:.2} too small (< ${floor:.2})")]
    BelowMinimumSize { size: f64, floor: f64 },
}

/// Gatekeeper between strategy and ledger: sizes BUYs against the position
/// and exposure caps and blocks anything unsafe. Each check can only
/// shrink the trade, never grow it, and the minimum-size floor is applied
/// last so confidence scaling cannot rescue a trade that was already zero.
#[derive(Debug, Clone)]
pub struct RiskGate {
    max_position_fraction: f64,
    max_exposure_fraction: f64,
    min_trade_size: f64,
}

impl RiskGate {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            max_position_fraction: config.max_position_fraction,
            max_exposure_fraction: config.max_exposure_fraction,
            min_trade_size: config.min_trade_size,
        }
    }

    /// Decide whether a signal may execute and how much to spend.
    ///
    /// `Ok(size)` is the approved spend in USDC (0.0 for SELL/HOLD — a
    /// SELL always liquidates the full position at the ledger).
    pub fn check(
        &self,
        signal: &Signal,
        ledger: &Ledger,
        current_prices: &HashMap<String, f64>,
    ) -> Result<f64, RiskRejection> {
        match signal.action {
            // Doing nothing is always allowed.
            Action::Hold => Ok(0.0),

            // Reducing risk is always allowed, but only if we own the token.
            Action::Sell => {
                if ledger.has_position(&signal.token_id) {
                    Ok(0.0)
                } else {
                    Err(RiskRejection::NoPositionToSell)
                }
            }

            Action::Buy => self.size_buy(signal, ledger, current_prices),
        }
    }

    fn size_buy(
        &self,
        signal: &Signal,
        ledger: &Ledger,
        current_prices: &HashMap<String, f64>,
    ) -> Result<f64, RiskRejection> {
        let total_value = ledger.total_value(current_prices);
        if total_value <= 0.0 {
            return Err(RiskRejection::PortfolioDepleted);
        }

        // Per-token cap: what we already hold in this token counts against it.
        let position_cap = total_value * self.max_position_fraction;
        let held = ledger
            .position(&signal.token_id)
            .map(|pos| {
                let price = current_prices
                    .get(&signal.token_id)
                    .copied()
                    .unwrap_or(pos.avg_cost);
                pos.value_at(price)
            })
            .unwrap_or(0.0);
        let room_this_token = (position_cap - held).max(0.0);
        if room_this_token <= 0.0 {
            return Err(RiskRejection::PositionCapReached {
                held,
                cap_pct: self.max_position_fraction * 100.0,
                total_value,
            });
        }

        // Total-exposure cap across all open positions.
        let exposure = ledger.total_exposure(current_prices);
        let exposure_cap = total_value * self.max_exposure_fraction;
        let room_exposure = exposure_cap - exposure;
        if room_exposure <= 0.0 {
            return Err(RiskRejection::ExposureCapReached {
                exposure,
                cap_pct: self.max_exposure_fraction * 100.0,
                cap: exposure_cap,
            });
        }

        if ledger.cash() <= 0.0 {
            return Err(RiskRejection::NoCash);
        }

        let mut trade_size = room_this_token.min(room_exposure).min(ledger.cash());

        // Zero confidence still trades at half size; treated as given
        // behavior rather than a bug to fix.
        let scale = if signal.confidence > 0.0 {
            signal.confidence
        } else {
            0.5
        };
        trade_size *= scale;

        if trade_size < self.min_trade_size {
            return Err(RiskRejection::BelowMinimumSize {
                size: trade_size,
                floor: self.min_trade_size,
            });
        }

        debug!(
            token = %signal.token_id,
            size = trade_size,
            confidence = signal.confidence,
            exposure,
            exposure_cap,
            "BUY approved"
        );
        Ok(trade_size)
    }
}
