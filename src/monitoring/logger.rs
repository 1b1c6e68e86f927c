use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::execution::types::Trade;
use crate::strategies::types::{Action, Outcome};

const HEADER: &str = "timestamp,market_slug,token_id,action,outcome,shares,price,fee,total_cost,pnl";

/// Append-only CSV log of executed trades, one file per session
/// instance. The header is written once when the file is created.
pub struct TradeLogger {
    path: PathBuf,
}

impl TradeLogger {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            let mut file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            writeln!(file, "{HEADER}")?;
        }
        Ok(Self { path })
    }

    pub fn log(&self, trade: &Trade) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let action = match trade.action {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        };
        let outcome = match trade.outcome {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        };
        writeln!(
            file,
            "{},{},{},{},{},{:.6},{:.4},{:.6},{:.6},{:.6}",
            trade.timestamp.to_rfc3339(),
            trade.market_slug,
            trade.token_id,
            action,
            outcome,
            trade.shares,
            trade.price,
            trade.fee,
            trade.total_cost,
            trade.pnl,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn trade(action: Action, pnl: f64) -> Trade {
        Trade {
            token_id: "tok".to_string(),
            market_slug: "some-market".to_string(),
            action,
            outcome: Outcome::Yes,
            shares: 40.0,
            price: 0.50,
            fee: 0.04,
            total_cost: 20.04,
            timestamp: Utc::now(),
            pnl,
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");

        let logger = TradeLogger::new(&path).unwrap();
        logger.log(&trade(Action::Buy, 0.0)).unwrap();
        drop(logger);

        // Reopening an existing log must not repeat the header.
        let logger = TradeLogger::new(&path).unwrap();
        logger.log(&trade(Action::Sell, 1.5)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].contains("BUY"));
        assert!(lines[2].contains("SELL"));
    }
}
