use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::data::types::{Market, PriceBar};

/// On-disk cache for fetched market data, so repeated backtests do not
/// hammer the APIs. Markets go to one JSON file (questions contain
/// commas and quotes, JSON handles them for free); per-token price
/// series go to small CSV files keyed by a token-id prefix.
pub struct DataStore {
    data_dir: PathBuf,
}

impl DataStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
        Ok(Self { data_dir })
    }

    fn markets_path(&self) -> PathBuf {
        self.data_dir.join("markets.json")
    }

    fn history_path(&self, token_id: &str) -> PathBuf {
        // Token ids are long decimal strings; 16 chars is plenty to
        // avoid collisions in a cache of tens of markets.
        let prefix: String = token_id.chars().take(16).collect();
        self.data_dir.join(format!("prices_{prefix}.csv"))
    }

    pub fn markets_cached(&self) -> bool {
        self.markets_path().exists()
    }

    pub fn history_cached(&self, token_id: &str) -> bool {
        self.history_path(token_id).exists()
    }

    pub fn save_markets(&self, markets: &[Market]) -> Result<()> {
        let path = self.markets_path();
        let json = serde_json::to_string_pretty(markets)?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(count = markets.len(), path = %path.display(), "cached markets");
        Ok(())
    }

    pub fn load_markets(&self) -> Result<Vec<Market>> {
        let path = self.markets_path();
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("corrupt markets cache at {}", path.display()))
    }

    pub fn save_price_history(&self, token_id: &str, bars: &[PriceBar]) -> Result<()> {
        let path = self.history_path(token_id);
        let mut file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        writeln!(file, "timestamp,price")?;
        for bar in bars {
            writeln!(file, "{},{}", bar.timestamp.to_rfc3339(), bar.price)?;
        }
        debug!(token = token_id, bars = bars.len(), "cached price history");
        Ok(())
    }

    pub fn load_price_history(&self, token_id: &str) -> Result<Vec<PriceBar>> {
        let path = self.history_path(token_id);
        let file = File::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        parse_history_csv(BufReader::new(file), token_id, &path)
    }
}

fn parse_history_csv(reader: impl BufRead, token_id: &str, path: &Path) -> Result<Vec<PriceBar>> {
    let mut bars = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line_no == 0 || line.trim().is_empty() {
            continue;
        }
        let (ts, price) = line
            .split_once(',')
            .with_context(|| format!("malformed line {} in {}", line_no + 1, path.display()))?;
        let timestamp = DateTime::parse_from_rfc3339(ts)
            .with_context(|| format!("bad timestamp on line {} in {}", line_no + 1, path.display()))?
            .with_timezone(&Utc);
        let price: f64 = price
            .trim()
            .parse()
            .with_context(|| format!("bad price on line {} in {}", line_no + 1, path.display()))?;
        bars.push(PriceBar {
            token_id: token_id.to_string(),
            timestamp,
            price,
        });
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_market() -> Market {
        Market {
            condition_id: "0xabc".to_string(),
            question: "Will \"X\" happen, or not?".to_string(),
            slug: "will-x-happen".to_string(),
            yes_token_id: "1234567890123456789".to_string(),
            no_token_id: "9876543210987654321".to_string(),
            end_date: Some(Utc.with_ymd_and_hms(2026, 12, 31, 0, 0, 0).unwrap()),
            is_resolved: false,
            outcome: None,
            platform: "polymarket".to_string(),
        }
    }

    #[test]
    fn test_markets_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path()).unwrap();

        assert!(!store.markets_cached());
        store.save_markets(&[sample_market()]).unwrap();
        assert!(store.markets_cached());

        let loaded = store.load_markets().unwrap();
        assert_eq!(loaded.len(), 1);
        // Commas and quotes in questions must survive the cache.
        assert_eq!(loaded[0].question, "Will \"X\" happen, or not?");
    }

    #[test]
    fn test_price_history_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path()).unwrap();
        let token = "1234567890123456789";

        let bars = vec![
            PriceBar {
                token_id: token.to_string(),
                timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                price: 0.42,
            },
            PriceBar {
                token_id: token.to_string(),
                timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
                price: 0.45,
            },
        ];

        assert!(!store.history_cached(token));
        store.save_price_history(token, &bars).unwrap();
        assert!(store.history_cached(token));
        assert_eq!(store.load_price_history(token).unwrap(), bars);
    }

    #[test]
    fn test_corrupt_csv_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = DataStore::new(dir.path()).unwrap();
        let path = store.history_path("tok");
        fs::write(&path, "timestamp,price\nnot-a-timestamp,0.5\n").unwrap();

        let err = store.load_price_history("tok").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
