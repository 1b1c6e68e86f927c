use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{ApiConfig, EnvConfig};
use crate::data::types::{Market, PriceBar};

/// Source of markets and prices. The live engines only talk to this
/// trait, so tests can script market behavior without a network.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Most active open binary markets, best first.
    async fn fetch_markets(&self, limit: usize) -> Result<Vec<Market>>;

    /// Full price history for one outcome token, oldest bar first.
    async fn fetch_price_history(&self, token_id: &str) -> Result<Vec<PriceBar>>;

    /// Most recent traded price, `None` when the token has no recent prints.
    async fn fetch_latest_price(&self, token_id: &str) -> Result<Option<f64>>;

    /// The rolling short-interval market currently open under `slug`.
    /// Only meaningful for providers that list such markets.
    async fn fetch_market_by_slug(&self, _slug: &str) -> Result<Option<Market>> {
        Ok(None)
    }
}

/// Raw market row from the Gamma API. Token ids and outcome labels
/// arrive as JSON-encoded strings inside the JSON, hence the second
/// parse step in `into_market`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    condition_id: Option<String>,
    question: Option<String>,
    slug: Option<String>,
    clob_token_ids: Option<String>,
    outcomes: Option<String>,
    end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    closed: bool,
}

#[derive(Debug, Deserialize)]
struct ClobHistory {
    history: Vec<ClobPoint>,
}

#[derive(Debug, Deserialize)]
struct ClobPoint {
    t: i64,
    p: f64,
}

impl GammaMarket {
    /// Convert to the internal market type. Markets without two outcome
    /// tokens (multi-outcome or malformed rows) yield `None`.
    fn into_market(self) -> Option<Market> {
        let condition_id = self.condition_id?;
        let token_json = self.clob_token_ids?;
        let token_ids: Vec<String> = serde_json::from_str(&token_json).ok()?;
        if token_ids.len() != 2 {
            return None;
        }

        // Label order in `outcomes` matches token order, but match the
        // labels anyway and fall back to position if they are exotic.
        let labels: Vec<String> = self
            .outcomes
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        let (yes_token_id, no_token_id) = match labels
            .iter()
            .position(|label| label.eq_ignore_ascii_case("yes"))
        {
            Some(0) | None => (token_ids[0].clone(), token_ids[1].clone()),
            Some(_) => (token_ids[1].clone(), token_ids[0].clone()),
        };

        Some(Market {
            condition_id,
            question: self.question.unwrap_or_default(),
            slug: self.slug.unwrap_or_default(),
            yes_token_id,
            no_token_id,
            end_date: self.end_date,
            is_resolved: self.closed,
            outcome: None,
            platform: "polymarket".to_string(),
        })
    }
}

/// HTTP client for Polymarket's Gamma (market metadata) and CLOB (price
/// history) APIs, with bounded retry on transient failures.
pub struct PolymarketProvider {
    client: reqwest::Client,
    gamma_url: String,
    clob_url: String,
    config: ApiConfig,
}

impl PolymarketProvider {
    pub fn new(env: &EnvConfig, config: ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            gamma_url: env.gamma_url.clone(),
            clob_url: env.clob_url.clone(),
            config,
        })
    }

    async fn get_with_retry(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        let mut last_err = None;
        for attempt in 1..=self.config.max_retries {
            let result = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());

            match result {
                Ok(resp) => {
                    return resp
                        .text()
                        .await
                        .with_context(|| format!("failed to read response body from {url}"));
                }
                Err(err) => {
                    warn!(url, attempt, %err, "request failed, retrying");
                    last_err = Some(err);
                    if attempt < self.config.max_retries {
                        let delay = self.config.retry_delay_secs * attempt as f64;
                        tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
                    }
                }
            }
        }
        Err(last_err
            .map(anyhow::Error::from)
            .unwrap_or_else(|| anyhow::anyhow!("no attempts made")))
        .with_context(|| format!("GET {url} failed after {} attempts", self.config.max_retries))
    }

    async fn fetch_history(&self, token_id: &str, interval: &str, fidelity: u32) -> Result<Vec<PriceBar>> {
        let url = format!("{}/prices-history", self.clob_url);
        let query = [
            ("market", token_id.to_string()),
            ("interval", interval.to_string()),
            ("fidelity", fidelity.to_string()),
        ];
        let body = self.get_with_retry(&url, &query).await?;
        let parsed: ClobHistory = serde_json::from_str(&body)
            .with_context(|| format!("unexpected price-history payload for token {token_id}"))?;

        let mut bars: Vec<PriceBar> = parsed
            .history
            .into_iter()
            .filter_map(|point| {
                let timestamp = DateTime::<Utc>::from_timestamp(point.t, 0)?;
                Some(PriceBar {
                    token_id: token_id.to_string(),
                    timestamp,
                    price: point.p,
                })
            })
            .collect();
        bars.sort_by_key(|bar| bar.timestamp);
        Ok(bars)
    }
}

#[async_trait]
impl PriceProvider for PolymarketProvider {
    async fn fetch_markets(&self, limit: usize) -> Result<Vec<Market>> {
        let url = format!("{}/markets", self.gamma_url);
        let query = [
            ("limit", limit.to_string()),
            ("active", "true".to_string()),
            ("closed", "false".to_string()),
            ("order", self.config.sort_field.clone()),
            ("ascending", "false".to_string()),
        ];
        let body = self.get_with_retry(&url, &query).await?;
        let rows: Vec<GammaMarket> =
            serde_json::from_str(&body).context("unexpected markets payload from Gamma")?;

        let total = rows.len();
        let markets: Vec<Market> = rows.into_iter().filter_map(GammaMarket::into_market).collect();
        debug!(total, usable = markets.len(), "fetched markets");
        Ok(markets)
    }

    async fn fetch_price_history(&self, token_id: &str) -> Result<Vec<PriceBar>> {
        self.fetch_history(
            token_id,
            &self.config.history_interval,
            self.config.history_fidelity_minutes,
        )
        .await
    }

    async fn fetch_latest_price(&self, token_id: &str) -> Result<Option<f64>> {
        let bars = self.fetch_history(token_id, "1d", 1).await?;
        Ok(bars.last().map(|bar| bar.price))
    }

    async fn fetch_market_by_slug(&self, slug: &str) -> Result<Option<Market>> {
        // Slugs are caller-assembled from config; keep garbage out of the URL.
        let valid = Regex::new(r"^[a-z0-9-]+$").context("slug pattern")?;
        if !valid.is_match(slug) {
            anyhow::bail!("invalid market slug '{slug}'");
        }

        let url = format!("{}/markets", self.gamma_url);
        let query = [("slug", slug.to_string())];
        let body = self.get_with_retry(&url, &query).await?;
        let rows: Vec<GammaMarket> =
            serde_json::from_str(&body).context("unexpected slug-lookup payload from Gamma")?;
        Ok(rows.into_iter().filter_map(GammaMarket::into_market).next())
    }
}
