use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{PaperConfig, RiskConfig, SessionConfig};
use crate::data::provider::PriceProvider;
use crate::data::types::{Market, PriceBar};
use crate::engine::{liquidate_all, CancelToken};
use crate::execution::executor::{SimulatedExecutor, TradeExecutor};
use crate::execution::risk::RiskGate;
use crate::metrics::SummaryMetrics;
use crate::monitoring::logger::TradeLogger;
use crate::monitoring::snapshot::{SessionPhase, SessionSnapshot, SignalView, SnapshotWriter};
use crate::strategies::types::Action;
use crate::strategies::Strategy;

/// Per-token history is bounded so long sessions do not grow without
/// limit; strategies never need more than this.
const MAX_HISTORY_BARS: usize = 100;

/// Live paper-trading session: polls real prices on an interval, runs
/// the strategy on each watched token, and fills approved orders
/// against the simulated ledger.
pub struct LiveStepper {
    provider: Arc<dyn PriceProvider>,
    strategy: Box<dyn Strategy>,
    gate: RiskGate,
    executor: SimulatedExecutor,
    session: SessionConfig,
    paper: PaperConfig,
    watched: Vec<Market>,
    histories: HashMap<String, Vec<PriceBar>>,
    last_prices: HashMap<String, f64>,
    latest_signals: HashMap<String, SignalView>,
    blacklist: HashSet<String>,
    equity_curve: Vec<f64>,
    session_start: DateTime<Utc>,
    session_end: DateTime<Utc>,
    snapshot: SnapshotWriter,
    trade_log: TradeLogger,
}

impl LiveStepper {
    pub fn new(
        provider: Arc<dyn PriceProvider>,
        strategy: Box<dyn Strategy>,
        session: SessionConfig,
        risk: &RiskConfig,
        paper: PaperConfig,
        snapshot: SnapshotWriter,
        trade_log: TradeLogger,
    ) -> Self {
        Self {
            provider,
            gate: RiskGate::new(risk),
            executor: SimulatedExecutor::new(session.starting_cash, session.fee_rate),
            session,
            paper,
            strategy,
            watched: Vec::new(),
            histories: HashMap::new(),
            last_prices: HashMap::new(),
            latest_signals: HashMap::new(),
            blacklist: HashSet::new(),
            equity_curve: Vec::new(),
            session_start: Utc::now(),
            session_end: Utc::now(),
            snapshot,
            trade_log,
        }
    }

    /// Rebuild the watchlist from the provider's current top markets.
    /// Watched markets missing from the fresh listing have resolved or
    /// been delisted and are expired on the spot; held markets that are
    /// still listed stay watched even past the cap, so their exits
    /// still get evaluated.
    async fn refresh_markets(&mut self, now: DateTime<Utc>) -> Result<()> {
        let fetched = self.provider.fetch_markets(self.session.num_markets).await?;

        let listed: HashSet<&str> = fetched.iter().map(|m| m.condition_id.as_str()).collect();
        let gone: Vec<Market> = self
            .watched
            .iter()
            .filter(|m| !listed.contains(m.condition_id.as_str()))
            .cloned()
            .collect();
        for market in &gone {
            warn!(slug = %market.slug, "market vanished from listing, expiring");
            self.expire_market(market, now).await;
        }

        let mut next: Vec<Market> = Vec::new();
        for market in fetched {
            if self.blacklist.contains(&market.condition_id) {
                continue;
            }
            if market.is_resolved || market.is_expired(now) {
                self.expire_market(&market, now).await;
                continue;
            }
            if next.len() >= self.paper.max_watched_markets {
                break;
            }
            next.push(market);
        }

        // A held market pushed out by the cap stays watched as long as
        // the listing still carries it.
        for old in &self.watched {
            let in_next = next.iter().any(|m| m.condition_id == old.condition_id);
            let holding = old
                .outcome_tokens()
                .iter()
                .any(|(token, _)| self.executor.ledger().has_position(token));
            if !in_next && holding && !self.blacklist.contains(&old.condition_id) {
                next.push(old.clone());
            }
        }

        // Seed history for tokens we have not seen before.
        for market in &next {
            for (token, _) in market.outcome_tokens() {
                if self.histories.contains_key(token) {
                    continue;
                }
                match self.provider.fetch_price_history(token).await {
                    Ok(mut bars) => {
                        if bars.len() > MAX_HISTORY_BARS {
                            bars.drain(..bars.len() - MAX_HISTORY_BARS);
                        }
                        self.histories.insert(token.to_string(), bars);
                    }
                    Err(err) => {
                        warn!(token, %err, "history fetch failed, starting empty");
                        self.histories.insert(token.to_string(), Vec::new());
                    }
                }
            }
        }

        info!(watched = next.len(), "watchlist refreshed");
        self.watched = next;
        Ok(())
    }

    /// A market that resolved, passed its end date, or vanished from
    /// the listing will never print again: close any open position at
    /// the last known price, blacklist it for the rest of the session,
    /// and release its history.
    async fn expire_market(&mut self, market: &Market, now: DateTime<Utc>) {
        self.blacklist.insert(market.condition_id.clone());
        for (token, outcome) in market.outcome_tokens() {
            self.histories.remove(token);
            self.latest_signals.remove(token);
            if !self.executor.ledger().has_position(token) {
                continue;
            }
            let price = self
                .last_prices
                .get(token)
                .copied()
                .or_else(|| self.executor.ledger().position(token).map(|p| p.avg_cost))
                .unwrap_or(0.0);
            let signal = crate::strategies::types::Signal {
                action: Action::Sell,
                token_id: token.to_string(),
                outcome,
                price,
                confidence: 1.0,
                reason: "market expired".to_string(),
            };
            if let Some(trade) = self.executor.sell(&signal, &market.slug, now).await {
                warn!(token, slug = %market.slug, pnl = trade.pnl, "closed position in expired market");
                self.strategy.on_trade_executed(&trade);
                if let Err(err) = self.trade_log.log(&trade) {
                    warn!(%err, "trade log write failed");
                }
            }
        }
    }

    /// Drop markets that expired while watched between refreshes.
    async fn drop_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<Market> = self
            .watched
            .iter()
            .filter(|m| m.is_expired(now) || m.is_resolved)
            .cloned()
            .collect();
        for market in &expired {
            self.expire_market(market, now).await;
        }
        self.watched
            .retain(|m| !self.blacklist.contains(&m.condition_id));
    }

    /// One poll cycle: quote every watched token, run the strategy,
    /// execute what passes the gate.
    async fn run_tick(&mut self, now: DateTime<Utc>) {
        self.drop_expired(now).await;

        let watched = self.watched.clone();
        for market in &watched {
            for (token, outcome) in market.outcome_tokens() {
                // No fresh bar: keep the last known price for valuation
                // but do not re-run the strategy on stale data.
                let price = match self.provider.fetch_latest_price(token).await {
                    Ok(Some(price)) => price,
                    Ok(None) => {
                        debug!(token, "no fresh quote this tick");
                        continue;
                    }
                    Err(err) => {
                        warn!(token, %err, "quote failed, treating as stale");
                        continue;
                    }
                };
                self.last_prices.insert(token.to_string(), price);

                let history = self.histories.entry(token.to_string()).or_default();
                let mut signal = self.strategy.generate_signal(token, history, price, now);
                signal.outcome = outcome;
                self.latest_signals
                    .insert(token.to_string(), SignalView::from_signal(&signal, now));

                history.push(PriceBar {
                    token_id: token.to_string(),
                    timestamp: now,
                    price,
                });
                if history.len() > MAX_HISTORY_BARS {
                    history.remove(0);
                }

                if signal.action == Action::Hold {
                    continue;
                }

                // One side per market: never long YES and NO at once.
                if signal.action == Action::Buy {
                    if let Some(opposite) = market.opposite_token(token) {
                        if self.executor.ledger().has_position(opposite) {
                            debug!(token, "skipping BUY, other side already held");
                            continue;
                        }
                    }
                }

                let size = match self.gate.check(&signal, self.executor.ledger(), &self.last_prices)
                {
                    Ok(size) => size,
                    Err(rejection) => {
                        debug!(token, %rejection, "blocked");
                        continue;
                    }
                };

                let trade = match signal.action {
                    Action::Buy => self.executor.buy(&signal, &market.slug, size, now).await,
                    Action::Sell => self.executor.sell(&signal, &market.slug, now).await,
                    Action::Hold => None,
                };
                if let Some(trade) = trade {
                    info!(
                        token,
                        action = ?trade.action,
                        shares = trade.shares,
                        price = trade.price,
                        reason = %signal.reason,
                        "executed"
                    );
                    self.strategy.on_trade_executed(&trade);
                    if let Err(err) = self.trade_log.log(&trade) {
                        warn!(%err, "trade log write failed");
                    }
                }
            }
        }

        self.equity_curve
            .push(self.executor.ledger().total_value(&self.last_prices));
    }

    fn write_snapshot(&self, phase: SessionPhase) {
        let snap = SessionSnapshot::capture(
            &self.session.instance(),
            self.strategy.name(),
            "paper",
            phase,
            self.session_start,
            self.session_end,
            self.executor.ledger(),
            &self.last_prices,
            &self.equity_curve,
            &self.latest_signals,
        );
        if let Err(err) = self.snapshot.write(&snap) {
            warn!(%err, "snapshot write failed");
        }
    }

    /// Run until the configured duration elapses or the token is
    /// cancelled, then liquidate and summarize. `None` when the session
    /// never completed a single tick.
    pub async fn run(mut self, cancel: CancelToken) -> Option<SummaryMetrics> {
        self.session_start = Utc::now();
        self.session_end =
            self.session_start + chrono::Duration::minutes(self.session.duration_minutes);
        let deadline = self.session_end;
        self.write_snapshot(SessionPhase::Starting);

        if let Err(err) = self.refresh_markets(Utc::now()).await {
            warn!(%err, "initial market fetch failed");
        }
        if self.watched.is_empty() {
            warn!("no active markets found, nothing to trade");
            self.write_snapshot(SessionPhase::Stopped);
            return None;
        }

        let mut ticks: u64 = 0;
        while !cancel.is_cancelled() && Utc::now() < deadline {
            self.run_tick(Utc::now()).await;
            self.write_snapshot(SessionPhase::Running);
            ticks += 1;

            if self.paper.refresh_interval_ticks > 0 && ticks % self.paper.refresh_interval_ticks == 0 {
                if let Err(err) = self.refresh_markets(Utc::now()).await {
                    warn!(%err, "market refresh failed, keeping current watchlist");
                }
            }

            if !cancel
                .sleep(Duration::from_secs(self.paper.poll_interval_secs))
                .await
            {
                break;
            }
        }

        self.write_snapshot(SessionPhase::Liquidating);
        let now = Utc::now();
        let trades = liquidate_all(
            &mut self.executor,
            &mut self.strategy,
            &self.last_prices,
            now,
        )
        .await;
        for trade in &trades {
            if let Err(err) = self.trade_log.log(trade) {
                warn!(%err, "trade log write failed");
            }
        }
        self.equity_curve
            .push(self.executor.ledger().total_value(&self.last_prices));
        self.write_snapshot(SessionPhase::Stopped);

        if ticks == 0 {
            return None;
        }
        let metrics = SummaryMetrics::compute(
            self.session.starting_cash,
            &self.equity_curve,
            self.executor.ledger().trade_log(),
        );
        info!(
            ticks,
            final_value = metrics.final_value,
            return_pct = metrics.total_return_pct,
            "session complete"
        );
        Some(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::types::{Outcome, Signal};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    /// In-memory provider whose markets and quotes tests mutate
    /// between ticks.
    struct ScriptedProvider {
        markets: Mutex<Vec<Market>>,
        quotes: Mutex<HashMap<String, Option<f64>>>,
    }

    impl ScriptedProvider {
        fn new(markets: Vec<Market>) -> Self {
            Self {
                markets: Mutex::new(markets),
                quotes: Mutex::new(HashMap::new()),
            }
        }

        fn set_quote(&self, token: &str, price: Option<f64>) {
            self.quotes.lock().unwrap().insert(token.to_string(), price);
        }
    }

    #[async_trait]
    impl PriceProvider for ScriptedProvider {
        async fn fetch_markets(&self, _limit: usize) -> Result<Vec<Market>> {
            Ok(self.markets.lock().unwrap().clone())
        }
        async fn fetch_price_history(&self, _token_id: &str) -> Result<Vec<PriceBar>> {
            Ok(Vec::new())
        }
        async fn fetch_latest_price(&self, token_id: &str) -> Result<Option<f64>> {
            Ok(self.quotes.lock().unwrap().get(token_id).copied().flatten())
        }
    }

    /// Buys every token it sees, at full confidence.
    struct AlwaysBuy;
    impl Strategy for AlwaysBuy {
        fn name(&self) -> &str {
            "always-buy"
        }
        fn generate_signal(
            &mut self,
            token_id: &str,
            _history: &[PriceBar],
            current_price: f64,
            _current_time: DateTime<Utc>,
        ) -> Signal {
            Signal {
                action: Action::Buy,
                token_id: token_id.to_string(),
                outcome: Outcome::Yes,
                price: current_price,
                confidence: 1.0,
                reason: "always".to_string(),
            }
        }
    }

    fn market(id: &str, end_date: Option<DateTime<Utc>>) -> Market {
        Market {
            condition_id: id.to_string(),
            question: "?".to_string(),
            slug: format!("market-{id}"),
            yes_token_id: format!("{id}-yes"),
            no_token_id: format!("{id}-no"),
            end_date,
            is_resolved: false,
            outcome: None,
            platform: "polymarket".to_string(),
        }
    }

    fn stepper(provider: Arc<ScriptedProvider>, dir: &std::path::Path) -> LiveStepper {
        let session = SessionConfig {
            mode: crate::config::Mode::Paper,
            strategy: "always-buy".to_string(),
            starting_cash: 1000.0,
            fee_rate: 0.002,
            data_dir: dir.display().to_string(),
            instance_name: None,
            num_markets: 5,
            duration_minutes: 60,
        };
        LiveStepper::new(
            provider,
            Box::new(AlwaysBuy),
            session,
            &RiskConfig::default(),
            PaperConfig::default(),
            SnapshotWriter::new(dir.join("session.json")),
            TradeLogger::new(dir.join("trades.csv")).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_expired_markets_are_blacklisted() {
        let now = Utc::now();
        let provider = Arc::new(ScriptedProvider::new(vec![
            market("live", Some(now + ChronoDuration::hours(2))),
            market("dead", Some(now - ChronoDuration::hours(1))),
        ]));
        let dir = tempfile::tempdir().unwrap();
        let mut s = stepper(provider.clone(), dir.path());

        s.refresh_markets(now).await.unwrap();
        assert_eq!(s.watched.len(), 1);
        assert_eq!(s.watched[0].condition_id, "live");
        assert!(s.blacklist.contains("dead"));

        // Even if the listing flips back to active, a blacklisted
        // market never returns.
        provider.markets.lock().unwrap()[1].end_date = Some(now + ChronoDuration::hours(3));
        s.refresh_markets(now).await.unwrap();
        assert_eq!(s.watched.len(), 1);
    }

    #[tokio::test]
    async fn test_expiry_mid_session_closes_position() {
        let now = Utc::now();
        let provider = Arc::new(ScriptedProvider::new(vec![market(
            "m1",
            Some(now + ChronoDuration::minutes(5)),
        )]));
        provider.set_quote("m1-yes", Some(0.50));
        provider.set_quote("m1-no", Some(0.50));

        let dir = tempfile::tempdir().unwrap();
        let mut s = stepper(provider.clone(), dir.path());
        s.refresh_markets(now).await.unwrap();
        s.run_tick(now).await;
        assert_eq!(s.executor.ledger().open_position_count(), 1);

        // The market expires before the next tick.
        s.run_tick(now + ChronoDuration::minutes(10)).await;
        assert_eq!(s.executor.ledger().open_position_count(), 0);
        assert!(s.watched.is_empty());
        assert!(s.blacklist.contains("m1"));
    }

    #[tokio::test]
    async fn test_delisted_market_is_expired_and_closed() {
        let now = Utc::now();
        let provider = Arc::new(ScriptedProvider::new(vec![market(
            "m1",
            Some(now + ChronoDuration::hours(8)),
        )]));
        provider.set_quote("m1-yes", Some(0.50));
        provider.set_quote("m1-no", Some(0.50));

        let dir = tempfile::tempdir().unwrap();
        let mut s = stepper(provider.clone(), dir.path());
        s.refresh_markets(now).await.unwrap();
        s.run_tick(now).await;
        assert_eq!(s.executor.ledger().open_position_count(), 1);

        // The market vanishes from the listing while its end date is
        // still far in the future.
        provider.markets.lock().unwrap().clear();
        s.refresh_markets(now + ChronoDuration::minutes(5)).await.unwrap();

        assert_eq!(s.executor.ledger().open_position_count(), 0);
        assert!(s.blacklist.contains("m1"));
        assert!(s.watched.is_empty());
        assert!(!s.histories.contains_key("m1-yes"));
        let last = s.executor.ledger().trade_log().last().unwrap();
        assert_eq!(last.action, Action::Sell);
    }

    #[tokio::test]
    async fn test_no_markets_at_startup_is_session_fatal() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let s = stepper(provider, dir.path());

        // Returns immediately with an empty result instead of ticking
        // an empty watchlist for the whole session.
        let metrics = s.run(CancelToken::new()).await;
        assert!(metrics.is_none());
    }

    #[tokio::test]
    async fn test_never_holds_both_sides_of_one_market() {
        let now = Utc::now();
        let provider = Arc::new(ScriptedProvider::new(vec![market(
            "m1",
            Some(now + ChronoDuration::hours(2)),
        )]));
        provider.set_quote("m1-yes", Some(0.60));
        provider.set_quote("m1-no", Some(0.40));

        let dir = tempfile::tempdir().unwrap();
        let mut s = stepper(provider.clone(), dir.path());
        s.refresh_markets(now).await.unwrap();

        for tick in 0..3 {
            s.run_tick(now + ChronoDuration::minutes(tick * 5)).await;
        }

        // The YES side fills first; every NO buy afterwards is skipped.
        assert!(s.executor.ledger().has_position("m1-yes"));
        assert!(!s.executor.ledger().has_position("m1-no"));
    }

    #[tokio::test]
    async fn test_stale_quote_skips_evaluation_but_keeps_valuation() {
        let now = Utc::now();
        let provider = Arc::new(ScriptedProvider::new(vec![market(
            "m1",
            Some(now + ChronoDuration::hours(2)),
        )]));
        provider.set_quote("m1-yes", Some(0.55));
        provider.set_quote("m1-no", Some(0.45));

        let dir = tempfile::tempdir().unwrap();
        let mut s = stepper(provider.clone(), dir.path());
        s.refresh_markets(now).await.unwrap();
        s.run_tick(now).await;
        let value_after_first = *s.equity_curve.last().unwrap();

        // Quotes vanish: no new bar is appended and the strategy does
        // not run, but the equity sample still uses the last price.
        provider.set_quote("m1-yes", None);
        provider.set_quote("m1-no", None);
        s.run_tick(now + ChronoDuration::minutes(5)).await;

        assert_eq!(s.histories["m1-yes"].len(), 1);
        assert_eq!(s.histories["m1-yes"][0].price, 0.55);
        assert_eq!(s.equity_curve.len(), 2);
        assert!((s.equity_curve[1] - value_after_first).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_snapshot_written_during_session() {
        let now = Utc::now();
        let provider = Arc::new(ScriptedProvider::new(vec![market(
            "m1",
            Some(now + ChronoDuration::hours(2)),
        )]));
        provider.set_quote("m1-yes", Some(0.50));
        provider.set_quote("m1-no", Some(0.50));

        let dir = tempfile::tempdir().unwrap();
        let mut s = stepper(provider.clone(), dir.path());
        s.refresh_markets(now).await.unwrap();
        s.run_tick(now).await;
        s.write_snapshot(SessionPhase::Running);

        let snap = crate::monitoring::snapshot::load_snapshot(dir.path().join("session.json")).unwrap();
        assert_eq!(snap.phase, SessionPhase::Running);
        assert_eq!(snap.num_trades, 1);
        // Both sides of the watched market carry their last verdict.
        assert_eq!(snap.latest_signals.len(), 2);
        assert_eq!(snap.latest_signals[0].action, Action::Buy);
    }
}
