use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{RiskConfig, RollingConfig, SessionConfig};
use crate::data::provider::PriceProvider;
use crate::data::types::{Market, PriceBar};
use crate::engine::{liquidate_all, CancelToken};
use crate::execution::executor::{SimulatedExecutor, TradeExecutor};
use crate::execution::risk::RiskGate;
use crate::metrics::SummaryMetrics;
use crate::monitoring::logger::TradeLogger;
use crate::monitoring::snapshot::{SessionPhase, SessionSnapshot, SignalView, SnapshotWriter};
use crate::strategies::types::{Action, Outcome, Signal};
use crate::strategies::Strategy;

const MAX_HISTORY_BARS: usize = 100;
/// Synthetic cross-market history is too thin to trust until it has at
/// least this many points.
const MIN_HISTORY_BARS: usize = 2;

/// Slug of the rolling market covering `now`, plus the unix timestamp
/// at which that interval ends. Markets are clock-aligned: the slug
/// embeds the interval's start timestamp.
pub fn interval_slug(prefix: &str, interval_secs: i64, now: DateTime<Utc>) -> (String, i64) {
    let start = now.timestamp().div_euclid(interval_secs) * interval_secs;
    (format!("{prefix}-{start}"), start + interval_secs)
}

/// Session over clock-aligned short-interval markets (one new market
/// every few minutes). Each interval's market resolves at its end, so
/// positions are force-closed shortly before resolution. Alongside the
/// per-token history inside the current market, each side accumulates
/// a cross-market series with one synthetic closing price per resolved
/// market; the strategy consumes that series once it is long enough.
pub struct RollingStepper {
    provider: Arc<dyn PriceProvider>,
    strategy: Box<dyn Strategy>,
    gate: RiskGate,
    executor: SimulatedExecutor,
    session: SessionConfig,
    rolling: RollingConfig,
    current: Option<Market>,
    current_end_ts: i64,
    intra_history: HashMap<String, Vec<PriceBar>>,
    yes_cross: Vec<PriceBar>,
    no_cross: Vec<PriceBar>,
    last_prices: HashMap<String, f64>,
    latest_signals: HashMap<String, SignalView>,
    equity_curve: Vec<f64>,
    session_start: DateTime<Utc>,
    session_end: DateTime<Utc>,
    snapshot: SnapshotWriter,
    trade_log: TradeLogger,
}

impl RollingStepper {
    pub fn new(
        provider: Arc<dyn PriceProvider>,
        strategy: Box<dyn Strategy>,
        session: SessionConfig,
        risk: &RiskConfig,
        rolling: RollingConfig,
        snapshot: SnapshotWriter,
        trade_log: TradeLogger,
    ) -> Self {
        Self {
            provider,
            gate: RiskGate::new(risk),
            executor: SimulatedExecutor::new(session.starting_cash, session.fee_rate),
            session,
            rolling,
            strategy,
            current: None,
            current_end_ts: 0,
            intra_history: HashMap::new(),
            yes_cross: Vec::new(),
            no_cross: Vec::new(),
            last_prices: HashMap::new(),
            latest_signals: HashMap::new(),
            equity_curve: Vec::new(),
            session_start: Utc::now(),
            session_end: Utc::now(),
            snapshot,
            trade_log,
        }
    }

    /// Point the session at the market covering `now`, rolling over
    /// when a new interval has started. Any position left over from
    /// the previous market is closed first; it can never be exited
    /// once its market resolves.
    async fn roll_market(&mut self, now: DateTime<Utc>) {
        let (slug, end_ts) = interval_slug(&self.rolling.slug_prefix, self.rolling.interval_secs, now);
        if self.current.as_ref().is_some_and(|m| m.slug == slug) {
            return;
        }

        if let Some(prev) = self.current.clone() {
            self.record_market_close(&prev);
            self.close_current_positions(now, "previous interval resolved").await;
        }

        match self.provider.fetch_market_by_slug(&slug).await {
            Ok(Some(market)) => {
                info!(slug, "rolled to new interval market");
                self.current = Some(market);
                self.current_end_ts = end_ts;
            }
            Ok(None) => {
                warn!(slug, "no market listed for current interval");
                self.current = None;
            }
            Err(err) => {
                warn!(slug, %err, "interval market lookup failed");
                self.current = None;
            }
        }
    }

    /// Fold a resolved market into the cross-market series: its last
    /// observed price per side becomes one synthetic point. The
    /// market's tokens never trade again, so their intra history and
    /// signals are released.
    fn record_market_close(&mut self, market: &Market) {
        for (token, outcome) in market.outcome_tokens() {
            let bars = self.intra_history.remove(token).unwrap_or_default();
            self.latest_signals.remove(token);
            let last = match bars.last() {
                Some(last) => last,
                None => continue,
            };
            let cross = match outcome {
                Outcome::Yes => &mut self.yes_cross,
                Outcome::No => &mut self.no_cross,
            };
            cross.push(PriceBar {
                token_id: token.to_string(),
                timestamp: last.timestamp,
                price: last.price,
            });
            if cross.len() > MAX_HISTORY_BARS {
                cross.remove(0);
            }
        }
        debug!(
            yes_points = self.yes_cross.len(),
            no_points = self.no_cross.len(),
            "recorded market close"
        );
    }

    async fn close_current_positions(&mut self, now: DateTime<Utc>, reason: &str) {
        let market = match self.current.clone() {
            Some(market) => market,
            None => return,
        };
        for (token, outcome) in market.outcome_tokens() {
            if !self.executor.ledger().has_position(token) {
                continue;
            }
            let price = self
                .last_prices
                .get(token)
                .copied()
                .or_else(|| self.executor.ledger().position(token).map(|p| p.avg_cost))
                .unwrap_or(0.0);
            let signal = Signal {
                action: Action::Sell,
                token_id: token.to_string(),
                outcome,
                price,
                confidence: 1.0,
                reason: reason.to_string(),
            };
            if let Some(trade) = self.executor.sell(&signal, &market.slug, now).await {
                info!(token, pnl = trade.pnl, reason, "closed rolling position");
                self.strategy.on_trade_executed(&trade);
                if let Err(err) = self.trade_log.log(&trade) {
                    warn!(%err, "trade log write failed");
                }
            }
        }
    }

    async fn run_tick(&mut self, now: DateTime<Utc>) {
        self.roll_market(now).await;
        let market = match self.current.clone() {
            Some(market) => market,
            None => return,
        };

        // Close to resolution: get flat and stay flat until the next
        // interval's market appears.
        let in_exit_window = self.current_end_ts - now.timestamp() <= self.rolling.exit_buffer_secs;
        if in_exit_window {
            self.close_current_positions(now, "resolution imminent").await;
        }

        for (token, outcome) in market.outcome_tokens() {
            // No fresh quote: the last price stays in place for
            // valuation, the strategy does not run on stale data.
            let price = match self.provider.fetch_latest_price(token).await {
                Ok(Some(price)) => price,
                Ok(None) => continue,
                Err(err) => {
                    warn!(token, %err, "quote failed, treating as stale");
                    continue;
                }
            };
            self.last_prices.insert(token.to_string(), price);

            // Each side prefers its cross-market series (one closing
            // price per resolved market) and falls back to the current
            // market's own bars while that series is still too thin.
            let intra = self.intra_history.entry(token.to_string()).or_default();
            let cross = match outcome {
                Outcome::Yes => &self.yes_cross,
                Outcome::No => &self.no_cross,
            };
            let history: &[PriceBar] = if cross.len() >= MIN_HISTORY_BARS {
                cross
            } else {
                intra
            };

            let mut signal = if in_exit_window || history.len() < MIN_HISTORY_BARS {
                Signal::hold(token, price, "warming up")
            } else {
                self.strategy.generate_signal(token, history, price, now)
            };
            signal.outcome = outcome;
            signal.token_id = token.to_string();
            self.latest_signals
                .insert(token.to_string(), SignalView::from_signal(&signal, now));

            intra.push(PriceBar {
                token_id: token.to_string(),
                timestamp: now,
                price,
            });
            if intra.len() > MAX_HISTORY_BARS {
                intra.remove(0);
            }

            if signal.action == Action::Hold {
                continue;
            }
            if signal.action == Action::Buy {
                if let Some(opposite) = market.opposite_token(token) {
                    if self.executor.ledger().has_position(opposite) {
                        debug!(token, "skipping BUY, other side already held");
                        continue;
                    }
                }
            }

            let size = match self.gate.check(&signal, self.executor.ledger(), &self.last_prices) {
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
                    "executed"
                );
                self.strategy.on_trade_executed(&trade);
                if let Err(err) = self.trade_log.log(&trade) {
                    warn!(%err, "trade log write failed");
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
            "rolling",
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

    pub async fn run(mut self, cancel: CancelToken) -> Option<SummaryMetrics> {
        self.session_start = Utc::now();
        self.session_end =
            self.session_start + chrono::Duration::minutes(self.session.duration_minutes);
        let deadline = self.session_end;
        self.write_snapshot(SessionPhase::Starting);

        let mut ticks: u64 = 0;
        while !cancel.is_cancelled() && Utc::now() < deadline {
            self.run_tick(Utc::now()).await;
            self.write_snapshot(SessionPhase::Running);
            ticks += 1;

            if !cancel
                .sleep(Duration::from_secs(self.rolling.poll_interval_secs))
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
        Some(SummaryMetrics::compute(
            self.session.starting_cash,
            &self.equity_curve,
            self.executor.ledger().trade_log(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct SlugProvider {
        markets: Mutex<HashMap<String, Market>>,
        quotes: Mutex<HashMap<String, f64>>,
    }

    impl SlugProvider {
        fn new() -> Self {
            Self {
                markets: Mutex::new(HashMap::new()),
                quotes: Mutex::new(HashMap::new()),
            }
        }

        fn list(&self, slug: &str, suffix: &str) {
            let market = Market {
                condition_id: format!("0x{suffix}"),
                question: "Up or down?".to_string(),
                slug: slug.to_string(),
                yes_token_id: format!("{suffix}-yes"),
                no_token_id: format!("{suffix}-no"),
                end_date: None,
                is_resolved: false,
                outcome: None,
                platform: "polymarket".to_string(),
            };
            self.markets.lock().unwrap().insert(slug.to_string(), market);
        }

        fn set_quote(&self, token: &str, price: f64) {
            self.quotes.lock().unwrap().insert(token.to_string(), price);
        }
    }

    #[async_trait]
    impl PriceProvider for SlugProvider {
        async fn fetch_markets(&self, _limit: usize) -> Result<Vec<Market>> {
            Ok(Vec::new())
        }
        async fn fetch_price_history(&self, _token_id: &str) -> Result<Vec<PriceBar>> {
            Ok(Vec::new())
        }
        async fn fetch_latest_price(&self, token_id: &str) -> Result<Option<f64>> {
            Ok(self.quotes.lock().unwrap().get(token_id).copied())
        }
        async fn fetch_market_by_slug(&self, slug: &str) -> Result<Option<Market>> {
            Ok(self.markets.lock().unwrap().get(slug).cloned())
        }
    }

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

    /// Records every history slice handed to it, never trades.
    struct SpyHold {
        seen: Arc<Mutex<Vec<(String, Vec<f64>)>>>,
    }
    impl Strategy for SpyHold {
        fn name(&self) -> &str {
            "spy"
        }
        fn generate_signal(
            &mut self,
            token_id: &str,
            history: &[PriceBar],
            current_price: f64,
            _current_time: DateTime<Utc>,
        ) -> Signal {
            let prices = history.iter().map(|bar| bar.price).collect();
            self.seen.lock().unwrap().push((token_id.to_string(), prices));
            Signal::hold(token_id, current_price, "observing")
        }
    }

    fn stepper(provider: Arc<SlugProvider>, dir: &std::path::Path) -> RollingStepper {
        stepper_with(provider, dir, Box::new(AlwaysBuy))
    }

    fn stepper_with(
        provider: Arc<SlugProvider>,
        dir: &std::path::Path,
        strategy: Box<dyn Strategy>,
    ) -> RollingStepper {
        let session = SessionConfig {
            mode: crate::config::Mode::Rolling,
            strategy: "always-buy".to_string(),
            starting_cash: 1000.0,
            fee_rate: 0.002,
            data_dir: dir.display().to_string(),
            instance_name: None,
            num_markets: 1,
            duration_minutes: 60,
        };
        RollingStepper::new(
            provider,
            strategy,
            session,
            &RiskConfig::default(),
            RollingConfig::default(),
            SnapshotWriter::new(dir.join("session.json")),
            TradeLogger::new(dir.join("trades.csv")).unwrap(),
        )
    }

    #[test]
    fn test_interval_slug_is_clock_aligned() {
        let now = Utc.timestamp_opt(1_700_000_123, 0).unwrap();
        let (slug, end_ts) = interval_slug("btc-updown-5m", 300, now);
        assert_eq!(slug, "btc-updown-5m-1700000100");
        assert_eq!(end_ts, 1_700_000_400);

        // Exactly on a boundary starts a fresh interval.
        let boundary = Utc.timestamp_opt(1_700_000_400, 0).unwrap();
        let (slug, _) = interval_slug("btc-updown-5m", 300, boundary);
        assert_eq!(slug, "btc-updown-5m-1700000400");
    }

    #[tokio::test]
    async fn test_warmup_then_trade_then_forced_exit() {
        // Interval [1700000100, 1700000400), default exit buffer 30s.
        let t0 = Utc.timestamp_opt(1_700_000_110, 0).unwrap();
        let provider = Arc::new(SlugProvider::new());
        provider.list("btc-updown-5m-1700000100", "a");
        provider.set_quote("a-yes", 0.52);
        provider.set_quote("a-no", 0.48);

        let dir = tempfile::tempdir().unwrap();
        let mut s = stepper(provider.clone(), dir.path());

        // Two ticks of warmup while the stitched history fills.
        s.run_tick(t0).await;
        s.run_tick(t0 + chrono::Duration::seconds(30)).await;
        assert_eq!(s.executor.ledger().open_position_count(), 0);

        // Third tick has enough history to trade.
        s.run_tick(t0 + chrono::Duration::seconds(60)).await;
        assert!(s.executor.ledger().has_position("a-yes"));

        // Inside the exit buffer the position is force-closed.
        let near_end = Utc.timestamp_opt(1_700_000_380, 0).unwrap();
        s.run_tick(near_end).await;
        assert_eq!(s.executor.ledger().open_position_count(), 0);
    }

    #[tokio::test]
    async fn test_one_closing_point_per_resolved_market() {
        let provider = Arc::new(SlugProvider::new());
        provider.list("btc-updown-5m-1700000100", "a");
        provider.list("btc-updown-5m-1700000400", "b");
        provider.list("btc-updown-5m-1700000700", "c");
        for (token, price) in [
            ("a-yes", 0.52),
            ("a-no", 0.48),
            ("b-yes", 0.54),
            ("b-no", 0.46),
            ("c-yes", 0.56),
            ("c-no", 0.44),
        ] {
            provider.set_quote(token, price);
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let dir = tempfile::tempdir().unwrap();
        let mut s = stepper_with(
            provider.clone(),
            dir.path(),
            Box::new(SpyHold { seen: seen.clone() }),
        );

        // Several polls inside each of the first two intervals: the
        // cross-market series grows by one point per rollover, not one
        // per poll.
        for ts in [1_700_000_110, 1_700_000_140, 1_700_000_170] {
            s.run_tick(Utc.timestamp_opt(ts, 0).unwrap()).await;
        }
        for ts in [1_700_000_410, 1_700_000_440] {
            s.run_tick(Utc.timestamp_opt(ts, 0).unwrap()).await;
        }
        assert_eq!(s.yes_cross.len(), 1);
        assert_eq!(s.yes_cross[0].price, 0.52);
        assert_eq!(s.current.as_ref().unwrap().slug, "btc-updown-5m-1700000400");

        // Two markets have resolved by the third interval, so the
        // strategy now consumes the two closing prices, not tick bars.
        s.run_tick(Utc.timestamp_opt(1_700_000_710, 0).unwrap()).await;
        assert_eq!(s.yes_cross.len(), 2);
        assert_eq!(s.no_cross.len(), 2);
        let seen = seen.lock().unwrap();
        let (_, history) = seen
            .iter()
            .rev()
            .find(|(token, _)| token == "c-yes")
            .unwrap();
        assert_eq!(history, &vec![0.52, 0.54]);
    }

    #[tokio::test]
    async fn test_rollover_closes_leftover_position() {
        let t0 = Utc.timestamp_opt(1_700_000_110, 0).unwrap();
        let provider = Arc::new(SlugProvider::new());
        provider.list("btc-updown-5m-1700000100", "a");
        provider.list("btc-updown-5m-1700000400", "b");
        for (token, price) in [("a-yes", 0.52), ("a-no", 0.48), ("b-yes", 0.54), ("b-no", 0.46)] {
            provider.set_quote(token, price);
        }

        let dir = tempfile::tempdir().unwrap();
        let mut s = stepper(provider.clone(), dir.path());
        s.run_tick(t0).await;
        s.run_tick(t0 + chrono::Duration::seconds(30)).await;
        s.run_tick(t0 + chrono::Duration::seconds(60)).await;
        assert!(s.executor.ledger().has_position("a-yes"));

        // Jump straight into the next interval without an exit tick.
        s.run_tick(Utc.timestamp_opt(1_700_000_410, 0).unwrap()).await;
        assert!(!s.executor.ledger().has_position("a-yes"));
    }
}
