use std::collections::HashMap;

use anyhow::Result;
use tracing::{debug, info};

use crate::config::{RiskConfig, SessionConfig};
use crate::data::provider::PriceProvider;
use crate::data::storage::DataStore;
use crate::data::types::PriceBar;
use crate::engine::liquidate_all;
use crate::execution::executor::{SimulatedExecutor, TradeExecutor};
use crate::execution::risk::RiskGate;
use crate::metrics::SummaryMetrics;
use crate::strategies::types::Action;
use crate::strategies::Strategy;

/// One tradeable token's full historical price series.
#[derive(Debug, Clone)]
pub struct TokenSeries {
    pub token_id: String,
    pub market_slug: String,
    pub bars: Vec<PriceBar>,
}

/// Assemble backtest inputs: the top markets' YES-side histories,
/// served from the on-disk cache when allowed and present.
pub async fn load_series(
    provider: &dyn PriceProvider,
    store: &DataStore,
    num_markets: usize,
    use_cache: bool,
) -> Result<Vec<TokenSeries>> {
    let markets = if use_cache && store.markets_cached() {
        info!("using cached markets");
        store.load_markets()?
    } else {
        let markets = provider.fetch_markets(num_markets).await?;
        store.save_markets(&markets)?;
        markets
    };

    let mut series = Vec::new();
    for market in markets.iter().take(num_markets) {
        let token_id = &market.yes_token_id;
        let bars = if use_cache && store.history_cached(token_id) {
            store.load_price_history(token_id)?
        } else {
            let bars = provider.fetch_price_history(token_id).await?;
            store.save_price_history(token_id, &bars)?;
            bars
        };
        if bars.is_empty() {
            debug!(slug = %market.slug, "skipping market with empty history");
            continue;
        }
        series.push(TokenSeries {
            token_id: token_id.clone(),
            market_slug: market.slug.clone(),
            bars,
        });
    }
    Ok(series)
}

/// Replays historical bars against a strategy. At bar `i` the strategy
/// sees only bars `0..i` as history plus bar `i` as the current quote,
/// so it can never act on data from its own future.
pub struct HistoricalStepper<S: Strategy> {
    strategy: S,
    gate: RiskGate,
    executor: SimulatedExecutor,
    series: Vec<TokenSeries>,
}

impl<S: Strategy> HistoricalStepper<S> {
    pub fn new(
        strategy: S,
        session: &SessionConfig,
        risk: &RiskConfig,
        series: Vec<TokenSeries>,
    ) -> Self {
        Self {
            strategy,
            gate: RiskGate::new(risk),
            executor: SimulatedExecutor::new(session.starting_cash, session.fee_rate),
            series,
        }
    }

    /// Run the whole replay and return the summary, or `None` when
    /// there was nothing to replay (no series, or all too short to
    /// produce even one decision bar).
    pub async fn run(mut self) -> Option<SummaryMetrics> {
        let max_bars = self.series.iter().map(|s| s.bars.len()).max().unwrap_or(0);
        if max_bars < 2 {
            info!("no usable price history, nothing to backtest");
            return None;
        }

        let starting_cash = self.executor.ledger().starting_cash();
        let mut current_prices: HashMap<String, f64> = HashMap::new();
        let mut equity_curve = Vec::with_capacity(max_bars);

        // Bar 0 is history-only; decisions start at bar 1.
        for bar_index in 1..max_bars {
            for series in &self.series {
                let bar = match series.bars.get(bar_index) {
                    Some(bar) => bar,
                    None => continue,
                };
                current_prices.insert(series.token_id.clone(), bar.price);

                let signal = self.strategy.generate_signal(
                    &series.token_id,
                    &series.bars[..bar_index],
                    bar.price,
                    bar.timestamp,
                );

                match self.gate.check(&signal, self.executor.ledger(), &current_prices) {
                    Ok(size) => {
                        let trade = match signal.action {
                            Action::Buy => {
                                self.executor
                                    .buy(&signal, &series.market_slug, size, bar.timestamp)
                                    .await
                            }
                            Action::Sell => {
                                self.executor
                                    .sell(&signal, &series.market_slug, bar.timestamp)
                                    .await
                            }
                            Action::Hold => None,
                        };
                        if let Some(trade) = trade {
                            debug!(
                                bar = bar_index,
                                token = %trade.token_id,
                                action = ?trade.action,
                                price = trade.price,
                                "executed"
                            );
                            self.strategy.on_trade_executed(&trade);
                        }
                    }
                    Err(rejection) => {
                        debug!(bar = bar_index, token = %series.token_id, %rejection, "blocked");
                    }
                }
            }
            equity_curve.push(self.executor.ledger().total_value(&current_prices));
        }

        // Mark-to-market is not enough for a final score; realize
        // everything at the last seen prices.
        let last_ts = self
            .series
            .iter()
            .filter_map(|s| s.bars.last())
            .map(|bar| bar.timestamp)
            .max()?;
        liquidate_all(&mut self.executor, &mut self.strategy, &current_prices, last_ts).await;
        equity_curve.push(self.executor.ledger().total_value(&current_prices));

        let metrics = SummaryMetrics::compute(
            starting_cash,
            &equity_curve,
            self.executor.ledger().trade_log(),
        );
        info!(
            final_value = metrics.final_value,
            return_pct = metrics.total_return_pct,
            trades = metrics.num_trades,
            "backtest complete"
        );
        Some(metrics)
    }
}
