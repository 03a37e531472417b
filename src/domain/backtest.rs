//! Event-driven backtest engine.
//!
//! A single-pass, strictly deterministic simulator over the merged bar
//! timeline. Within a timestamp, assets are always processed in sorted symbol
//! order, so identical inputs produce byte-identical equity curves and trade
//! logs.
//!
//! No-lookahead discipline: every decision made at bar t — the signal, the
//! order, and its requested quantity — is computed from data with timestamp
//! ≤ t−1. Bar t's own prices are used only to fill orders (entries at close,
//! stop exits at the stop price) and to mark equity after the fills.

use chrono::NaiveDate;
use std::collections::HashMap;

use crate::domain::asset::AssetClass;
use crate::domain::asset_data::{build_timeline, AssetData};
use crate::domain::combiner::{combine, CombinerConfig};
use crate::domain::error::SigtraderError;
use crate::domain::metrics::Metrics;
use crate::domain::optimizer::{
    optimize_from_history, suggest_rebalance, Objective, OptimizerCaps, RebalanceSuggestion,
    MIN_OBSERVATIONS,
};
use crate::domain::opinion::{ScoredOpinion, SignalSource};
use crate::domain::portfolio::{EquityPoint, Portfolio};
use crate::domain::position::{ClosedTrade, ExitReason, Position};
use crate::domain::risk::{
    initial_stops, size_buy, update_trailing_stop, Order, OrderReason, OrderSide, PendingExposure,
    RejectReason, RiskConfig, RiskState, SizingOutcome,
};
use crate::domain::signal::SignalAction;
use crate::domain::technical;
use crate::ports::opinion_port::OpinionPort;

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    /// Flat commission per fill.
    pub commission_per_trade: f64,
    /// Proportional commission in percent of trade value.
    pub commission_pct: f64,
    pub risk_free_rate: f64,
    /// Annualization factor for the Sharpe ratio.
    pub periods_per_year: f64,
    /// Bars of history required before an asset's signals are evaluated.
    pub min_history: usize,
    /// Bars between rebalance proposals; 0 disables them.
    pub rebalance_interval: usize,
    /// Churn filter for rebalance suggestions.
    pub min_trade_pct: f64,
    pub objective: Objective,
}

/// An executed order with its fill price and commission.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub date: NaiveDate,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub reason: OrderReason,
}

/// A BUY that was discarded instead of filled.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedOrder {
    pub date: NaiveDate,
    pub symbol: String,
    pub reason: RejectReason,
}

/// Target-weight proposal emitted on the rebalance schedule. Proposals are
/// outputs for the execution layer; the simulator does not act on them.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceProposal {
    pub date: NaiveDate,
    pub degraded: bool,
    pub suggestions: Vec<RebalanceSuggestion>,
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub portfolio: Portfolio,
    pub fills: Vec<Fill>,
    pub rejected: Vec<RejectedOrder>,
    pub benchmark: Vec<EquityPoint>,
    pub rebalances: Vec<RebalanceProposal>,
    pub metrics: Metrics,
}

fn commission_for(trade_value: f64, config: &BacktestConfig) -> f64 {
    config.commission_per_trade + trade_value * config.commission_pct / 100.0
}

/// Run the simulation over `assets`.
///
/// Fatal only when the configured date range contains no bars at all; every
/// other anomaly (data gaps, missing opinions, cap breaches, degraded
/// optimizations) is absorbed as a per-step outcome.
pub fn run_backtest(
    assets: &[AssetData],
    opinions: &dyn OpinionPort,
    combiner_config: &CombinerConfig,
    risk_config: &RiskConfig,
    config: &BacktestConfig,
) -> Result<BacktestResult, SigtraderError> {
    let timeline: Vec<NaiveDate> = build_timeline(assets)
        .into_iter()
        .filter(|d| *d >= config.start_date && *d <= config.end_date)
        .collect();
    if timeline.is_empty() {
        return Err(SigtraderError::EmptyRange {
            start: config.start_date,
            end: config.end_date,
        });
    }

    // Fixed, stable asset order keeps runs reproducible.
    let mut order: Vec<&AssetData> = assets.iter().collect();
    order.sort_by(|a, b| a.asset.symbol.cmp(&b.asset.symbol));
    let by_symbol: HashMap<&str, &AssetData> = order
        .iter()
        .map(|ad| (ad.asset.symbol.as_str(), *ad))
        .collect();

    let mut portfolio = Portfolio::new(config.initial_capital);
    let mut risk_state = RiskState::new(config.initial_capital);
    let mut fills: Vec<Fill> = Vec::new();
    let mut rejected: Vec<RejectedOrder> = Vec::new();
    let mut rebalances: Vec<RebalanceProposal> = Vec::new();

    // Last known close per symbol. During the decision phase this holds
    // closes up to the previous bar only; it advances to the current bar
    // after fills, before equity is marked.
    let mut marks: HashMap<String, f64> = HashMap::new();

    let mut benchmark: Vec<EquityPoint> = Vec::with_capacity(timeline.len());
    let mut benchmark_shares: HashMap<String, f64> = HashMap::new();
    let bench_alloc = config.initial_capital / assets.len() as f64;

    for (step, &date) in timeline.iter().enumerate() {
        // (1) Risk state from current equity — the last recorded value.
        risk_state.update(portfolio.last_equity(), risk_config);

        // (2) Trailing stop updates and stop triggers for open positions.
        let mut open_symbols: Vec<String> = portfolio.positions.keys().cloned().collect();
        open_symbols.sort();
        for symbol in open_symbols {
            let Some(asset_data) = by_symbol.get(symbol.as_str()) else {
                continue;
            };
            let Some(bar) = asset_data.get_bar(date) else {
                continue; // data gap: no stop check possible this step
            };
            let stop_price = {
                let position = portfolio
                    .positions
                    .get_mut(&symbol)
                    .expect("open symbol has a position");
                update_trailing_stop(position, bar.high, risk_config);
                if position.stop_triggered(bar.low) {
                    Some(position.active_stop())
                } else {
                    None
                }
            };
            if let Some(stop_price) = stop_price {
                let position = portfolio.remove_position(&symbol).expect("position exists");
                close_position(
                    &mut portfolio,
                    &mut fills,
                    position,
                    stop_price,
                    date,
                    ExitReason::Stop,
                    OrderReason::StopLoss,
                    config,
                );
            }
        }

        // (3)+(4) Signals and sizing, strictly from data before this bar.
        let mut entry_orders: Vec<(Order, AssetClass, Option<f64>)> = Vec::new();
        let mut exit_orders: Vec<Order> = Vec::new();
        let mut pending = PendingExposure::default();
        for asset_data in &order {
            let symbol = asset_data.asset.symbol.as_str();
            if asset_data.get_bar(date).is_none() {
                continue; // missing bar: skip this asset for this step
            }
            let history = asset_data.history_before(date);
            if history.len() < config.min_history {
                continue;
            }
            let as_of = history.last().expect("min_history > 0").date;

            let mut components: Vec<ScoredOpinion> = Vec::new();
            if let Some(op) = technical::technical_opinion(history, as_of) {
                components.push(op);
            }
            if let Some(op) = opinions.opinion(symbol, SignalSource::Sentiment, as_of) {
                components.push(op);
            }
            if let Some(op) = opinions.opinion(symbol, SignalSource::Ml, as_of) {
                components.push(op);
            }
            let signal = combine(symbol, date, &components, combiner_config);

            match signal.action {
                SignalAction::Buy if !portfolio.has_position(symbol) => {
                    let prev_close = history.last().expect("min_history > 0").close;
                    match size_buy(
                        symbol,
                        asset_data.asset.class,
                        prev_close,
                        &portfolio,
                        &marks,
                        &pending,
                        &risk_state,
                        risk_config,
                    ) {
                        SizingOutcome::Order(entry) => {
                            pending.reserve(entry.quantity * prev_close, asset_data.asset.class);
                            entry_orders.push((
                                entry,
                                asset_data.asset.class,
                                technical::atr(history),
                            ));
                        }
                        SizingOutcome::Rejected(reason) => rejected.push(RejectedOrder {
                            date,
                            symbol: symbol.to_string(),
                            reason,
                        }),
                    }
                }
                SignalAction::Sell if portfolio.has_position(symbol) => {
                    let quantity = portfolio
                        .get_position(symbol)
                        .expect("checked above")
                        .quantity;
                    exit_orders.push(Order {
                        symbol: symbol.to_string(),
                        side: OrderSide::Sell,
                        quantity,
                        reason: OrderReason::SignalExit,
                    });
                }
                _ => {}
            }
        }

        // (5) Fill at the current bar's close — exits first to free cash.
        for exit in exit_orders {
            let bar = by_symbol[exit.symbol.as_str()]
                .get_bar(date)
                .expect("exit only queued for assets with a bar");
            let position = portfolio
                .remove_position(&exit.symbol)
                .expect("exit only queued for open positions");
            close_position(
                &mut portfolio,
                &mut fills,
                position,
                bar.close,
                date,
                ExitReason::Signal,
                OrderReason::SignalExit,
                config,
            );
        }
        for (entry, class, atr) in entry_orders {
            let bar = by_symbol[entry.symbol.as_str()]
                .get_bar(date)
                .expect("entry only queued for assets with a bar");
            let price = bar.close;
            let mut quantity = entry.quantity;
            let mut cost = quantity * price;
            let mut fee = commission_for(cost, config);
            if cost + fee > portfolio.cash {
                // The fill price moved past the sizing price; shrink the fill
                // to the cash actually available.
                quantity = (portfolio.cash - config.commission_per_trade)
                    / (price * (1.0 + config.commission_pct / 100.0));
                if quantity <= 0.0 || !quantity.is_finite() {
                    rejected.push(RejectedOrder {
                        date,
                        symbol: entry.symbol,
                        reason: RejectReason::InsufficientCash,
                    });
                    continue;
                }
                cost = quantity * price;
                fee = commission_for(cost, config);
            }
            portfolio.cash -= cost + fee;
            let (atr_stop, trailing_stop) = initial_stops(price, atr, risk_config);
            portfolio.add_position(Position {
                symbol: entry.symbol.clone(),
                class,
                quantity,
                entry_price: price,
                entry_date: date,
                entry_commission: fee,
                atr_stop,
                high_water_mark: price,
                trailing_stop,
            });
            fills.push(Fill {
                date,
                symbol: entry.symbol,
                side: OrderSide::Buy,
                quantity,
                price,
                commission: fee,
                reason: OrderReason::SignalEntry,
            });
        }

        // Advance marks to this bar's closes; seed benchmark shares at each
        // asset's first available price.
        for asset_data in &order {
            if let Some(bar) = asset_data.get_bar(date) {
                marks.insert(asset_data.asset.symbol.clone(), bar.close);
                benchmark_shares
                    .entry(asset_data.asset.symbol.clone())
                    .or_insert(bench_alloc / bar.close);
            }
        }

        // (6) Realized equity. (7) — fills were appended as executed.
        let equity = portfolio.total_equity(&marks);
        portfolio.record_equity(date, equity);

        let mut bench_value = 0.0;
        for asset_data in &order {
            let symbol = asset_data.asset.symbol.as_str();
            match (benchmark_shares.get(symbol), marks.get(symbol)) {
                (Some(shares), Some(price)) => bench_value += shares * price,
                _ => bench_value += bench_alloc, // not yet tradeable: still cash
            }
        }
        benchmark.push(EquityPoint {
            date,
            equity: bench_value,
        });

        // Scheduled rebalance proposal from pre-bar history.
        if config.rebalance_interval > 0 && step > 0 && step % config.rebalance_interval == 0 {
            if let Some(proposal) = propose_rebalance(
                &order,
                date,
                &portfolio,
                &marks,
                risk_config,
                config,
            ) {
                rebalances.push(proposal);
            }
        }
    }

    // Close whatever is still open at the last known price so every trade is
    // a measurable round-trip. The equity curve itself stays mark-to-market.
    let mut open_symbols: Vec<String> = portfolio.positions.keys().cloned().collect();
    open_symbols.sort();
    let last_date = *timeline.last().expect("timeline checked non-empty");
    for symbol in open_symbols {
        let Some(price) = marks.get(&symbol).copied() else {
            continue;
        };
        let position = portfolio.remove_position(&symbol).expect("position exists");
        close_position(
            &mut portfolio,
            &mut fills,
            position,
            price,
            last_date,
            ExitReason::EndOfRun,
            OrderReason::EndOfRun,
            config,
        );
    }

    let metrics = Metrics::compute(
        &portfolio.equity_curve,
        &portfolio.closed_trades,
        config.risk_free_rate,
        config.periods_per_year,
    );

    Ok(BacktestResult {
        portfolio,
        fills,
        rejected,
        benchmark,
        rebalances,
        metrics,
    })
}

#[allow(clippy::too_many_arguments)]
fn close_position(
    portfolio: &mut Portfolio,
    fills: &mut Vec<Fill>,
    position: Position,
    price: f64,
    date: NaiveDate,
    exit_reason: ExitReason,
    order_reason: OrderReason,
    config: &BacktestConfig,
) {
    let proceeds = position.quantity * price;
    let fee = commission_for(proceeds, config);
    portfolio.cash += proceeds - fee;

    let pnl =
        (price - position.entry_price) * position.quantity - position.entry_commission - fee;
    portfolio.record_trade(ClosedTrade {
        symbol: position.symbol.clone(),
        quantity: position.quantity,
        entry_price: position.entry_price,
        exit_price: price,
        entry_date: position.entry_date,
        exit_date: date,
        pnl,
        reason: exit_reason,
    });
    fills.push(Fill {
        date,
        symbol: position.symbol,
        side: OrderSide::Sell,
        quantity: position.quantity,
        price,
        commission: fee,
        reason: order_reason,
    });
}

fn propose_rebalance(
    order: &[&AssetData],
    date: NaiveDate,
    portfolio: &Portfolio,
    marks: &HashMap<String, f64>,
    risk_config: &RiskConfig,
    config: &BacktestConfig,
) -> Option<RebalanceProposal> {
    let mut candidates = Vec::new();
    let mut closes: Vec<Vec<f64>> = Vec::new();
    for asset_data in order {
        let history = asset_data.history_before(date);
        if history.len() > MIN_OBSERVATIONS {
            candidates.push(asset_data.asset.clone());
            closes.push(history.iter().map(|b| b.close).collect());
        }
    }
    if candidates.len() < 2 {
        return None;
    }

    let caps = OptimizerCaps {
        max_position_pct: risk_config.max_position_pct,
        max_crypto_pct: risk_config.max_crypto_pct,
    };
    let result = optimize_from_history(
        &candidates,
        &closes,
        &caps,
        config.objective,
        config.risk_free_rate,
        config.periods_per_year,
    );

    let equity = portfolio.total_equity(marks);
    let mut current: HashMap<String, f64> = HashMap::new();
    if equity > 0.0 {
        for position in portfolio.positions.values() {
            let price = marks
                .get(&position.symbol)
                .copied()
                .unwrap_or(position.entry_price);
            current.insert(position.symbol.clone(), position.market_value(price) / equity);
        }
    }

    let suggestions = suggest_rebalance(&current, &result.weights, config.min_trade_pct);
    Some(RebalanceProposal {
        date,
        degraded: result.degraded,
        suggestions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    use crate::domain::asset::Asset;
    use crate::domain::ohlcv::OhlcvBar;

    /// Scripted ML opinions keyed by (symbol, as-of date).
    struct ScriptedOpinions {
        ml: HashMap<(String, NaiveDate), (f64, f64)>,
    }

    impl ScriptedOpinions {
        fn none() -> Self {
            ScriptedOpinions { ml: HashMap::new() }
        }

        fn with(mut self, symbol: &str, as_of: NaiveDate, score: f64, confidence: f64) -> Self {
            self.ml
                .insert((symbol.to_string(), as_of), (score, confidence));
            self
        }
    }

    impl OpinionPort for ScriptedOpinions {
        fn opinion(
            &self,
            symbol: &str,
            source: SignalSource,
            as_of: NaiveDate,
        ) -> Option<ScoredOpinion> {
            if source != SignalSource::Ml {
                return None;
            }
            self.ml
                .get(&(symbol.to_string(), as_of))
                .map(|&(score, confidence)| {
                    ScoredOpinion::new(SignalSource::Ml, score, confidence, as_of)
                })
        }
    }

    fn day(offset: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset as i64)
    }

    fn bar(symbol: &str, offset: u32, close: f64) -> OhlcvBar {
        bar_ohlc(symbol, offset, close, close + 1.0, close - 1.0)
    }

    fn bar_ohlc(symbol: &str, offset: u32, close: f64, high: f64, low: f64) -> OhlcvBar {
        OhlcvBar {
            symbol: symbol.to_string(),
            date: day(offset),
            open: close,
            high,
            low,
            close,
            volume: 1_000.0,
        }
    }

    fn flat_asset(symbol: &str, n: u32, close: f64) -> AssetData {
        AssetData::new(
            Asset::equity(symbol),
            (0..n).map(|i| bar(symbol, i, close)).collect(),
        )
    }

    fn test_config(n_days: u32) -> BacktestConfig {
        BacktestConfig {
            start_date: day(0),
            end_date: day(n_days),
            initial_capital: 10_000.0,
            commission_per_trade: 0.0,
            commission_pct: 0.0,
            risk_free_rate: 0.0,
            periods_per_year: 252.0,
            min_history: 2,
            rebalance_interval: 0,
            min_trade_pct: 0.05,
            objective: Objective::MinVolatility,
        }
    }

    fn wide_stops() -> RiskConfig {
        // Stops far enough away that tests control exits explicitly.
        RiskConfig {
            trailing_pct: 0.5,
            atr_multiplier: 50.0,
            ..RiskConfig::default()
        }
    }

    #[test]
    fn flat_series_with_no_signals_stays_flat() {
        let assets = vec![flat_asset("AAA", 10, 100.0)];
        let result = run_backtest(
            &assets,
            &ScriptedOpinions::none(),
            &CombinerConfig::default(),
            &RiskConfig::default(),
            &test_config(10),
        )
        .unwrap();

        assert!(result.fills.is_empty());
        assert_eq!(result.portfolio.equity_curve.len(), 10);
        for point in &result.portfolio.equity_curve {
            assert_relative_eq!(point.equity, 10_000.0);
        }
        for point in &result.benchmark {
            assert_relative_eq!(point.equity, 10_000.0);
        }
        assert_relative_eq!(result.metrics.max_drawdown, 0.0);
        assert_relative_eq!(result.metrics.total_return, 0.0);
    }

    #[test]
    fn empty_range_is_fatal() {
        let assets = vec![flat_asset("AAA", 5, 100.0)];
        let mut config = test_config(5);
        config.start_date = day(100);
        config.end_date = day(110);

        let err = run_backtest(
            &assets,
            &ScriptedOpinions::none(),
            &CombinerConfig::default(),
            &RiskConfig::default(),
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, SigtraderError::EmptyRange { .. }));
    }

    #[test]
    fn ml_buy_signal_opens_a_position_sized_from_prior_close() {
        let assets = vec![flat_asset("AAA", 6, 100.0)];
        // Opinion as of day 2 drives the decision executed on day 3.
        let opinions = ScriptedOpinions::none().with("AAA", day(2), 0.9, 0.9);

        let result = run_backtest(
            &assets,
            &opinions,
            &CombinerConfig::default(),
            &wide_stops(),
            &test_config(6),
        )
        .unwrap();

        let entry = result
            .fills
            .iter()
            .find(|f| f.reason == OrderReason::SignalEntry)
            .expect("entry fill");
        assert_eq!(entry.date, day(3));
        assert_eq!(entry.side, OrderSide::Buy);
        // 15% of 10_000 equity at the prior close of 100.
        assert_relative_eq!(entry.quantity, 15.0);
        assert_relative_eq!(entry.price, 100.0);
        assert!(result.portfolio.closed_trades.iter().any(|t| t.reason == ExitReason::EndOfRun));
    }

    #[test]
    fn entry_quantity_ignores_the_fill_bar_price() {
        // Two runs identical except for the decision bar's own prices: the
        // requested quantity must not change (fills happen at the new close,
        // but sizing saw only data up to the previous bar).
        let base: Vec<OhlcvBar> = (0..5).map(|i| bar("AAA", i, 100.0)).collect();
        let mut spiked = base.clone();
        spiked[3] = bar_ohlc("AAA", 3, 200.0, 201.0, 199.0);

        let opinions = ScriptedOpinions::none().with("AAA", day(2), 0.9, 0.9);
        let config = test_config(5);

        let run = |bars: Vec<OhlcvBar>| {
            run_backtest(
                &[AssetData::new(Asset::equity("AAA"), bars)],
                &opinions,
                &CombinerConfig::default(),
                &wide_stops(),
                &config,
            )
            .unwrap()
        };
        let result_base = run(base);
        let result_spiked = run(spiked);

        let qty = |r: &BacktestResult| {
            r.fills
                .iter()
                .find(|f| f.reason == OrderReason::SignalEntry)
                .map(|f| f.quantity)
                .expect("entry fill")
        };
        assert_relative_eq!(qty(&result_base), qty(&result_spiked));
        // The fill price does track the bar that actually traded.
        assert_relative_eq!(
            result_spiked
                .fills
                .iter()
                .find(|f| f.reason == OrderReason::SignalEntry)
                .unwrap()
                .price,
            200.0
        );
        // History before the mutated bar is untouched.
        for (a, b) in result_base.portfolio.equity_curve[..3]
            .iter()
            .zip(&result_spiked.portfolio.equity_curve[..3])
        {
            assert_relative_eq!(a.equity, b.equity);
        }
    }

    #[test]
    fn sell_signal_closes_at_the_close() {
        let bars: Vec<OhlcvBar> = (0..8).map(|i| bar("AAA", i, 100.0)).collect();
        let opinions = ScriptedOpinions::none()
            .with("AAA", day(2), 0.9, 0.9) // buy on day 3
            .with("AAA", day(4), -0.5, 0.8); // sell on day 5

        let result = run_backtest(
            &[AssetData::new(Asset::equity("AAA"), bars)],
            &opinions,
            &CombinerConfig::default(),
            &wide_stops(),
            &test_config(8),
        )
        .unwrap();

        let exit = result
            .fills
            .iter()
            .find(|f| f.reason == OrderReason::SignalExit)
            .expect("signal exit fill");
        assert_eq!(exit.date, day(5));
        assert_relative_eq!(exit.price, 100.0);
        assert!(!result.portfolio.has_position("AAA"));
        let trade = result
            .portfolio
            .closed_trades
            .iter()
            .find(|t| t.reason == ExitReason::Signal)
            .expect("closed trade");
        assert_relative_eq!(trade.pnl, 0.0);
    }

    #[test]
    fn trailing_stop_exits_at_the_stop_price() {
        let mut bars: Vec<OhlcvBar> = (0..5).map(|i| bar("AAA", i, 100.0)).collect();
        // The high-water mark ratchets to day 4's high of 101, putting the 7%
        // trailing stop at 93.93 before day 5 crashes through it.
        bars.push(bar_ohlc("AAA", 5, 85.0, 88.0, 84.0));
        let opinions = ScriptedOpinions::none().with("AAA", day(2), 0.9, 0.9);

        let risk = RiskConfig {
            atr_multiplier: 50.0, // keep the ATR stop out of the way
            ..RiskConfig::default()
        };
        let result = run_backtest(
            &[AssetData::new(Asset::equity("AAA"), bars)],
            &opinions,
            &CombinerConfig::default(),
            &risk,
            &test_config(6),
        )
        .unwrap();

        let stop_fill = result
            .fills
            .iter()
            .find(|f| f.reason == OrderReason::StopLoss)
            .expect("stop fill");
        assert_eq!(stop_fill.date, day(5));
        // Conservative fill at the stop level, not the bar close.
        assert_relative_eq!(stop_fill.price, 101.0 * 0.93);
        let trade = result
            .portfolio
            .closed_trades
            .iter()
            .find(|t| t.reason == ExitReason::Stop)
            .expect("stop trade");
        assert!(trade.pnl < 0.0);
        assert!(!result.portfolio.has_position("AAA"));
    }

    #[test]
    fn halted_drawdown_discards_new_buys() {
        // AAA: bought on day 3 with an oversized position cap, then crashes
        // 15% on day 4, dragging portfolio drawdown past the 12% halt line.
        // BBB: gets a strong buy opinion for day 5 — must be rejected.
        let mut aaa_bars: Vec<OhlcvBar> = (0..4).map(|i| bar("AAA", i, 100.0)).collect();
        aaa_bars.push(bar_ohlc("AAA", 4, 85.0, 86.0, 84.0));
        aaa_bars.push(bar_ohlc("AAA", 5, 85.0, 86.0, 84.0));
        let bbb_bars: Vec<OhlcvBar> = (0..6).map(|i| bar("BBB", i, 50.0)).collect();

        let opinions = ScriptedOpinions::none()
            .with("AAA", day(2), 0.9, 0.9)
            .with("BBB", day(4), 0.9, 0.9);

        let risk = RiskConfig {
            max_position_pct: 1.0, // let the whole book ride on AAA
            trailing_pct: 0.5,
            atr_multiplier: 50.0,
            ..RiskConfig::default()
        };
        let result = run_backtest(
            &[
                AssetData::new(Asset::equity("AAA"), aaa_bars),
                AssetData::new(Asset::equity("BBB"), bbb_bars),
            ],
            &opinions,
            &CombinerConfig::default(),
            &risk,
            &test_config(6),
        )
        .unwrap();

        let rejection = result
            .rejected
            .iter()
            .find(|r| r.symbol == "BBB")
            .expect("BBB buy should be rejected");
        assert_eq!(rejection.reason, RejectReason::Halted);
        assert_eq!(rejection.date, day(5));
        assert!(
            !result
                .fills
                .iter()
                .any(|f| f.symbol == "BBB" && f.side == OrderSide::Buy),
            "no BBB entry may fill during HALT"
        );
    }

    #[test]
    fn data_gaps_skip_the_asset_not_the_run() {
        // AAA is missing day 2 entirely.
        let bars = vec![
            bar("AAA", 0, 100.0),
            bar("AAA", 1, 100.0),
            bar("AAA", 3, 100.0),
            bar("AAA", 4, 100.0),
        ];
        let bbb: Vec<OhlcvBar> = (0..5).map(|i| bar("BBB", i, 50.0)).collect();

        let result = run_backtest(
            &[
                AssetData::new(Asset::equity("AAA"), bars),
                AssetData::new(Asset::equity("BBB"), bbb),
            ],
            &ScriptedOpinions::none(),
            &CombinerConfig::default(),
            &RiskConfig::default(),
            &test_config(5),
        )
        .unwrap();

        // Timeline covers all five dates; equity stays marked throughout.
        assert_eq!(result.portfolio.equity_curve.len(), 5);
        for point in &result.portfolio.equity_curve {
            assert_relative_eq!(point.equity, 10_000.0);
        }
    }

    #[test]
    fn identical_inputs_identical_outputs() {
        let mut bars: Vec<OhlcvBar> = (0..20)
            .map(|i| bar("AAA", i, 100.0 + (i % 5) as f64))
            .collect();
        bars[15] = bar_ohlc("AAA", 15, 92.0, 93.0, 91.0);
        let opinions = ScriptedOpinions::none()
            .with("AAA", day(4), 0.9, 0.9)
            .with("AAA", day(10), -0.5, 0.7)
            .with("AAA", day(12), 0.9, 0.9);

        let run = || {
            run_backtest(
                &[AssetData::new(Asset::equity("AAA"), bars.clone())],
                &opinions,
                &CombinerConfig::default(),
                &RiskConfig::default(),
                &test_config(20),
            )
            .unwrap()
        };
        let a = run();
        let b = run();

        assert_eq!(a.portfolio.equity_curve, b.portfolio.equity_curve);
        assert_eq!(a.fills, b.fills);
        assert_eq!(a.rejected, b.rejected);
        assert_eq!(a.benchmark, b.benchmark);
    }

    #[test]
    fn commissions_are_charged_on_fills() {
        let assets = vec![flat_asset("AAA", 6, 100.0)];
        let opinions = ScriptedOpinions::none().with("AAA", day(2), 0.9, 0.9);
        let mut config = test_config(6);
        config.commission_per_trade = 1.0;
        config.commission_pct = 0.1;

        let result = run_backtest(
            &assets,
            &opinions,
            &CombinerConfig::default(),
            &wide_stops(),
            &config,
        )
        .unwrap();

        let entry = result
            .fills
            .iter()
            .find(|f| f.reason == OrderReason::SignalEntry)
            .unwrap();
        let expected = 1.0 + entry.quantity * entry.price * 0.1 / 100.0;
        assert_relative_eq!(entry.commission, expected);

        // Flat prices + round-trip commissions → the one trade loses money.
        let trade = &result.portfolio.closed_trades[0];
        assert!(trade.pnl < 0.0);
    }

    #[test]
    fn rebalance_proposals_follow_the_schedule() {
        let n = 80u32;
        let aaa: Vec<OhlcvBar> = (0..n)
            .map(|i| bar("AAA", i, 100.0 + ((i % 7) as f64) * 0.5))
            .collect();
        let bbb: Vec<OhlcvBar> = (0..n)
            .map(|i| bar("BBB", i, 50.0 + ((i % 5) as f64) * 0.4))
            .collect();

        let mut config = test_config(n);
        config.rebalance_interval = 70;

        let result = run_backtest(
            &[
                AssetData::new(Asset::equity("AAA"), aaa),
                AssetData::new(Asset::equity("BBB"), bbb),
            ],
            &ScriptedOpinions::none(),
            &CombinerConfig::default(),
            &RiskConfig::default(),
            &config,
        )
        .unwrap();

        assert_eq!(result.rebalances.len(), 1);
        let proposal = &result.rebalances[0];
        assert_eq!(proposal.date, day(70));
        // All-cash portfolio: any non-trivial target shows up as BUY deltas.
        assert!(proposal
            .suggestions
            .iter()
            .all(|s| s.side == OrderSide::Buy));
    }

    #[test]
    fn benchmark_tracks_buy_and_hold() {
        // Single asset doubling in price: benchmark doubles too.
        let bars: Vec<OhlcvBar> = (0..4)
            .map(|i| bar("AAA", i, 100.0 * (1.0 + i as f64 / 3.0)))
            .collect();
        let result = run_backtest(
            &[AssetData::new(Asset::equity("AAA"), bars)],
            &ScriptedOpinions::none(),
            &CombinerConfig::default(),
            &RiskConfig::default(),
            &test_config(4),
        )
        .unwrap();

        assert_relative_eq!(result.benchmark.first().unwrap().equity, 10_000.0);
        assert_relative_eq!(result.benchmark.last().unwrap().equity, 20_000.0);
    }
}
