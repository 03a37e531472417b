#![allow(dead_code)]

use chrono::NaiveDate;
use std::collections::HashMap;

use sigtrader::domain::asset::Asset;
use sigtrader::domain::asset_data::AssetData;
use sigtrader::domain::backtest::BacktestConfig;
use sigtrader::domain::error::SigtraderError;
use sigtrader::domain::ohlcv::OhlcvBar;
use sigtrader::domain::opinion::{ScoredOpinion, SignalSource};
use sigtrader::domain::optimizer::Objective;
use sigtrader::ports::data_port::DataPort;
use sigtrader::ports::opinion_port::OpinionPort;

pub fn day(offset: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(offset as i64)
}

pub fn make_bar(symbol: &str, offset: u32, close: f64) -> OhlcvBar {
    make_bar_ohlc(symbol, offset, close, close + 1.0, close - 1.0)
}

pub fn make_bar_ohlc(symbol: &str, offset: u32, close: f64, high: f64, low: f64) -> OhlcvBar {
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

pub fn flat_bars(symbol: &str, n: u32, close: f64) -> Vec<OhlcvBar> {
    (0..n).map(|i| make_bar(symbol, i, close)).collect()
}

pub fn flat_asset(symbol: &str, n: u32, close: f64) -> AssetData {
    AssetData::new(Asset::equity(symbol), flat_bars(symbol, n, close))
}

pub fn flat_crypto(symbol: &str, n: u32, close: f64) -> AssetData {
    AssetData::new(Asset::crypto(symbol), flat_bars(symbol, n, close))
}

pub fn test_backtest_config(n_days: u32) -> BacktestConfig {
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

/// Scripted opinions keyed by (symbol, source, as-of date).
pub struct ScriptedOpinions {
    entries: HashMap<(String, SignalSource, NaiveDate), (f64, f64)>,
}

impl ScriptedOpinions {
    pub fn none() -> Self {
        ScriptedOpinions {
            entries: HashMap::new(),
        }
    }

    pub fn with(
        mut self,
        symbol: &str,
        source: SignalSource,
        as_of: NaiveDate,
        score: f64,
        confidence: f64,
    ) -> Self {
        self.entries
            .insert((symbol.to_string(), source, as_of), (score, confidence));
        self
    }

    pub fn with_ml(self, symbol: &str, as_of: NaiveDate, score: f64, confidence: f64) -> Self {
        self.with(symbol, SignalSource::Ml, as_of, score, confidence)
    }
}

impl OpinionPort for ScriptedOpinions {
    fn opinion(
        &self,
        symbol: &str,
        source: SignalSource,
        as_of: NaiveDate,
    ) -> Option<ScoredOpinion> {
        self.entries
            .get(&(symbol.to_string(), source, as_of))
            .map(|&(score, confidence)| ScoredOpinion::new(source, score, confidence, as_of))
    }
}

pub struct MockDataPort {
    pub data: HashMap<String, Vec<OhlcvBar>>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<OhlcvBar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        symbol: &str,
        _start_date: NaiveDate,
        _end_date: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, SigtraderError> {
        self.data
            .get(symbol)
            .cloned()
            .ok_or_else(|| SigtraderError::NoData {
                symbol: symbol.to_string(),
            })
    }

    fn list_symbols(&self) -> Result<Vec<String>, SigtraderError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}
