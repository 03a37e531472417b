//! Position tracking.
//!
//! Positions are long-only: quantity is always non-negative and the portfolio
//! holds at most one position per asset. Two stop candidates protect each
//! position — a fixed ATR stop set at entry and a trailing stop that ratchets
//! with the high-water mark — and the tighter (higher) one is active.

use chrono::NaiveDate;

use crate::domain::asset::AssetClass;

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub class: AssetClass,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_date: NaiveDate,
    pub entry_commission: f64,
    /// Fixed stop set at entry from ATR; 0.0 when ATR was unavailable.
    pub atr_stop: f64,
    /// Highest price seen since entry. Only ever increases.
    pub high_water_mark: f64,
    /// `high_water_mark * (1 - trailing_pct)`; recomputed when the mark moves.
    pub trailing_stop: f64,
}

impl Position {
    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.quantity * (price - self.entry_price)
    }

    /// The tighter of the two stop candidates.
    pub fn active_stop(&self) -> f64 {
        self.atr_stop.max(self.trailing_stop)
    }

    /// Ratchet the high-water mark. The mark never decreases; the trailing
    /// stop moves up with it.
    pub fn ratchet_high_water(&mut self, price: f64, trailing_pct: f64) {
        if price > self.high_water_mark {
            self.high_water_mark = price;
            self.trailing_stop = price * (1.0 - trailing_pct);
        }
    }

    /// A stop fires when the bar's low crosses at or below the active stop.
    pub fn stop_triggered(&self, bar_low: f64) -> bool {
        let stop = self.active_stop();
        stop > 0.0 && bar_low <= stop
    }
}

/// How a round-trip ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Stop,
    Signal,
    EndOfRun,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Stop => write!(f, "stop"),
            ExitReason::Signal => write!(f, "signal"),
            ExitReason::EndOfRun => write!(f, "end-of-run"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedTrade {
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_date: NaiveDate,
    pub exit_date: NaiveDate,
    pub pnl: f64,
    pub reason: ExitReason,
}
