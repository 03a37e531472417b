//! Combined trading signals.

use chrono::NaiveDate;
use std::fmt;

use crate::domain::opinion::ScoredOpinion;

/// Recommended action for one asset at one evaluation timestamp.
///
/// `Hold` means "evaluated, no trade signal"; `Unavailable` means "could not
/// evaluate" (no sources reported). The distinction matters downstream: an
/// `Unavailable` asset should not be treated as a deliberate no-trade vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
    Unavailable,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "BUY"),
            SignalAction::Sell => write!(f, "SELL"),
            SignalAction::Hold => write!(f, "HOLD"),
            SignalAction::Unavailable => write!(f, "UNAVAILABLE"),
        }
    }
}

/// The combiner's output for one (asset, timestamp). Never mutated after
/// creation; `components` records the opinions actually fused.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub date: NaiveDate,
    pub composite_score: f64,
    pub confidence: f64,
    pub action: SignalAction,
    pub components: Vec<ScoredOpinion>,
}

/// Rank signals for display: BUY first, then HOLD, then SELL, then
/// UNAVAILABLE, strongest absolute score first within each group.
pub fn rank_signals(mut signals: Vec<Signal>) -> Vec<Signal> {
    fn group(action: SignalAction) -> u8 {
        match action {
            SignalAction::Buy => 0,
            SignalAction::Hold => 1,
            SignalAction::Sell => 2,
            SignalAction::Unavailable => 3,
        }
    }
    signals.sort_by(|a, b| {
        group(a.action).cmp(&group(b.action)).then(
            b.composite_score
                .abs()
                .partial_cmp(&a.composite_score.abs())
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
    signals
}
