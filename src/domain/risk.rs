//! Risk management: drawdown state machine, position sizing, stop levels.
//!
//! The drawdown state machine gates new entries. Drawdown is always measured
//! against the running peak and only resets when a new peak is made. Recovery
//! from WARNING or HALT happens at the warning boundary — there is no separate
//! recovery threshold, which gives the machine hysteresis between the warning
//! and halt levels.

use std::collections::HashMap;

use crate::domain::asset::AssetClass;
use crate::domain::portfolio::Portfolio;
use crate::domain::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskMode {
    Normal,
    Warning,
    Halt,
}

impl std::fmt::Display for RiskMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskMode::Normal => write!(f, "NORMAL"),
            RiskMode::Warning => write!(f, "WARNING"),
            RiskMode::Halt => write!(f, "HALT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    /// Drawdown at which WARNING is entered (advisory only).
    pub drawdown_warning: f64,
    /// Drawdown at which HALT is entered (new BUYs rejected).
    pub drawdown_halt: f64,
    /// Cap on a single position as a fraction of total equity.
    pub max_position_pct: f64,
    /// Cap on aggregate crypto value as a fraction of total equity.
    pub max_crypto_pct: f64,
    /// ATR stop distance: entry − multiplier · ATR.
    pub atr_multiplier: f64,
    /// Trailing stop distance below the high-water mark.
    pub trailing_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            drawdown_warning: 0.08,
            drawdown_halt: 0.12,
            max_position_pct: 0.15,
            max_crypto_pct: 0.30,
            atr_multiplier: 2.0,
            trailing_pct: 0.07,
        }
    }
}

/// Derived from equity history every bar; never persisted independently.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskState {
    pub peak_equity: f64,
    pub current_drawdown: f64,
    pub mode: RiskMode,
}

impl RiskState {
    pub fn new(initial_equity: f64) -> Self {
        RiskState {
            peak_equity: initial_equity,
            current_drawdown: 0.0,
            mode: RiskMode::Normal,
        }
    }

    /// Fold the latest equity observation into the state.
    pub fn update(&mut self, equity: f64, config: &RiskConfig) {
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.current_drawdown = if self.peak_equity > 0.0 {
            (self.peak_equity - equity) / self.peak_equity
        } else {
            0.0
        };

        self.mode = if self.current_drawdown >= config.drawdown_halt {
            RiskMode::Halt
        } else if self.current_drawdown < config.drawdown_warning {
            RiskMode::Normal
        } else if self.mode == RiskMode::Halt {
            // Between warning and halt: a halted machine stays halted until
            // drawdown falls below the warning boundary.
            RiskMode::Halt
        } else {
            RiskMode::Warning
        };
    }

    pub fn allows_buy(&self) -> bool {
        self.mode != RiskMode::Halt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Why an order was generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderReason {
    SignalEntry,
    SignalExit,
    StopLoss,
    EndOfRun,
}

impl std::fmt::Display for OrderReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderReason::SignalEntry => write!(f, "signal-entry"),
            OrderReason::SignalExit => write!(f, "signal-exit"),
            OrderReason::StopLoss => write!(f, "stop-loss"),
            OrderReason::EndOfRun => write!(f, "end-of-run"),
        }
    }
}

/// Ephemeral trade instruction, consumed within one simulation step.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub reason: OrderReason,
}

/// Why a BUY was discarded instead of becoming an order. An outcome, not an
/// error: the run always continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Halted,
    CapExceeded,
    InsufficientCash,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Halted => write!(f, "halted"),
            RejectReason::CapExceeded => write!(f, "cap-exceeded"),
            RejectReason::InsufficientCash => write!(f, "insufficient-cash"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizingOutcome {
    Order(Order),
    Rejected(RejectReason),
}

/// Notional already claimed by orders queued earlier in the same step, so a
/// batch of same-bar entries cannot jointly breach the caps.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PendingExposure {
    pub cash: f64,
    pub crypto_value: f64,
}

impl PendingExposure {
    /// Claim an order's notional, counting it toward the crypto aggregate
    /// when applicable.
    pub fn reserve(&mut self, value: f64, class: AssetClass) {
        self.cash += value;
        if class == AssetClass::Crypto {
            self.crypto_value += value;
        }
    }
}

/// Size a BUY for `symbol` at `price` against the current portfolio.
///
/// Target value is `min(max_position_pct · equity, available cash)`; crypto
/// entries are further downsized to the remaining crypto headroom, or
/// rejected with `CapExceeded` when no headroom is left. HALT rejects
/// outright.
pub fn size_buy(
    symbol: &str,
    class: AssetClass,
    price: f64,
    portfolio: &Portfolio,
    marks: &HashMap<String, f64>,
    pending: &PendingExposure,
    state: &RiskState,
    config: &RiskConfig,
) -> SizingOutcome {
    if !state.allows_buy() {
        return SizingOutcome::Rejected(RejectReason::Halted);
    }
    if price <= 0.0 {
        return SizingOutcome::Rejected(RejectReason::InsufficientCash);
    }

    // Pending entries move cash into assets without changing total equity.
    let equity = portfolio.total_equity(marks);
    let available_cash = portfolio.cash - pending.cash;
    let mut target_value = (config.max_position_pct * equity).min(available_cash);

    if class == AssetClass::Crypto {
        let exposure = portfolio.crypto_exposure(marks) + pending.crypto_value;
        let headroom = config.max_crypto_pct * equity - exposure;
        if headroom <= 0.0 {
            return SizingOutcome::Rejected(RejectReason::CapExceeded);
        }
        target_value = target_value.min(headroom);
    }

    if target_value <= 0.0 {
        return SizingOutcome::Rejected(RejectReason::InsufficientCash);
    }

    SizingOutcome::Order(Order {
        symbol: symbol.to_string(),
        side: OrderSide::Buy,
        quantity: target_value / price,
        reason: OrderReason::SignalEntry,
    })
}

/// Initial stop levels for a fill at `entry_price`. The ATR stop is disabled
/// (0.0) when no ATR could be computed from the available history.
pub fn initial_stops(entry_price: f64, atr: Option<f64>, config: &RiskConfig) -> (f64, f64) {
    let atr_stop = match atr {
        Some(a) if a > 0.0 => (entry_price - config.atr_multiplier * a).max(0.0),
        _ => 0.0,
    };
    let trailing_stop = entry_price * (1.0 - config.trailing_pct);
    (atr_stop, trailing_stop)
}

/// Advance a position's trailing stop for the bar's high. Stop updates are the
/// risk manager's responsibility; the ratchet itself lives on [`Position`].
pub fn update_trailing_stop(position: &mut Position, bar_high: f64, config: &RiskConfig) {
    position.ratchet_high_water(bar_high, config.trailing_pct);
}

/// Result of a non-mutating limit check for a proposed position value.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitCheck {
    pub allowed: bool,
    pub violations: Vec<String>,
}

/// Queryable form of the sizing caps: reports which limits a proposed value
/// would breach without mutating anything.
pub fn check_position_limits(
    class: AssetClass,
    proposed_value: f64,
    portfolio: &Portfolio,
    marks: &HashMap<String, f64>,
    config: &RiskConfig,
) -> LimitCheck {
    let mut violations = Vec::new();
    let equity = portfolio.total_equity(marks);

    let position_pct = if equity > 0.0 {
        proposed_value / equity
    } else {
        1.0
    };
    if position_pct > config.max_position_pct {
        violations.push(format!(
            "position {:.1}% exceeds max {:.0}%",
            position_pct * 100.0,
            config.max_position_pct * 100.0
        ));
    }

    if class == AssetClass::Crypto && equity > 0.0 {
        let crypto_pct = (portfolio.crypto_exposure(marks) + proposed_value) / equity;
        if crypto_pct > config.max_crypto_pct {
            violations.push(format!(
                "crypto allocation {:.1}% exceeds max {:.0}%",
                crypto_pct * 100.0,
                config.max_crypto_pct * 100.0
            ));
        }
    }

    LimitCheck {
        allowed: violations.is_empty(),
        violations,
    }
}
