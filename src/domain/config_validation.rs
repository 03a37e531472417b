//! Configuration validation.
//!
//! All invariants are checked up front, before a run starts: weights summing
//! to 1, threshold ordering, cap ranges, date ordering. Invalid configuration
//! is fatal — nothing here is silently corrected.

use crate::domain::error::SigtraderError;
use crate::domain::optimizer::Objective;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    validate_backtest_section(config)?;
    validate_signals_section(config)?;
    validate_risk_section(config)?;
    validate_optimizer_section(config)?;
    validate_watchlist_section(config)?;
    Ok(())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> SigtraderError {
    SigtraderError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> SigtraderError {
    SigtraderError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn validate_backtest_section(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    let capital = config.get_double("backtest", "initial_capital", 100_000.0);
    if capital <= 0.0 {
        return Err(invalid("backtest", "initial_capital", "must be positive"));
    }

    if config.get_double("backtest", "commission_per_trade", 0.0) < 0.0 {
        return Err(invalid("backtest", "commission_per_trade", "must be non-negative"));
    }
    if config.get_double("backtest", "commission_pct", 0.0) < 0.0 {
        return Err(invalid("backtest", "commission_pct", "must be non-negative"));
    }

    let rf = config.get_double("backtest", "risk_free_rate", 0.04);
    if !(0.0..1.0).contains(&rf) {
        return Err(invalid("backtest", "risk_free_rate", "must be between 0 and 1"));
    }

    if config.get_double("backtest", "periods_per_year", 252.0) <= 0.0 {
        return Err(invalid("backtest", "periods_per_year", "must be positive"));
    }

    if config.get_int("backtest", "min_history", 30) < 1 {
        return Err(invalid("backtest", "min_history", "must be at least 1"));
    }
    if config.get_int("backtest", "rebalance_interval", 0) < 0 {
        return Err(invalid("backtest", "rebalance_interval", "must be non-negative"));
    }

    let start = parse_date(config, "start_date")?;
    let end = parse_date(config, "end_date")?;
    if start >= end {
        return Err(invalid("backtest", "start_date", "start_date must be before end_date"));
    }
    Ok(())
}

fn parse_date(config: &dyn ConfigPort, key: &str) -> Result<NaiveDate, SigtraderError> {
    match config.get_string("backtest", key) {
        None => Err(missing("backtest", key)),
        Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| {
            invalid(
                "backtest",
                key,
                format!("invalid {key} format, expected YYYY-MM-DD"),
            )
        }),
    }
}

fn validate_signals_section(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    let technical = config.get_double("signals", "technical_weight", 0.35);
    let sentiment = config.get_double("signals", "sentiment_weight", 0.25);
    let ml = config.get_double("signals", "ml_weight", 0.40);
    if technical < 0.0 || sentiment < 0.0 || ml < 0.0 {
        return Err(invalid("signals", "weights", "weights must be non-negative"));
    }
    let sum = technical + sentiment + ml;
    if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(invalid(
            "signals",
            "weights",
            format!("technical, sentiment and ml weights must sum to 1, got {sum}"),
        ));
    }

    let buy = config.get_double("signals", "buy_threshold", 0.3);
    let sell = config.get_double("signals", "sell_threshold", -0.2);
    if !(-1.0..=1.0).contains(&buy) || !(-1.0..=1.0).contains(&sell) {
        return Err(invalid("signals", "buy_threshold", "thresholds must be within [-1, 1]"));
    }
    if sell >= buy {
        return Err(invalid(
            "signals",
            "sell_threshold",
            "sell_threshold must be below buy_threshold",
        ));
    }

    let confidence = config.get_double("signals", "buy_confidence_min", 0.65);
    if !(0.0..=1.0).contains(&confidence) {
        return Err(invalid("signals", "buy_confidence_min", "must be within [0, 1]"));
    }
    Ok(())
}

fn validate_risk_section(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    let warning = config.get_double("risk", "drawdown_warning", 0.08);
    let halt = config.get_double("risk", "drawdown_halt", 0.12);
    if !(0.0..1.0).contains(&warning) || warning == 0.0 {
        return Err(invalid("risk", "drawdown_warning", "must be between 0 and 1"));
    }
    if !(0.0..1.0).contains(&halt) || halt == 0.0 {
        return Err(invalid("risk", "drawdown_halt", "must be between 0 and 1"));
    }
    if warning >= halt {
        return Err(invalid(
            "risk",
            "drawdown_warning",
            "drawdown_warning must be below drawdown_halt",
        ));
    }

    let max_position = config.get_double("risk", "max_position_pct", 0.15);
    if max_position <= 0.0 || max_position > 1.0 {
        return Err(invalid("risk", "max_position_pct", "must be between 0 and 1"));
    }
    let max_crypto = config.get_double("risk", "max_crypto_pct", 0.30);
    if max_crypto <= 0.0 || max_crypto > 1.0 {
        return Err(invalid("risk", "max_crypto_pct", "must be between 0 and 1"));
    }

    if config.get_double("risk", "atr_multiplier", 2.0) <= 0.0 {
        return Err(invalid("risk", "atr_multiplier", "must be positive"));
    }
    let trailing = config.get_double("risk", "trailing_stop_pct", 0.07);
    if trailing <= 0.0 || trailing >= 1.0 {
        return Err(invalid("risk", "trailing_stop_pct", "must be between 0 and 1"));
    }
    Ok(())
}

fn validate_optimizer_section(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    if let Some(objective) = config.get_string("optimizer", "objective") {
        objective
            .parse::<Objective>()
            .map_err(|reason| invalid("optimizer", "objective", reason))?;
    }
    let min_trade = config.get_double("optimizer", "min_trade_pct", 0.01);
    if !(0.0..1.0).contains(&min_trade) {
        return Err(invalid("optimizer", "min_trade_pct", "must be between 0 and 1"));
    }
    Ok(())
}

fn validate_watchlist_section(config: &dyn ConfigPort) -> Result<(), SigtraderError> {
    match config.get_string("watchlist", "symbols") {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(missing("watchlist", "symbols")),
    }
}
