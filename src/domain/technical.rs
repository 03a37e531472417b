//! Technical indicator scoring.
//!
//! Derives the Technical `ScoredOpinion` from price history alone: RSI, MACD,
//! Bollinger %B, moving-average trend, and stochastic readings are each scored
//! into [-1, 1], then fused with fixed internal weights. Confidence reflects
//! directional agreement among the non-neutral sub-scores.
//!
//! All helpers evaluate at the *last* bar of the slice they are given, so the
//! caller controls the as-of point by slicing history.

use chrono::NaiveDate;

use crate::domain::ohlcv::OhlcvBar;
use crate::domain::opinion::{ScoredOpinion, SignalSource};

const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_STDDEV: f64 = 2.0;
const STOCH_K: usize = 14;
const STOCH_D: usize = 3;
const ATR_PERIOD: usize = 14;

/// Minimum bars before any technical opinion is produced. Below this even the
/// shortest sub-score (RSI) has no valid value.
pub const MIN_TECHNICAL_BARS: usize = 15;

fn closes(bars: &[OhlcvBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

fn sma_last(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    Some(values[values.len() - period..].iter().sum::<f64>() / period as f64)
}

/// EMA over the whole series, seeded with the first value (alpha = 2/(n+1)).
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    if values.is_empty() || period == 0 {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut ema = values[0];
    out.push(ema);
    for &v in &values[1..] {
        ema = alpha * v + (1.0 - alpha) * ema;
        out.push(ema);
    }
    out
}

/// RSI at the last bar using Wilder's smoothing: the first average is a simple
/// mean of gains/losses, then avg = (prev_avg * (n-1) + current) / n.
fn rsi_last(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }
    let mut gains = Vec::with_capacity(values.len() - 1);
    let mut losses = Vec::with_capacity(values.len() - 1);
    for w in values.windows(2) {
        let change = w[1] - w[0];
        gains.push(if change > 0.0 { change } else { 0.0 });
        losses.push(if change < 0.0 { -change } else { 0.0 });
    }

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;
    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
    }

    if avg_loss == 0.0 {
        // All-flat history has no momentum reading at all.
        if avg_gain == 0.0 {
            return None;
        }
        return Some(100.0);
    }
    Some(100.0 - 100.0 / (1.0 + avg_gain / avg_loss))
}

/// MACD (line, signal, histogram) at the last bar.
fn macd_last(values: &[f64], fast: usize, slow: usize, signal: usize) -> Option<(f64, f64, f64)> {
    if values.len() < slow + signal {
        return None;
    }
    let ema_fast = ema_series(values, fast);
    let ema_slow = ema_series(values, slow);
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&macd_line, signal);
    let line = *macd_line.last()?;
    let sig = *signal_line.last()?;
    Some((line, sig, line - sig))
}

/// Bollinger %B at the last bar: (close - lower) / (upper - lower).
fn bollinger_pct_last(values: &[f64], period: usize, stddev_mult: f64) -> Option<f64> {
    if period < 2 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    // Sample standard deviation (n-1 denominator).
    let variance =
        window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
    let sd = variance.sqrt();
    let upper = mean + stddev_mult * sd;
    let lower = mean - stddev_mult * sd;
    let width = upper - lower;
    if width == 0.0 {
        return None;
    }
    Some((values[values.len() - 1] - lower) / width)
}

/// Stochastic %K and %D at the last bar.
fn stochastic_last(bars: &[OhlcvBar], k_period: usize, d_period: usize) -> Option<(f64, f64)> {
    if k_period == 0 || d_period == 0 || bars.len() < k_period + d_period - 1 {
        return None;
    }
    let k_at = |end: usize| -> Option<f64> {
        let window = &bars[end + 1 - k_period..=end];
        let low_min = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let high_max = window
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let range = high_max - low_min;
        if range == 0.0 {
            return None;
        }
        Some(100.0 * (bars[end].close - low_min) / range)
    };

    let last = bars.len() - 1;
    let k = k_at(last)?;
    let mut k_sum = 0.0;
    for end in last + 1 - d_period..=last {
        k_sum += k_at(end)?;
    }
    Some((k, k_sum / d_period as f64))
}

/// Average True Range at the last bar (simple mean of the last `period` true
/// ranges). Needs `period + 1` bars for the first previous close.
pub fn average_true_range(bars: &[OhlcvBar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let start = bars.len() - period;
    let mut sum = 0.0;
    for i in start..bars.len() {
        sum += bars[i].true_range(bars[i - 1].close);
    }
    Some(sum / period as f64)
}

/// ATR at the default period used for stop computation.
pub fn atr(bars: &[OhlcvBar]) -> Option<f64> {
    average_true_range(bars, ATR_PERIOD)
}

fn score_rsi(rsi: f64) -> f64 {
    if rsi < 30.0 {
        0.5 + (30.0 - rsi) / 60.0
    } else if rsi > 70.0 {
        -0.5 - (rsi - 70.0) / 60.0
    } else {
        (50.0 - rsi) / 40.0
    }
}

fn score_macd(signal: f64, histogram: f64) -> f64 {
    let scaled = histogram / (signal.abs() + 1e-8) * 0.5;
    scaled.clamp(-1.0, 1.0)
}

fn score_bollinger(pct_b: f64) -> f64 {
    if pct_b < 0.1 {
        0.6
    } else if pct_b > 0.9 {
        -0.6
    } else {
        (0.5 - pct_b) * 0.8
    }
}

fn score_ma_trend(close: f64, sma_20: Option<f64>, sma_50: Option<f64>, sma_200: Option<f64>) -> f64 {
    let mut score: f64 = 0.0;
    if let Some(s20) = sma_20 {
        score += if close > s20 { 0.2 } else { -0.2 };
    }
    if let Some(s50) = sma_50 {
        score += if close > s50 { 0.2 } else { -0.2 };
    }
    if let Some(s200) = sma_200 {
        score += if close > s200 { 0.3 } else { -0.3 };
    }
    if let (Some(s20), Some(s50)) = (sma_20, sma_50) {
        score += if s20 > s50 { 0.15 } else { -0.15 };
    }
    score.clamp(-1.0, 1.0)
}

fn score_stochastic(k: f64, d: f64) -> f64 {
    if k < 20.0 && d < 20.0 {
        0.5
    } else if k > 80.0 && d > 80.0 {
        -0.5
    } else if k > d {
        0.2
    } else {
        -0.2
    }
}

/// Compute the technical opinion at the last bar of `bars`, or `None` when
/// there is too little history for any sub-score. Indicators that are still
/// warming up contribute a neutral zero.
pub fn technical_opinion(bars: &[OhlcvBar], as_of: NaiveDate) -> Option<ScoredOpinion> {
    if bars.len() < MIN_TECHNICAL_BARS {
        return None;
    }
    let close_values = closes(bars);
    let close = *close_values.last()?;

    let rsi_score = rsi_last(&close_values, RSI_PERIOD).map_or(0.0, score_rsi);
    let macd_score = macd_last(&close_values, MACD_FAST, MACD_SLOW, MACD_SIGNAL)
        .map_or(0.0, |(_, signal, histogram)| score_macd(signal, histogram));
    let bollinger_score = bollinger_pct_last(&close_values, BOLLINGER_PERIOD, BOLLINGER_STDDEV)
        .map_or(0.0, score_bollinger);
    let ma_score = score_ma_trend(
        close,
        sma_last(&close_values, 20),
        sma_last(&close_values, 50),
        sma_last(&close_values, 200),
    );
    let stoch_score = stochastic_last(bars, STOCH_K, STOCH_D).map_or(0.0, |(k, d)| score_stochastic(k, d));

    let scores = [
        (rsi_score, 0.20),
        (macd_score, 0.25),
        (bollinger_score, 0.15),
        (ma_score, 0.25),
        (stoch_score, 0.15),
    ];
    let composite: f64 = scores.iter().map(|(s, w)| s * w).sum();

    // Agreement among non-neutral sub-scores drives confidence.
    let directions: Vec<i32> = scores
        .iter()
        .map(|(s, _)| {
            if *s > 0.1 {
                1
            } else if *s < -0.1 {
                -1
            } else {
                0
            }
        })
        .filter(|d| *d != 0)
        .collect();
    let agreement = if directions.is_empty() {
        0.0
    } else {
        directions.iter().sum::<i32>().abs() as f64 / directions.len() as f64
    };
    let confidence = (0.4 + 0.6 * agreement).min(1.0);

    Some(ScoredOpinion::new(
        SignalSource::Technical,
        composite,
        confidence,
        as_of,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_bar(day: u32, close: f64) -> OhlcvBar {
        make_bar_hl(day, close, close + 1.0, close - 1.0)
    }

    fn make_bar_hl(day: u32, close: f64, high: f64, low: f64) -> OhlcvBar {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(day as i64);
        OhlcvBar {
            symbol: "TEST".into(),
            date,
            open: close,
            high,
            low,
            close,
            volume: 1_000.0,
        }
    }

    fn rising_bars(n: usize) -> Vec<OhlcvBar> {
        (0..n).map(|i| make_bar(i as u32, 100.0 + i as f64)).collect()
    }

    fn falling_bars(n: usize) -> Vec<OhlcvBar> {
        (0..n).map(|i| make_bar(i as u32, 200.0 - i as f64)).collect()
    }

    #[test]
    fn sma_last_requires_full_window() {
        assert!(sma_last(&[1.0, 2.0], 3).is_none());
        assert_relative_eq!(sma_last(&[1.0, 2.0, 3.0], 3).unwrap(), 2.0);
        assert_relative_eq!(sma_last(&[1.0, 2.0, 3.0, 4.0], 2).unwrap(), 3.5);
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let values: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_relative_eq!(rsi_last(&values, 14).unwrap(), 100.0);
    }

    #[test]
    fn rsi_all_losses_is_0() {
        let values: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_relative_eq!(rsi_last(&values, 14).unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn rsi_flat_series_has_no_reading() {
        let values = vec![100.0; 20];
        assert!(rsi_last(&values, 14).is_none());
    }

    #[test]
    fn rsi_needs_period_plus_one() {
        let values: Vec<f64> = (0..14).map(|i| 100.0 + i as f64).collect();
        assert!(rsi_last(&values, 14).is_none());
    }

    #[test]
    fn rsi_in_range() {
        let values: Vec<f64> = (0..40)
            .map(|i| 100.0 + ((i % 7) as f64 - 3.0) * 2.0)
            .collect();
        let rsi = rsi_last(&values, 14).unwrap();
        assert!((0.0..=100.0).contains(&rsi));
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let values: Vec<f64> = (0..60).map(|i| 100.0 * 1.01f64.powi(i)).collect();
        let (line, _, histogram) = macd_last(&values, 12, 26, 9).unwrap();
        assert!(line > 0.0);
        assert!(histogram > 0.0);
    }

    #[test]
    fn macd_needs_warmup() {
        let values: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert!(macd_last(&values, 12, 26, 9).is_none());
    }

    #[test]
    fn bollinger_pct_near_one_in_steady_rise() {
        let values: Vec<f64> = (0..25).map(|i| 100.0 + i as f64).collect();
        let pct = bollinger_pct_last(&values, 20, 2.0).unwrap();
        assert!(pct > 0.5);
    }

    #[test]
    fn bollinger_flat_series_has_no_width() {
        let values = vec![100.0; 25];
        assert!(bollinger_pct_last(&values, 20, 2.0).is_none());
    }

    #[test]
    fn stochastic_high_in_uptrend() {
        let bars = rising_bars(20);
        let (k, d) = stochastic_last(&bars, 14, 3).unwrap();
        assert!(k > 80.0);
        assert!(d > 80.0);
    }

    #[test]
    fn atr_constant_range() {
        // Every bar has high-low = 2 and |close step| = 1, so TR = 2.
        let bars = rising_bars(20);
        assert_relative_eq!(average_true_range(&bars, 14).unwrap(), 2.0);
    }

    #[test]
    fn atr_needs_prev_close() {
        let bars = rising_bars(14);
        assert!(average_true_range(&bars, 14).is_none());
    }

    #[test]
    fn score_rsi_oversold_is_bullish() {
        assert!(score_rsi(20.0) > 0.5);
        assert!(score_rsi(80.0) < -0.5);
        assert_relative_eq!(score_rsi(50.0), 0.0);
    }

    #[test]
    fn score_bollinger_bands() {
        assert_relative_eq!(score_bollinger(0.05), 0.6);
        assert_relative_eq!(score_bollinger(0.95), -0.6);
        assert_relative_eq!(score_bollinger(0.5), 0.0);
    }

    #[test]
    fn score_ma_trend_skips_warming_up_averages() {
        let score = score_ma_trend(100.0, Some(90.0), None, None);
        assert_relative_eq!(score, 0.2);
    }

    #[test]
    fn opinion_none_below_minimum_history() {
        let bars = rising_bars(MIN_TECHNICAL_BARS - 1);
        assert!(technical_opinion(&bars, bars.last().unwrap().date).is_none());
    }

    #[test]
    fn opinion_scores_steady_decline_as_oversold() {
        // RSI, Bollinger, and stochastic are mean-reversion readings: a long
        // one-way slide pins all three at oversold, outweighing the bearish
        // trend term.
        let bars = falling_bars(60);
        let op = technical_opinion(&bars, bars.last().unwrap().date).unwrap();
        assert_eq!(op.source, SignalSource::Technical);
        assert!(op.score > 0.0, "oversold slide should score positive, got {}", op.score);
        assert!((0.0..=1.0).contains(&op.confidence));
    }

    #[test]
    fn opinion_score_in_range_for_volatile_series() {
        let bars: Vec<OhlcvBar> = (0..80)
            .map(|i| {
                let close = 100.0 + ((i % 11) as f64 - 5.0) * 3.0;
                make_bar_hl(i as u32, close, close + 2.0, close - 2.0)
            })
            .collect();
        let op = technical_opinion(&bars, bars.last().unwrap().date).unwrap();
        assert!((-1.0..=1.0).contains(&op.score));
        assert!((0.0..=1.0).contains(&op.confidence));
    }
}
