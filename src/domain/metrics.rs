//! Performance metrics over an equity curve and trade log.

use crate::domain::portfolio::EquityPoint;
use crate::domain::position::ClosedTrade;

#[derive(Debug, Clone, PartialEq)]
pub struct Metrics {
    pub total_return: f64,
    /// Annualized over the elapsed calendar span, not the bar count.
    pub cagr: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub total_trades: usize,
    pub profit_factor: f64,
}

impl Metrics {
    pub fn compute(
        equity_curve: &[EquityPoint],
        trades: &[ClosedTrade],
        risk_free_rate: f64,
        periods_per_year: f64,
    ) -> Self {
        let initial = equity_curve.first().map(|p| p.equity).unwrap_or(0.0);
        let final_equity = equity_curve.last().map(|p| p.equity).unwrap_or(initial);

        let total_return = if initial > 0.0 {
            (final_equity - initial) / initial
        } else {
            0.0
        };

        let cagr = match (equity_curve.first(), equity_curve.last()) {
            (Some(first), Some(last)) if last.date > first.date && total_return > -1.0 => {
                let years = (last.date - first.date).num_days() as f64 / 365.25;
                (1.0 + total_return).powf(1.0 / years) - 1.0
            }
            _ => 0.0,
        };

        let sharpe_ratio = compute_sharpe(equity_curve, risk_free_rate, periods_per_year);
        let max_drawdown = compute_max_drawdown(equity_curve);

        let mut wins = 0usize;
        let mut gross_profit = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        for trade in trades {
            if trade.pnl > 0.0 {
                wins += 1;
                gross_profit += trade.pnl;
            } else if trade.pnl < 0.0 {
                gross_loss += trade.pnl.abs();
            }
        }

        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64
        } else {
            0.0
        };
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Metrics {
            total_return,
            cagr,
            sharpe_ratio,
            max_drawdown,
            win_rate,
            total_trades,
            profit_factor,
        }
    }
}

fn compute_sharpe(equity_curve: &[EquityPoint], risk_free_rate: f64, periods_per_year: f64) -> f64 {
    if equity_curve.len() < 2 || periods_per_year <= 0.0 {
        return 0.0;
    }

    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            if w[0].equity > 0.0 {
                (w[1].equity - w[0].equity) / w[0].equity
            } else {
                0.0
            }
        })
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        return 0.0;
    }

    let rf_per_period = risk_free_rate / periods_per_year;
    (mean - rf_per_period) / stddev * periods_per_year.sqrt()
}

/// Largest peak-to-trough decline over the curve.
pub fn compute_max_drawdown(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        } else if peak > 0.0 {
            let dd = (peak - point.equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}
