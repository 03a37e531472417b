//! Mean-variance portfolio optimization.
//!
//! Solves long-only Markowitz allocation as a quadratic program: minimize
//! portfolio variance (optionally traded off against expected return) subject
//! to weights summing to 1, per-asset caps, and the aggregate crypto cap.
//! Maximum-Sharpe runs the same cap-constrained QP kernel across a fixed
//! risk-aversion grid and keeps the frontier point with the best Sharpe, so
//! results are reproducible.
//!
//! The optimizer never fails outright: an infeasible cap set, a degenerate
//! covariance, or a solver failure falls back to equal-weight allocation with
//! `degraded` set on the result.

use std::collections::HashMap;

use clarabel::algebra::*;
use clarabel::solver::*;

use crate::domain::asset::{Asset, AssetClass};
use crate::domain::risk::OrderSide;

/// Minimum overlapping return observations for moment estimation.
pub const MIN_OBSERVATIONS: usize = 60;

const FEASIBILITY_TOLERANCE: f64 = 1e-9;

/// Risk-aversion grid for the maximum-Sharpe frontier sweep. τ = 0 is the
/// minimum-variance point.
const SHARPE_SWEEP: [f64; 10] = [0.0, 0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    MinVolatility,
    MaxSharpe,
}

impl std::str::FromStr for Objective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min_volatility" => Ok(Objective::MinVolatility),
            "max_sharpe" => Ok(Objective::MaxSharpe),
            other => Err(format!(
                "unknown objective '{other}' (expected min_volatility or max_sharpe)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerCaps {
    pub max_position_pct: f64,
    pub max_crypto_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    /// Target weights per symbol, summing to 1, in input asset order.
    pub weights: Vec<(String, f64)>,
    /// Set when the equal-weight fallback was used instead of the QP solution.
    pub degraded: bool,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe: f64,
}

/// Estimate annualized expected returns and sample covariance from per-asset
/// close series. Series are aligned on their trailing observations; `None`
/// when fewer than two assets or fewer than [`MIN_OBSERVATIONS`] overlapping
/// returns are available.
pub fn estimate_moments(
    closes: &[Vec<f64>],
    periods_per_year: f64,
) -> Option<(Vec<f64>, Vec<Vec<f64>>)> {
    let n = closes.len();
    if n < 2 {
        return None;
    }
    let obs = closes
        .iter()
        .map(|series| series.len().saturating_sub(1))
        .min()?;
    if obs < MIN_OBSERVATIONS {
        return None;
    }

    let returns: Vec<Vec<f64>> = closes
        .iter()
        .map(|series| {
            series[series.len() - obs - 1..]
                .windows(2)
                .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
                .collect()
        })
        .collect();

    let means: Vec<f64> = returns
        .iter()
        .map(|r| r.iter().sum::<f64>() / obs as f64)
        .collect();
    let mu: Vec<f64> = means.iter().map(|m| m * periods_per_year).collect();

    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let c = returns[i]
                .iter()
                .zip(returns[j].iter())
                .map(|(ri, rj)| (ri - means[i]) * (rj - means[j]))
                .sum::<f64>()
                / obs as f64
                * periods_per_year;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }

    Some((mu, cov))
}

/// Compute cap-respecting target weights for `assets`.
///
/// Never errors: any failure path yields the equal-weight fallback with the
/// degraded flag set.
pub fn optimize(
    assets: &[Asset],
    mu: &[f64],
    cov: &[Vec<f64>],
    caps: &OptimizerCaps,
    objective: Objective,
    risk_free_rate: f64,
) -> OptimizationResult {
    let n = assets.len();
    let well_formed = n >= 1
        && mu.len() == n
        && cov.len() == n
        && cov.iter().all(|row| row.len() == n)
        && mu.iter().all(|v| v.is_finite())
        && cov.iter().flatten().all(|v| v.is_finite());

    if !well_formed || n < 2 || !caps_feasible(assets, caps) {
        return fallback(assets, mu, cov, caps, risk_free_rate);
    }

    let solution = match objective {
        Objective::MinVolatility => solve_qp(assets, cov, &vec![0.0; n], caps),
        Objective::MaxSharpe => {
            let excess: Vec<f64> = mu.iter().map(|r| r - risk_free_rate).collect();
            let mut best: Option<(f64, Vec<f64>)> = None;
            for tau in SHARPE_SWEEP {
                let q: Vec<f64> = excess.iter().map(|e| -tau * e).collect();
                if let Some(w) = solve_qp(assets, cov, &q, caps) {
                    let sharpe = performance(&w, mu, cov, risk_free_rate).2;
                    let better = match &best {
                        Some((best_sharpe, _)) => sharpe > *best_sharpe,
                        None => true,
                    };
                    if better {
                        best = Some((sharpe, w));
                    }
                }
            }
            best.map(|(_, w)| w)
        }
    };

    match solution {
        Some(weights) => {
            let (expected_return, volatility, sharpe) =
                performance(&weights, mu, cov, risk_free_rate);
            OptimizationResult {
                weights: assets
                    .iter()
                    .zip(weights)
                    .map(|(a, w)| (a.symbol.clone(), w))
                    .collect(),
                degraded: false,
                expected_return,
                volatility,
                sharpe,
            }
        }
        None => fallback(assets, mu, cov, caps, risk_free_rate),
    }
}

fn caps_feasible(assets: &[Asset], caps: &OptimizerCaps) -> bool {
    if caps.max_position_pct <= 0.0 {
        return false;
    }
    let n_crypto = assets.iter().filter(|a| a.is_crypto()).count();
    let n_equity = assets.len() - n_crypto;
    let crypto_budget = (n_crypto as f64 * caps.max_position_pct).min(caps.max_crypto_pct.max(0.0));
    let reachable = n_equity as f64 * caps.max_position_pct + crypto_budget;
    reachable >= 1.0 - FEASIBILITY_TOLERANCE
}

/// Solve `min ½wᵀΣw + qᵀw` s.t. Σw = 1, 0 ≤ w, w ≤ cap, crypto aggregate cap.
fn solve_qp(assets: &[Asset], cov: &[Vec<f64>], q: &[f64], caps: &OptimizerCaps) -> Option<Vec<f64>> {
    let n = assets.len();
    let has_crypto = assets.iter().any(|a| a.is_crypto());

    // P: upper triangle of the covariance matrix in CSC form.
    let mut p_data = Vec::new();
    let mut p_rows = Vec::new();
    let mut p_colptr = vec![0usize];
    for j in 0..n {
        for (i, row) in cov.iter().enumerate().take(j + 1) {
            let val = row[j];
            if val != 0.0 {
                p_data.push(val);
                p_rows.push(i);
            }
        }
        p_colptr.push(p_data.len());
    }
    let p = CscMatrix::new(n, n, p_colptr, p_rows, p_data);

    // Constraint rows: [sum(w) = 1] ; [-w ≤ 0] ; [w ≤ cap] ; [Σ crypto w ≤ cap].
    let m = 1 + 2 * n + usize::from(has_crypto);
    let mut a_data = Vec::new();
    let mut a_rows = Vec::new();
    let mut a_colptr = vec![0usize];
    for (j, asset) in assets.iter().enumerate() {
        a_data.push(1.0);
        a_rows.push(0);

        a_data.push(-1.0);
        a_rows.push(1 + j);

        a_data.push(1.0);
        a_rows.push(1 + n + j);

        if has_crypto && asset.is_crypto() {
            a_data.push(1.0);
            a_rows.push(1 + 2 * n);
        }
        a_colptr.push(a_data.len());
    }
    let a = CscMatrix::new(m, n, a_colptr, a_rows, a_data);

    let mut b = vec![1.0];
    b.extend(std::iter::repeat_n(0.0, n));
    b.extend(std::iter::repeat_n(caps.max_position_pct, n));
    if has_crypto {
        b.push(caps.max_crypto_pct);
    }

    let cones = [ZeroConeT(1), NonnegativeConeT(m - 1)];

    let settings = DefaultSettingsBuilder::default()
        .max_iter(200)
        .verbose(false)
        .build()
        .ok()?;
    let mut solver = DefaultSolver::new(&p, q, &a, &b, &cones, settings).ok()?;
    solver.solve();

    if !matches!(solver.solution.status, SolverStatus::Solved) {
        return None;
    }

    // Clean up solver noise: clamp at zero and renormalize to an exact sum.
    let mut weights: Vec<f64> = solver.solution.x.iter().map(|&w| w.max(0.0)).collect();
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return None;
    }
    for w in &mut weights {
        *w /= sum;
    }
    Some(weights)
}

fn performance(weights: &[f64], mu: &[f64], cov: &[Vec<f64>], risk_free_rate: f64) -> (f64, f64, f64) {
    let expected_return: f64 = weights.iter().zip(mu).map(|(w, r)| w * r).sum();
    let mut variance = 0.0;
    for (i, wi) in weights.iter().enumerate() {
        for (j, wj) in weights.iter().enumerate() {
            variance += wi * wj * cov[i][j];
        }
    }
    let volatility = variance.max(0.0).sqrt();
    let sharpe = if volatility > 0.0 {
        (expected_return - risk_free_rate) / volatility
    } else {
        0.0
    };
    (expected_return, volatility, sharpe)
}

/// Equal-weight allocation with the crypto cap enforced by shifting surplus
/// crypto weight onto equities. Per-asset caps are ignored here when they are
/// infeasible — the caller always gets a usable allocation.
fn fallback(
    assets: &[Asset],
    mu: &[f64],
    cov: &[Vec<f64>],
    caps: &OptimizerCaps,
    risk_free_rate: f64,
) -> OptimizationResult {
    let n = assets.len();
    if n == 0 {
        return OptimizationResult {
            weights: Vec::new(),
            degraded: true,
            expected_return: 0.0,
            volatility: 0.0,
            sharpe: 0.0,
        };
    }

    let base = 1.0 / n as f64;
    let n_crypto = assets.iter().filter(|a| a.is_crypto()).count();
    let n_equity = n - n_crypto;
    let crypto_total = n_crypto as f64 * base;

    let (crypto_w, equity_w) = if n_crypto > 0 && n_equity > 0 && crypto_total > caps.max_crypto_pct
    {
        let crypto_w = caps.max_crypto_pct / n_crypto as f64;
        let equity_w = (1.0 - caps.max_crypto_pct) / n_equity as f64;
        (crypto_w, equity_w)
    } else {
        (base, base)
    };

    let weights: Vec<f64> = assets
        .iter()
        .map(|a| if a.is_crypto() { crypto_w } else { equity_w })
        .collect();

    let stats_valid = mu.len() == n && cov.len() == n && cov.iter().all(|row| row.len() == n);
    let (expected_return, volatility, sharpe) = if stats_valid {
        performance(&weights, mu, cov, risk_free_rate)
    } else {
        (0.0, 0.0, 0.0)
    };

    OptimizationResult {
        weights: assets
            .iter()
            .zip(weights)
            .map(|(a, w)| (a.symbol.clone(), w))
            .collect(),
        degraded: true,
        expected_return,
        volatility,
        sharpe,
    }
}

/// Convenience entry point from raw close series: estimate moments, then
/// optimize; degraded equal-weight when estimation is not possible.
pub fn optimize_from_history(
    assets: &[Asset],
    closes: &[Vec<f64>],
    caps: &OptimizerCaps,
    objective: Objective,
    risk_free_rate: f64,
    periods_per_year: f64,
) -> OptimizationResult {
    match estimate_moments(closes, periods_per_year) {
        Some((mu, cov)) => optimize(assets, &mu, &cov, caps, objective, risk_free_rate),
        None => fallback(assets, &[], &[], caps, risk_free_rate),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceSuggestion {
    pub symbol: String,
    pub current_weight: f64,
    pub target_weight: f64,
    pub delta: f64,
    pub side: OrderSide,
}

/// Emit only the weight deltas worth acting on: |Δ| must exceed
/// `min_trade_pct` to avoid churn from negligible drift. Largest moves first.
pub fn suggest_rebalance(
    current: &HashMap<String, f64>,
    target: &[(String, f64)],
    min_trade_pct: f64,
) -> Vec<RebalanceSuggestion> {
    let mut symbols: Vec<&String> = current.keys().collect();
    for (symbol, _) in target {
        if !current.contains_key(symbol) {
            symbols.push(symbol);
        }
    }
    symbols.sort();
    symbols.dedup();

    let target_map: HashMap<&String, f64> = target.iter().map(|(s, w)| (s, *w)).collect();
    let mut suggestions: Vec<RebalanceSuggestion> = symbols
        .into_iter()
        .filter_map(|symbol| {
            let cur = current.get(symbol).copied().unwrap_or(0.0);
            let tgt = target_map.get(symbol).copied().unwrap_or(0.0);
            let delta = tgt - cur;
            if delta.abs() <= min_trade_pct {
                return None;
            }
            Some(RebalanceSuggestion {
                symbol: symbol.clone(),
                current_weight: cur,
                target_weight: tgt,
                delta,
                side: if delta > 0.0 { OrderSide::Buy } else { OrderSide::Sell },
            })
        })
        .collect();

    suggestions.sort_by(|a, b| {
        b.delta
            .abs()
            .partial_cmp(&a.delta.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    suggestions
}
