//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvBarAdapter;
use crate::adapters::csv_opinion_adapter::CsvOpinionAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::asset::Asset;
use crate::domain::backtest::{run_backtest, BacktestConfig};
use crate::domain::combiner::{combine, CombinerConfig, SignalWeights};
use crate::domain::config_validation::validate_config;
use crate::domain::error::SigtraderError;
use crate::domain::optimizer::{
    optimize_from_history, suggest_rebalance, Objective, OptimizerCaps,
};
use crate::domain::opinion::{ScoredOpinion, SignalSource};
use crate::domain::portfolio::Portfolio;
use crate::domain::risk::{check_position_limits, RiskConfig};
use crate::domain::signal::{rank_signals, Signal, SignalAction};
use crate::domain::technical;
use crate::domain::universe::{parse_watchlist, validate_universe};
use crate::ports::config_port::ConfigPort;
use crate::ports::opinion_port::OpinionPort;
use crate::ports::report_port::ReportPort;

#[derive(Parser, Debug)]
#[command(name = "sigtrader", about = "Multi-factor signal fusion and backtesting engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest over the configured watchlist
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory for the CSV reports (default: report/)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Restrict the run to a single watchlist entry
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Compute and rank current combined signals
    Signal {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
    },
    /// Compute target portfolio weights and rebalance suggestions
    Optimize {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            output,
            symbol,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&config)
            } else {
                run_backtest_command(&config, output.as_deref(), symbol.as_deref())
            }
        }
        Command::Signal { config, symbol } => run_signal(&config, symbol.as_deref()),
        Command::Optimize { config } => run_optimize(&config),
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &std::path::Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = SigtraderError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, SigtraderError> {
    let start_date = require_date(config, "start_date")?;
    let end_date = require_date(config, "end_date")?;

    let objective = match config.get_string("optimizer", "objective") {
        Some(s) => s
            .parse::<Objective>()
            .map_err(|reason| SigtraderError::ConfigInvalid {
                section: "optimizer".into(),
                key: "objective".into(),
                reason,
            })?,
        None => Objective::MinVolatility,
    };

    Ok(BacktestConfig {
        start_date,
        end_date,
        initial_capital: config.get_double("backtest", "initial_capital", 100_000.0),
        commission_per_trade: config.get_double("backtest", "commission_per_trade", 0.0),
        commission_pct: config.get_double("backtest", "commission_pct", 0.0),
        risk_free_rate: config.get_double("backtest", "risk_free_rate", 0.04),
        periods_per_year: config.get_double("backtest", "periods_per_year", 252.0),
        min_history: config.get_int("backtest", "min_history", 30) as usize,
        rebalance_interval: config.get_int("backtest", "rebalance_interval", 0) as usize,
        min_trade_pct: config.get_double("optimizer", "min_trade_pct", 0.01),
        objective,
    })
}

fn require_date(config: &dyn ConfigPort, key: &str) -> Result<NaiveDate, SigtraderError> {
    let value = config
        .get_string("backtest", key)
        .ok_or_else(|| SigtraderError::ConfigMissing {
            section: "backtest".into(),
            key: key.into(),
        })?;
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|_| SigtraderError::ConfigInvalid {
        section: "backtest".into(),
        key: key.into(),
        reason: "invalid date format (expected YYYY-MM-DD)".into(),
    })
}

pub fn build_combiner_config(config: &dyn ConfigPort) -> Result<CombinerConfig, SigtraderError> {
    let weights = SignalWeights::new(
        config.get_double("signals", "technical_weight", 0.35),
        config.get_double("signals", "sentiment_weight", 0.25),
        config.get_double("signals", "ml_weight", 0.40),
    )?;
    Ok(CombinerConfig {
        weights,
        buy_threshold: config.get_double("signals", "buy_threshold", 0.3),
        buy_confidence_min: config.get_double("signals", "buy_confidence_min", 0.65),
        sell_threshold: config.get_double("signals", "sell_threshold", -0.2),
    })
}

pub fn build_risk_config(config: &dyn ConfigPort) -> RiskConfig {
    RiskConfig {
        drawdown_warning: config.get_double("risk", "drawdown_warning", 0.08),
        drawdown_halt: config.get_double("risk", "drawdown_halt", 0.12),
        max_position_pct: config.get_double("risk", "max_position_pct", 0.15),
        max_crypto_pct: config.get_double("risk", "max_crypto_pct", 0.30),
        atr_multiplier: config.get_double("risk", "atr_multiplier", 2.0),
        trailing_pct: config.get_double("risk", "trailing_stop_pct", 0.07),
    }
}

pub fn resolve_watchlist(
    symbol_override: Option<&str>,
    config: &dyn ConfigPort,
) -> Result<Vec<Asset>, SigtraderError> {
    let raw = match symbol_override {
        Some(s) => s.to_string(),
        None => config
            .get_string("watchlist", "symbols")
            .ok_or_else(|| SigtraderError::ConfigMissing {
                section: "watchlist".into(),
                key: "symbols".into(),
            })?,
    };
    parse_watchlist(&raw).map_err(|e| SigtraderError::ConfigInvalid {
        section: "watchlist".into(),
        key: "symbols".into(),
        reason: e.to_string(),
    })
}

fn bars_dir(config: &dyn ConfigPort) -> Result<PathBuf, SigtraderError> {
    config
        .get_string("data", "bars_dir")
        .map(PathBuf::from)
        .ok_or_else(|| SigtraderError::ConfigMissing {
            section: "data".into(),
            key: "bars_dir".into(),
        })
}

fn opinions_dir(config: &dyn ConfigPort) -> Option<PathBuf> {
    config
        .get_string("data", "opinions_dir")
        .map(PathBuf::from)
        .or_else(|| config.get_string("data", "bars_dir").map(PathBuf::from))
}

struct LoadedRun {
    assets: Vec<crate::domain::asset_data::AssetData>,
    opinions: CsvOpinionAdapter,
    combiner: CombinerConfig,
    risk: RiskConfig,
    backtest: BacktestConfig,
}

fn load_run(
    config_path: &std::path::Path,
    symbol_override: Option<&str>,
) -> Result<LoadedRun, ExitCode> {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = load_config(config_path)?;

    let fail = |e: SigtraderError| -> ExitCode {
        eprintln!("error: {e}");
        ExitCode::from(&e)
    };

    if let Err(e) = validate_config(&adapter) {
        return Err(fail(e));
    }

    let combiner = build_combiner_config(&adapter).map_err(fail)?;
    let risk = build_risk_config(&adapter);
    let backtest = build_backtest_config(&adapter).map_err(fail)?;
    let watchlist = resolve_watchlist(symbol_override, &adapter).map_err(fail)?;
    let dir = bars_dir(&adapter).map_err(fail)?;

    eprintln!("Validating {} assets...", watchlist.len());
    let data_port = CsvBarAdapter::new(dir.clone());
    let validation = validate_universe(
        &data_port,
        watchlist,
        backtest.start_date,
        backtest.end_date,
        backtest.min_history,
    )
    .map_err(fail)?;

    let symbols: Vec<String> = validation
        .assets
        .iter()
        .map(|ad| ad.asset.symbol.clone())
        .collect();
    let opinion_dir = opinions_dir(&adapter).unwrap_or(dir);
    let opinions = CsvOpinionAdapter::load(&opinion_dir, &symbols).map_err(fail)?;
    if opinions.is_empty() {
        eprintln!("Note: no sentiment/ml opinion series found; running on technical signals only");
    }

    Ok(LoadedRun {
        assets: validation.assets,
        opinions,
        combiner,
        risk,
        backtest,
    })
}

fn run_backtest_command(
    config_path: &std::path::Path,
    output: Option<&std::path::Path>,
    symbol: Option<&str>,
) -> ExitCode {
    let run = match load_run(config_path, symbol) {
        Ok(r) => r,
        Err(code) => return code,
    };

    eprintln!(
        "Running backtest: {} assets, {} to {}",
        run.assets.len(),
        run.backtest.start_date,
        run.backtest.end_date,
    );

    let result = match run_backtest(
        &run.assets,
        &run.opinions,
        &run.combiner,
        &run.risk,
        &run.backtest,
    ) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let m = &result.metrics;
    eprintln!("\n=== Results ===");
    eprintln!("Total Return:   {:.2}%", m.total_return * 100.0);
    eprintln!("CAGR:           {:.2}%", m.cagr * 100.0);
    eprintln!("Sharpe Ratio:   {:.2}", m.sharpe_ratio);
    eprintln!("Max Drawdown:   -{:.1}%", m.max_drawdown * 100.0);
    eprintln!("Trades:         {}", m.total_trades);
    eprintln!("Win Rate:       {:.1}%", m.win_rate * 100.0);
    eprintln!("Profit Factor:  {:.2}", m.profit_factor);
    if !result.rejected.is_empty() {
        eprintln!("Rejected BUYs:  {}", result.rejected.len());
    }
    for proposal in &result.rebalances {
        let tag = if proposal.degraded { " (degraded)" } else { "" };
        eprintln!(
            "Rebalance {}{}: {} suggested trades",
            proposal.date,
            tag,
            proposal.suggestions.len()
        );
    }

    let output_dir = output
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("report"));
    match CsvReportAdapter.write(&result, &output_dir) {
        Ok(()) => {
            eprintln!("\nReports written to: {}", output_dir.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

fn run_dry_run(config_path: &std::path::Path) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    if let Err(e) = validate_config(&adapter) {
        eprintln!("error: {e}");
        return (&e).into();
    }
    eprintln!("Config validated successfully");

    let watchlist = match resolve_watchlist(None, &adapter) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    eprintln!("\nWatchlist:");
    for asset in &watchlist {
        eprintln!("  {} ({})", asset.symbol, asset.class);
    }

    eprintln!("\nSignal weights:");
    eprintln!(
        "  technical = {}",
        adapter.get_double("signals", "technical_weight", 0.35)
    );
    eprintln!(
        "  sentiment = {}",
        adapter.get_double("signals", "sentiment_weight", 0.25)
    );
    eprintln!("  ml        = {}", adapter.get_double("signals", "ml_weight", 0.40));

    eprintln!("\nDry run complete: configuration is valid");
    ExitCode::SUCCESS
}

fn run_signal(config_path: &std::path::Path, symbol: Option<&str>) -> ExitCode {
    let run = match load_run(config_path, symbol) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let mut signals: Vec<Signal> = Vec::new();
    for asset_data in &run.assets {
        let bars = &asset_data.bars;
        let Some(last) = bars.last() else { continue };
        let as_of = last.date;

        let mut components: Vec<ScoredOpinion> = Vec::new();
        if let Some(op) = technical::technical_opinion(bars, as_of) {
            components.push(op);
        }
        for source in [SignalSource::Sentiment, SignalSource::Ml] {
            if let Some(op) = run.opinions.opinion(&asset_data.asset.symbol, source, as_of) {
                components.push(op);
            }
        }
        signals.push(combine(
            &asset_data.asset.symbol,
            as_of,
            &components,
            &run.combiner,
        ));
    }

    let assets_by_symbol: HashMap<&str, &Asset> = run
        .assets
        .iter()
        .map(|ad| (ad.asset.symbol.as_str(), &ad.asset))
        .collect();
    let preview_portfolio = Portfolio::new(run.backtest.initial_capital);
    let marks = HashMap::new();

    eprintln!("\n=== Signals ===");
    for signal in rank_signals(signals) {
        eprintln!(
            "  {:10} {:12} score {:+.3}  confidence {:.2}  ({} sources)",
            signal.symbol,
            signal.action.to_string(),
            signal.composite_score,
            signal.confidence,
            signal.components.len(),
        );
        if signal.action == SignalAction::Buy {
            let asset = assets_by_symbol[signal.symbol.as_str()];
            let proposed = run.risk.max_position_pct * run.backtest.initial_capital;
            let check = check_position_limits(
                asset.class,
                proposed,
                &preview_portfolio,
                &marks,
                &run.risk,
            );
            for violation in &check.violations {
                eprintln!("             would breach: {violation}");
            }
        }
    }

    ExitCode::SUCCESS
}

fn run_optimize(config_path: &std::path::Path) -> ExitCode {
    let run = match load_run(config_path, None) {
        Ok(r) => r,
        Err(code) => return code,
    };

    let assets: Vec<Asset> = run.assets.iter().map(|ad| ad.asset.clone()).collect();
    let closes: Vec<Vec<f64>> = run
        .assets
        .iter()
        .map(|ad| ad.bars.iter().map(|b| b.close).collect())
        .collect();

    let caps = OptimizerCaps {
        max_position_pct: run.risk.max_position_pct,
        max_crypto_pct: run.risk.max_crypto_pct,
    };
    let result = optimize_from_history(
        &assets,
        &closes,
        &caps,
        run.backtest.objective,
        run.backtest.risk_free_rate,
        run.backtest.periods_per_year,
    );

    eprintln!("\n=== Target Weights ===");
    if result.degraded {
        eprintln!("  (degraded: equal-weight fallback)");
    }
    for (symbol, weight) in &result.weights {
        eprintln!("  {symbol:10} {:.1}%", weight * 100.0);
    }
    eprintln!("\nExpected return: {:.2}%", result.expected_return * 100.0);
    eprintln!("Volatility:      {:.2}%", result.volatility * 100.0);
    eprintln!("Sharpe:          {:.2}", result.sharpe);

    // Suggestions measured against a naive equal-weight book.
    let equal = 1.0 / assets.len().max(1) as f64;
    let current: HashMap<String, f64> = assets
        .iter()
        .map(|a| (a.symbol.clone(), equal))
        .collect();
    let suggestions = suggest_rebalance(&current, &result.weights, run.backtest.min_trade_pct);

    if suggestions.is_empty() {
        eprintln!("\nNo rebalancing needed from equal weight");
    } else {
        eprintln!("\n=== Rebalance vs equal weight ===");
        for s in &suggestions {
            eprintln!(
                "  {:10} {:4}  {:.1}% -> {:.1}%  (delta {:+.1}%)",
                s.symbol,
                s.side.to_string(),
                s.current_weight * 100.0,
                s.target_weight * 100.0,
                s.delta * 100.0,
            );
        }
    }

    ExitCode::SUCCESS
}

fn run_validate(config_path: &std::path::Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    match validate_config(&adapter) {
        Ok(()) => {
            eprintln!("Configuration is valid.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}
