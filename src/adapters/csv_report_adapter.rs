//! CSV report adapter.
//!
//! Writes a backtest result as two files in the output directory:
//! `equity.csv` (date, equity, benchmark) and `trades.csv` (one row per
//! fill, with price and commission).

use std::fs;
use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::SigtraderError;
use crate::ports::report_port::ReportPort;

pub struct CsvReportAdapter;

impl ReportPort for CsvReportAdapter {
    fn write(&self, result: &BacktestResult, output_dir: &Path) -> Result<(), SigtraderError> {
        fs::create_dir_all(output_dir)?;
        write_equity(result, &output_dir.join("equity.csv"))?;
        write_trades(result, &output_dir.join("trades.csv"))?;
        Ok(())
    }
}

fn csv_error(path: &Path, e: csv::Error) -> SigtraderError {
    SigtraderError::Data {
        symbol: "report".to_string(),
        reason: format!("failed to write {}: {}", path.display(), e),
    }
}

fn write_equity(result: &BacktestResult, path: &Path) -> Result<(), SigtraderError> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    wtr.write_record(["date", "equity", "benchmark"])
        .map_err(|e| csv_error(path, e))?;

    for (point, bench) in result
        .portfolio
        .equity_curve
        .iter()
        .zip(&result.benchmark)
    {
        wtr.write_record([
            point.date.format("%Y-%m-%d").to_string(),
            format!("{:.2}", point.equity),
            format!("{:.2}", bench.equity),
        ])
        .map_err(|e| csv_error(path, e))?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_trades(result: &BacktestResult, path: &Path) -> Result<(), SigtraderError> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;
    wtr.write_record(["date", "symbol", "side", "quantity", "price", "commission", "reason"])
        .map_err(|e| csv_error(path, e))?;

    for fill in &result.fills {
        wtr.write_record([
            fill.date.format("%Y-%m-%d").to_string(),
            fill.symbol.clone(),
            fill.side.to_string(),
            format!("{:.6}", fill.quantity),
            format!("{:.4}", fill.price),
            format!("{:.4}", fill.commission),
            fill.reason.to_string(),
        ])
        .map_err(|e| csv_error(path, e))?;
    }
    wtr.flush()?;
    Ok(())
}
