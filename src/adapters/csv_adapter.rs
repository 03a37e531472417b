//! CSV price data adapter.
//!
//! Reads `<SYMBOL>.csv` files with a `date,open,high,low,close,volume` header
//! from a data directory.

use crate::domain::error::SigtraderError;
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;

pub struct CsvBarAdapter {
    base_path: PathBuf,
}

impl CsvBarAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{symbol}.csv"))
    }
}

fn field(record: &csv::StringRecord, index: usize, name: &str, symbol: &str) -> Result<String, SigtraderError> {
    record
        .get(index)
        .map(str::to_string)
        .ok_or_else(|| SigtraderError::Data {
            symbol: symbol.to_string(),
            reason: format!("missing {name} column"),
        })
}

fn parse_f64(value: &str, name: &str, symbol: &str) -> Result<f64, SigtraderError> {
    value.parse().map_err(|e| SigtraderError::Data {
        symbol: symbol.to_string(),
        reason: format!("invalid {name} value: {e}"),
    })
}

impl DataPort for CsvBarAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<OhlcvBar>, SigtraderError> {
        let path = self.csv_path(symbol);
        let content = fs::read_to_string(&path).map_err(|e| SigtraderError::Data {
            symbol: symbol.to_string(),
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| SigtraderError::Data {
                symbol: symbol.to_string(),
                reason: format!("CSV parse error: {e}"),
            })?;

            let date_str = field(&record, 0, "date", symbol)?;
            let date = NaiveDate::parse_from_str(&date_str, "%Y-%m-%d").map_err(|e| {
                SigtraderError::Data {
                    symbol: symbol.to_string(),
                    reason: format!("invalid date format: {e}"),
                }
            })?;

            if date < start_date || date > end_date {
                continue;
            }

            bars.push(OhlcvBar {
                symbol: symbol.to_string(),
                date,
                open: parse_f64(&field(&record, 1, "open", symbol)?, "open", symbol)?,
                high: parse_f64(&field(&record, 2, "high", symbol)?, "high", symbol)?,
                low: parse_f64(&field(&record, 3, "low", symbol)?, "low", symbol)?,
                close: parse_f64(&field(&record, 4, "close", symbol)?, "close", symbol)?,
                volume: parse_f64(&field(&record, 5, "volume", symbol)?, "volume", symbol)?,
            });
        }

        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, SigtraderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| SigtraderError::Data {
            symbol: "*".to_string(),
            reason: format!("failed to read directory {}: {}", self.base_path.display(), e),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SigtraderError::Data {
                symbol: "*".to_string(),
                reason: format!("directory entry error: {e}"),
            })?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(symbol) = name_str.strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let csv_content = "date,open,high,low,close,volume\n\
            2024-01-15,100.0,110.0,90.0,105.0,50000\n\
            2024-01-16,105.0,115.0,100.0,110.0,60000\n\
            2024-01-17,110.0,120.0,105.0,115.0,55000\n";

        fs::write(path.join("AAPL.csv"), csv_content).unwrap();
        fs::write(path.join("BTC-USD.csv"), "date,open,high,low,close,volume\n").unwrap();

        (dir, path)
    }

    #[test]
    fn fetch_bars_parses_rows() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvBarAdapter::new(path);

        let start = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 17).unwrap();
        let bars = adapter.fetch_bars("AAPL", start, end).unwrap();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].date, start);
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 110.0);
        assert_eq!(bars[0].low, 90.0);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].volume, 50_000.0);
    }

    #[test]
    fn fetch_bars_filters_by_date() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvBarAdapter::new(path);

        let day = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        let bars = adapter.fetch_bars("AAPL", day, day).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].date, day);
    }

    #[test]
    fn fetch_bars_errors_for_missing_file() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvBarAdapter::new(path);

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert!(adapter.fetch_bars("NOPE", start, end).is_err());
    }

    #[test]
    fn fetch_bars_empty_file_gives_empty_series() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvBarAdapter::new(path);

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let bars = adapter.fetch_bars("BTC-USD", start, end).unwrap();
        assert!(bars.is_empty());
    }

    #[test]
    fn fetch_bars_sorts_out_of_order_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        fs::write(
            path.join("XYZ.csv"),
            "date,open,high,low,close,volume\n\
             2024-01-17,1,2,0.5,1.5,10\n\
             2024-01-15,1,2,0.5,1.2,10\n",
        )
        .unwrap();
        let adapter = CsvBarAdapter::new(path);

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let bars = adapter.fetch_bars("XYZ", start, end).unwrap();
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(bars[1].date, NaiveDate::from_ymd_opt(2024, 1, 17).unwrap());
    }

    #[test]
    fn list_symbols_scans_directory() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvBarAdapter::new(path);
        assert_eq!(adapter.list_symbols().unwrap(), vec!["AAPL", "BTC-USD"]);
    }
}
