//! Watchlist parsing and data validation.
//!
//! Watchlist entries are comma-separated symbols with an optional class
//! suffix: `AAPL,MSFT,BTC-USD:crypto`. Symbols without a suffix are equities.
//! Validation loads each asset's bars through the data port and drops assets
//! that cannot support a run, failing only when nothing usable remains.

use chrono::NaiveDate;

use crate::domain::asset::{Asset, AssetClass};
use crate::domain::asset_data::AssetData;
use crate::domain::error::SigtraderError;
use crate::ports::data_port::DataPort;

#[derive(Debug, Clone, thiserror::Error)]
pub enum WatchlistError {
    #[error("empty entry in watchlist")]
    EmptyEntry,

    #[error("duplicate symbol: {0}")]
    DuplicateSymbol(String),

    #[error("unknown asset class '{class}' for {symbol}")]
    UnknownClass { symbol: String, class: String },
}

pub fn parse_watchlist(input: &str) -> Result<Vec<Asset>, WatchlistError> {
    let mut assets = Vec::new();

    for entry in input.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(WatchlistError::EmptyEntry);
        }

        let (symbol, class) = match entry.split_once(':') {
            None => (entry.to_uppercase(), AssetClass::Equity),
            Some((symbol, class_str)) => {
                let symbol = symbol.trim().to_uppercase();
                if symbol.is_empty() {
                    return Err(WatchlistError::EmptyEntry);
                }
                let class = match class_str.trim().to_lowercase().as_str() {
                    "equity" | "stock" => AssetClass::Equity,
                    "crypto" => AssetClass::Crypto,
                    other => {
                        return Err(WatchlistError::UnknownClass {
                            symbol,
                            class: other.to_string(),
                        })
                    }
                };
                (symbol, class)
            }
        };

        if assets.iter().any(|a: &Asset| a.symbol == symbol) {
            return Err(WatchlistError::DuplicateSymbol(symbol));
        }
        assets.push(Asset { symbol, class });
    }

    Ok(assets)
}

#[derive(Debug, Clone)]
pub struct SkippedAsset {
    pub symbol: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone)]
pub enum SkipReason {
    NoData,
    InsufficientBars { bars: usize },
}

#[derive(Debug)]
pub struct UniverseValidationResult {
    pub assets: Vec<AssetData>,
    pub skipped: Vec<SkippedAsset>,
}

/// Load bars for each asset and drop the ones that cannot be simulated.
/// Errors only when every asset fails validation.
pub fn validate_universe(
    data_port: &dyn DataPort,
    watchlist: Vec<Asset>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    min_bars: usize,
) -> Result<UniverseValidationResult, SigtraderError> {
    let mut assets = Vec::new();
    let mut skipped = Vec::new();

    for asset in watchlist {
        let bars = match data_port.fetch_bars(&asset.symbol, start_date, end_date) {
            Ok(bars) => bars,
            Err(e) => {
                eprintln!("Warning: skipping {} ({})", asset.symbol, e);
                skipped.push(SkippedAsset {
                    symbol: asset.symbol.clone(),
                    reason: SkipReason::NoData,
                });
                continue;
            }
        };

        if bars.is_empty() {
            eprintln!("Warning: skipping {} (no data found)", asset.symbol);
            skipped.push(SkippedAsset {
                symbol: asset.symbol.clone(),
                reason: SkipReason::NoData,
            });
            continue;
        }

        if bars.len() < min_bars {
            eprintln!(
                "Warning: skipping {} (only {} bars, minimum {} required)",
                asset.symbol,
                bars.len(),
                min_bars
            );
            skipped.push(SkippedAsset {
                symbol: asset.symbol.clone(),
                reason: SkipReason::InsufficientBars { bars: bars.len() },
            });
            continue;
        }

        eprintln!("  {}: {} bars [OK]", asset.symbol, bars.len());
        assets.push(AssetData::new(asset, bars));
    }

    if assets.is_empty() {
        return Err(SigtraderError::InsufficientData {
            symbol: "all".to_string(),
            bars: 0,
            minimum: min_bars,
        });
    }

    if !skipped.is_empty() {
        eprintln!(
            "Simulating {} of {} assets",
            assets.len(),
            assets.len() + skipped.len(),
        );
    }

    Ok(UniverseValidationResult { assets, skipped })
}
