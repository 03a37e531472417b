//! Per-asset bar series and the unified simulation timeline.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

use crate::domain::asset::Asset;
use crate::domain::ohlcv::OhlcvBar;

/// One asset's chronologically ordered bars with a date index for O(1) lookup.
#[derive(Debug, Clone)]
pub struct AssetData {
    pub asset: Asset,
    pub bars: Vec<OhlcvBar>,
    date_index: HashMap<NaiveDate, usize>,
}

impl AssetData {
    /// Bars must already be sorted by date, strictly increasing (the data
    /// port contract).
    pub fn new(asset: Asset, bars: Vec<OhlcvBar>) -> Self {
        let date_index = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| (bar.date, i))
            .collect();
        Self {
            asset,
            bars,
            date_index,
        }
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn get_bar(&self, date: NaiveDate) -> Option<&OhlcvBar> {
        self.date_index.get(&date).map(|&i| &self.bars[i])
    }

    /// All bars strictly before `date` — the lookahead-free slice for
    /// decisions made at `date`.
    pub fn history_before(&self, date: NaiveDate) -> &[OhlcvBar] {
        let end = self.bars.partition_point(|b| b.date < date);
        &self.bars[..end]
    }

    /// The most recent close at or before `date`, if any bar exists by then.
    pub fn last_close_at_or_before(&self, date: NaiveDate) -> Option<f64> {
        let end = self.bars.partition_point(|b| b.date <= date);
        if end == 0 {
            None
        } else {
            Some(self.bars[end - 1].close)
        }
    }
}

/// Merge all asset dates into one sorted, de-duplicated timeline.
pub fn build_timeline(assets: &[AssetData]) -> Vec<NaiveDate> {
    let unique: BTreeSet<NaiveDate> = assets
        .iter()
        .flat_map(|ad| ad.bars.iter().map(|bar| bar.date))
        .collect();
    unique.into_iter().collect()
}
