//! CSV opinion series adapter.
//!
//! Sentiment and ML collaborators export their scored opinions as
//! `<SYMBOL>_<source>.csv` files (`date,score,confidence`). A missing file
//! simply means that source never reports for that asset. All series load
//! eagerly at construction: a simulation run expects its collaborator data
//! fully materialized before it starts.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::error::SigtraderError;
use crate::domain::opinion::{ScoredOpinion, SignalSource};
use crate::ports::opinion_port::OpinionPort;

pub struct CsvOpinionAdapter {
    opinions: HashMap<(String, SignalSource, NaiveDate), ScoredOpinion>,
}

impl CsvOpinionAdapter {
    /// Load every available opinion series for `symbols` from `base_path`.
    pub fn load(base_path: &Path, symbols: &[String]) -> Result<Self, SigtraderError> {
        let mut opinions = HashMap::new();

        for symbol in symbols {
            for source in [SignalSource::Sentiment, SignalSource::Ml] {
                let path = series_path(base_path, symbol, source);
                if !path.exists() {
                    continue;
                }
                let content = fs::read_to_string(&path).map_err(|e| SigtraderError::Data {
                    symbol: symbol.clone(),
                    reason: format!("failed to read {}: {}", path.display(), e),
                })?;
                load_series(&content, symbol, source, &mut opinions)?;
            }
        }

        Ok(Self { opinions })
    }

    pub fn is_empty(&self) -> bool {
        self.opinions.is_empty()
    }
}

fn series_path(base_path: &Path, symbol: &str, source: SignalSource) -> PathBuf {
    base_path.join(format!("{symbol}_{source}.csv"))
}

fn load_series(
    content: &str,
    symbol: &str,
    source: SignalSource,
    opinions: &mut HashMap<(String, SignalSource, NaiveDate), ScoredOpinion>,
) -> Result<(), SigtraderError> {
    let mut rdr = csv::Reader::from_reader(content.as_bytes());
    for result in rdr.records() {
        let record = result.map_err(|e| SigtraderError::Data {
            symbol: symbol.to_string(),
            reason: format!("CSV parse error: {e}"),
        })?;

        let parse_err = |name: &str, detail: String| SigtraderError::Data {
            symbol: symbol.to_string(),
            reason: format!("invalid {name} value in {source} series: {detail}"),
        };

        let date_str = record
            .get(0)
            .ok_or_else(|| parse_err("date", "missing column".into()))?;
        let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .map_err(|e| parse_err("date", e.to_string()))?;
        let score: f64 = record
            .get(1)
            .ok_or_else(|| parse_err("score", "missing column".into()))?
            .parse()
            .map_err(|e: std::num::ParseFloatError| parse_err("score", e.to_string()))?;
        let confidence: f64 = record
            .get(2)
            .ok_or_else(|| parse_err("confidence", "missing column".into()))?
            .parse()
            .map_err(|e: std::num::ParseFloatError| parse_err("confidence", e.to_string()))?;

        opinions.insert(
            (symbol.to_string(), source, date),
            ScoredOpinion::new(source, score, confidence, date),
        );
    }
    Ok(())
}

impl OpinionPort for CsvOpinionAdapter {
    fn opinion(
        &self,
        symbol: &str,
        source: SignalSource,
        as_of: NaiveDate,
    ) -> Option<ScoredOpinion> {
        self.opinions
            .get(&(symbol.to_string(), source, as_of))
            .cloned()
    }
}
