//! Scored opinions from signal sources.
//!
//! A `ScoredOpinion` is the unit of input to the combiner: one source's view
//! of one asset at one point in time. Sentiment and ML opinions come from
//! collaborators through the opinion port; technical opinions are derived
//! in-process from price history.

use chrono::NaiveDate;
use std::fmt;

/// The closed set of signal sources the combiner fuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalSource {
    Technical,
    Sentiment,
    Ml,
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalSource::Technical => write!(f, "technical"),
            SignalSource::Sentiment => write!(f, "sentiment"),
            SignalSource::Ml => write!(f, "ml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredOpinion {
    pub source: SignalSource,
    pub score: f64,
    pub confidence: f64,
    pub as_of: NaiveDate,
}

impl ScoredOpinion {
    /// Build an opinion, clamping score to [-1, 1] and confidence to [0, 1].
    pub fn new(source: SignalSource, score: f64, confidence: f64, as_of: NaiveDate) -> Self {
        ScoredOpinion {
            source,
            score: score.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            as_of,
        }
    }
}
