//! Multi-factor signal fusion.
//!
//! Fuses technical, sentiment, and ML opinions into one composite score with
//! a confidence estimate. Missing sources redistribute their weight
//! proportionally over the sources that did report. Confidence is penalized
//! when the reporting sources disagree in sign, so a contradictory factor set
//! cannot produce a high-confidence trade.

use chrono::NaiveDate;

use crate::domain::error::SigtraderError;
use crate::domain::opinion::{ScoredOpinion, SignalSource};
use crate::domain::signal::{Signal, SignalAction};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Per-source fusion weights. Must sum to 1; checked once at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalWeights {
    technical: f64,
    sentiment: f64,
    ml: f64,
}

impl SignalWeights {
    pub fn new(technical: f64, sentiment: f64, ml: f64) -> Result<Self, SigtraderError> {
        if technical < 0.0 || sentiment < 0.0 || ml < 0.0 {
            return Err(SigtraderError::ConfigInvalid {
                section: "signals".into(),
                key: "weights".into(),
                reason: "signal weights must be non-negative".into(),
            });
        }
        let sum = technical + sentiment + ml;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(SigtraderError::ConfigInvalid {
                section: "signals".into(),
                key: "weights".into(),
                reason: format!("signal weights must sum to 1, got {sum}"),
            });
        }
        Ok(SignalWeights {
            technical,
            sentiment,
            ml,
        })
    }

    pub fn weight(&self, source: SignalSource) -> f64 {
        match source {
            SignalSource::Technical => self.technical,
            SignalSource::Sentiment => self.sentiment,
            SignalSource::Ml => self.ml,
        }
    }
}

impl Default for SignalWeights {
    fn default() -> Self {
        SignalWeights {
            technical: 0.35,
            sentiment: 0.25,
            ml: 0.40,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CombinerConfig {
    pub weights: SignalWeights,
    pub buy_threshold: f64,
    pub buy_confidence_min: f64,
    pub sell_threshold: f64,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        CombinerConfig {
            weights: SignalWeights::default(),
            buy_threshold: 0.3,
            buy_confidence_min: 0.65,
            sell_threshold: -0.2,
        }
    }
}

/// Fuse the present opinions into a Signal for (symbol, date).
///
/// Pure function of its inputs. An empty opinion set yields
/// `SignalAction::Unavailable` with zero score and confidence.
pub fn combine(
    symbol: &str,
    date: NaiveDate,
    opinions: &[ScoredOpinion],
    config: &CombinerConfig,
) -> Signal {
    let total_weight: f64 = opinions
        .iter()
        .map(|op| config.weights.weight(op.source))
        .sum();

    if opinions.is_empty() || total_weight <= 0.0 {
        return Signal {
            symbol: symbol.to_string(),
            date,
            composite_score: 0.0,
            confidence: 0.0,
            action: SignalAction::Unavailable,
            components: opinions.to_vec(),
        };
    }

    let mut composite = 0.0;
    let mut base_confidence = 0.0;
    let mut positive_weight = 0.0;
    let mut negative_weight = 0.0;

    for op in opinions {
        // Absent sources redistribute their weight proportionally: dividing
        // each present weight by the present total is exactly that.
        let w = config.weights.weight(op.source) / total_weight;
        composite += w * op.score;
        base_confidence += w * op.confidence;
        if op.score > 0.0 {
            positive_weight += w;
        } else if op.score < 0.0 {
            negative_weight += w;
        }
    }

    let composite = composite.clamp(-1.0, 1.0);

    // Disagreement ratio: the fraction of present weight on the side opposing
    // the majority-weighted sign. Zero-score opinions count toward neither
    // side. On an exact tie the positive side is treated as the majority.
    let disagreement = if positive_weight >= negative_weight {
        negative_weight
    } else {
        positive_weight
    };
    let confidence = (base_confidence * (1.0 - disagreement)).clamp(0.0, 1.0);

    let action = if composite >= config.buy_threshold && confidence >= config.buy_confidence_min {
        SignalAction::Buy
    } else if composite <= config.sell_threshold {
        SignalAction::Sell
    } else {
        SignalAction::Hold
    };

    Signal {
        symbol: symbol.to_string(),
        date,
        composite_score: composite,
        confidence,
        action,
        components: opinions.to_vec(),
    }
}
