//! Opinion port trait for the sentiment and ML collaborators.

use chrono::NaiveDate;

use crate::domain::opinion::{ScoredOpinion, SignalSource};

/// Supplies zero or one ScoredOpinion per (asset, source, date) query.
/// Absence is a valid response, not an error — the combiner redistributes the
/// missing source's weight.
pub trait OpinionPort {
    fn opinion(
        &self,
        symbol: &str,
        source: SignalSource,
        as_of: NaiveDate,
    ) -> Option<ScoredOpinion>;
}
