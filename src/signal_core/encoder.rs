//! Multi-offset consistency encoding over a day's observations
//!
//! For every observation, compare its outcome against the same entity's
//! outcome N relative steps earlier, N = 1..=5, where step N sits
//! `(N+1)*3` minutes back. The result is a tri-state per N: MATCH,
//! MISMATCH, or NONE when either side is missing a terminal outcome.
//!
//! Pure and order-independent: records are recomputed from the stored
//! observations on every run and never persisted as truth.

use crate::store::{Observation, Outcome};
use serde::Serialize;
use std::collections::HashMap;

/// Offset comparisons carried per record (N = 1..=5)
pub const OFFSET_COUNT: usize = 5;

/// Minute distance for comparison N
pub fn offset_minutes(n: u32) -> u32 {
    (n + 1) * 3
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OffsetState {
    #[serde(rename = "MATCH")]
    Match,
    #[serde(rename = "MISMATCH")]
    Mismatch,
    #[serde(rename = "NONE")]
    None,
}

impl OffsetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetState::Match => "MATCH",
            OffsetState::Mismatch => "MISMATCH",
            OffsetState::None => "NONE",
        }
    }
}

/// One observation enriched with its five offset comparisons
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedRecord {
    pub entity: String,
    pub minute_of_day: u32,
    pub outcome: Outcome,
    /// `offsets[i]` holds the comparison for N = i+1
    pub offsets: [OffsetState; OFFSET_COUNT],
}

impl DerivedRecord {
    /// Comparison state for N in 1..=5
    pub fn offset(&self, n: usize) -> Option<OffsetState> {
        if (1..=OFFSET_COUNT).contains(&n) {
            Some(self.offsets[n - 1])
        } else {
            None
        }
    }
}

/// Encode one day of observations
///
/// UNKNOWN rows produce all-NONE records and are invisible as comparison
/// targets: a pending slot can neither match nor mismatch anything.
pub fn encode_day(observations: &[Observation]) -> Vec<DerivedRecord> {
    let lookup: HashMap<(&str, u32), Outcome> = observations
        .iter()
        .filter(|o| o.outcome.is_terminal())
        .map(|o| ((o.entity.as_str(), o.minute_of_day), o.outcome))
        .collect();

    observations
        .iter()
        .map(|obs| {
            let mut offsets = [OffsetState::None; OFFSET_COUNT];
            if obs.outcome.is_terminal() {
                for (i, slot) in offsets.iter_mut().enumerate() {
                    let n = (i + 1) as u32;
                    *slot = obs
                        .minute_of_day
                        .checked_sub(offset_minutes(n))
                        .and_then(|earlier| lookup.get(&(obs.entity.as_str(), earlier)))
                        .map(|earlier_outcome| {
                            if *earlier_outcome == obs.outcome {
                                OffsetState::Match
                            } else {
                                OffsetState::Mismatch
                            }
                        })
                        .unwrap_or(OffsetState::None);
                }
            }
            DerivedRecord {
                entity: obs.entity.clone(),
                minute_of_day: obs.minute_of_day,
                outcome: obs.outcome,
                offsets,
            }
        })
        .collect()
}
