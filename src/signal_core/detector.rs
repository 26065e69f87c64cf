//! Live vertical-consistency detector over the most recent three hours
//!
//! A "base" is a minute whose comparison value agrees across the current
//! hour and the two hours before it. From each base the detector scans
//! forward for the first minute where any adjacent hour pair still agrees;
//! that minute becomes a candidate. Candidates from all entities are pooled,
//! ordered by minute, and thinned by two elimination rules: a minimum gap
//! from the last accepted candidate and entity diversity.
//!
//! The same scan runs over raw outcomes or over any one of the encoder's
//! offset fields; the field choice is the caller's and the result is fully
//! deterministic for a given input.

use crate::signal_core::encoder::{self, OffsetState};
use crate::store::Observation;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

mod scan_rules {
    /// Hours covered by the vertical window (current plus two back)
    pub const WINDOW_HOURS: u32 = 3;
    /// Minimum minutes between two accepted candidates
    pub const MIN_GAP_MINUTES: u32 = 3;
}

/// Elimination reasons, in check order
pub const REASON_GAP: &str = "gap too small";
pub const REASON_ENTITY: &str = "same entity";

/// Which per-slot value the vertical scan compares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonField {
    /// The raw terminal outcome
    Outcome,
    /// The encoder's offset-N comparison, N in 1..=5
    Offset(u32),
}

impl ComparisonField {
    /// Parse a CLI/config label: `outcome` or `offset1`..`offset5`
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "outcome" => Some(ComparisonField::Outcome),
            other => {
                let n: u32 = other.strip_prefix("offset")?.parse().ok()?;
                if (1..=encoder::OFFSET_COUNT as u32).contains(&n) {
                    Some(ComparisonField::Offset(n))
                } else {
                    None
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonField::Outcome => "outcome",
            ComparisonField::Offset(1) => "offset1",
            ComparisonField::Offset(2) => "offset2",
            ComparisonField::Offset(3) => "offset3",
            ComparisonField::Offset(4) => "offset4",
            ComparisonField::Offset(_) => "offset5",
        }
    }
}

/// A minute flagged by the scan, with its elimination verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalCandidate {
    pub entity: String,
    /// Minute within the hour (0..=59) where the forward scan matched
    pub minute: u32,
    /// The base minute the scan started from
    pub base_minute: u32,
    /// Comparison values at the candidate minute: current hour, one hour
    /// ago, two hours ago; None where no value exists
    pub values: [Option<String>; 3],
    pub eliminated: bool,
    pub reason: Option<&'static str>,
}

/// Full detector output for one run
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    /// Hours scanned: current, one back, two back
    pub window: [u32; 3],
    pub field: &'static str,
    /// Every candidate in minute order, accepted and eliminated alike
    pub candidates: Vec<SignalCandidate>,
}

impl Detection {
    pub fn accepted(&self) -> impl Iterator<Item = &SignalCandidate> {
        self.candidates.iter().filter(|c| !c.eliminated)
    }
}

/// (hour, minute) → comparison value for one entity
type HourGrid = HashMap<(u32, u32), String>;

/// Run the detector over a day's observations
///
/// Returns None when the input holds no resolved outcome at all (no hour
/// to anchor the window on).
pub fn detect(observations: &[Observation], field: ComparisonField) -> Option<Detection> {
    // The window anchors on the newest resolved hour in the data, not on
    // the newest hour that happens to carry a value for the chosen field
    let current_hour = observations
        .iter()
        .filter(|obs| obs.outcome.is_terminal())
        .map(|obs| crate::clock::from_minutes(obs.minute_of_day).0)
        .max()?;

    let grids = build_grids(observations, field);
    let window = [
        current_hour,
        current_hour.saturating_sub(1),
        current_hour.saturating_sub(2),
    ];

    // BTreeMap iteration keeps the pooled order reproducible across runs
    let mut pooled: Vec<SignalCandidate> = Vec::new();
    for (entity, grid) in &grids {
        scan_entity(entity, grid, window, &mut pooled);
    }

    pooled.sort_by_key(|c| c.minute);
    dedupe(&mut pooled);
    eliminate(&mut pooled);

    Some(Detection {
        window,
        field: field.as_str(),
        candidates: pooled,
    })
}

/// Project observations onto per-entity comparison grids
fn build_grids(
    observations: &[Observation],
    field: ComparisonField,
) -> BTreeMap<String, HourGrid> {
    let mut grids: BTreeMap<String, HourGrid> = BTreeMap::new();

    match field {
        ComparisonField::Outcome => {
            for obs in observations {
                if !obs.outcome.is_terminal() {
                    continue;
                }
                let (hour, minute) = crate::clock::from_minutes(obs.minute_of_day);
                grids
                    .entry(obs.entity.clone())
                    .or_default()
                    .insert((hour, minute), obs.outcome.as_str().to_string());
            }
        }
        ComparisonField::Offset(n) => {
            // Both consumers must see the exact same derivation, so the
            // detector goes through the encoder rather than re-deriving
            for record in encoder::encode_day(observations) {
                let state = match record.offset(n as usize) {
                    Some(OffsetState::None) | None => continue,
                    Some(state) => state,
                };
                let (hour, minute) = crate::clock::from_minutes(record.minute_of_day);
                grids
                    .entry(record.entity)
                    .or_default()
                    .insert((hour, minute), state.as_str().to_string());
            }
        }
    }
    grids
}

/// Find this entity's candidates: one per base, first forward match wins
fn scan_entity(entity: &str, grid: &HourGrid, window: [u32; 3], out: &mut Vec<SignalCandidate>) {
    let [current, one_ago, two_ago] = window;

    for base in 0..60u32 {
        let v0 = grid.get(&(two_ago, base));
        let v1 = grid.get(&(one_ago, base));
        let v2 = grid.get(&(current, base));
        let is_base = match (v0, v1, v2) {
            (Some(a), Some(b), Some(c)) => a == b && b == c,
            _ => false,
        };
        if !is_base {
            continue;
        }

        for target in base + 1..60 {
            let t_cur = grid.get(&(current, target));
            let t_one = grid.get(&(one_ago, target));
            let t_two = grid.get(&(two_ago, target));

            let pair_hit = matches!((t_cur, t_one), (Some(a), Some(b)) if a == b)
                || matches!((t_one, t_two), (Some(a), Some(b)) if a == b);
            if pair_hit {
                out.push(SignalCandidate {
                    entity: entity.to_string(),
                    minute: target,
                    base_minute: base,
                    values: [t_cur.cloned(), t_one.cloned(), t_two.cloned()],
                    eliminated: false,
                    reason: None,
                });
                break;
            }
        }
    }
}

/// Drop repeat (entity, minute) pairs, keeping the first occurrence
fn dedupe(candidates: &mut Vec<SignalCandidate>) {
    let mut seen: HashSet<(String, u32)> = HashSet::new();
    candidates.retain(|c| seen.insert((c.entity.clone(), c.minute)));
}

/// Sequential elimination in minute order
///
/// The gap rule is checked before the entity rule, so a candidate failing
/// both is tagged with the gap reason. Only accepted candidates move the
/// tracked (minute, entity) state.
fn eliminate(candidates: &mut [SignalCandidate]) {
    let mut last_accepted: Option<(u32, String)> = None;

    for candidate in candidates.iter_mut() {
        if let Some((last_minute, last_entity)) = &last_accepted {
            if candidate.minute - last_minute < scan_rules::MIN_GAP_MINUTES {
                candidate.eliminated = true;
                candidate.reason = Some(REASON_GAP);
                continue;
            }
            if candidate.entity == *last_entity {
                candidate.eliminated = true;
                candidate.reason = Some(REASON_ENTITY);
                continue;
            }
        }
        last_accepted = Some((candidate.minute, candidate.entity.clone()));
    }
}
