//! Persisted record types and the shared store error
//!
//! Observations and watermarks are the only durable truth in the system;
//! everything in `signal_core` is recomputed from them on demand.

pub mod results;
pub mod watermarks;

pub use results::ResultStore;
pub use watermarks::WatermarkStore;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Resolved state of a slot's comparison market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "YES")]
    Yes,
    #[serde(rename = "NO")]
    No,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
            Outcome::Unknown => "UNKNOWN",
        }
    }

    /// True for a terminal YES/NO value
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Unknown)
    }
}

/// One observed slot: a (day, entity, minute) key and its outcome
///
/// Unique per key in the store. Rows may be written as UNKNOWN while the
/// slot is pending and are upgraded in place exactly once to YES/NO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub day: NaiveDate,
    pub entity: String,
    pub minute_of_day: u32,
    pub outcome: Outcome,
}

impl Observation {
    /// Parse an Observation from a JSONL line
    pub fn from_jsonl(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}
