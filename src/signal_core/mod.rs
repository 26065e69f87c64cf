//! Derived signals recomputed from stored observations
//!
//! Two independent consumers of the result log: the offline consistency
//! encoder and the live three-hour vertical detector. Neither feeds back
//! into collection; both are deterministic over the same input.

pub mod detector;
pub mod encoder;

pub use detector::{ComparisonField, Detection, SignalCandidate};
pub use encoder::{encode_day, DerivedRecord, OffsetState};
