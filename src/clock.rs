//! Minute-of-day conversions for feed slot times
//!
//! Slots are labelled `HH:MM`. All internal arithmetic works on integer
//! minute-of-day so lookback windows and offsets are plain subtraction.
//! The hour is deliberately unclamped: some feeds number overnight slots
//! past 24 (e.g. `25:10`), and those must survive a round trip.

/// Convert an hour/minute pair to minute-of-day
pub fn to_minutes(hour: u32, minute: u32) -> u32 {
    hour * 60 + minute
}

/// Convert minute-of-day back to an hour/minute pair
pub fn from_minutes(minute_of_day: u32) -> (u32, u32) {
    (minute_of_day / 60, minute_of_day % 60)
}

/// Parse a `HH:MM` slot label into minute-of-day
///
/// Returns None for anything that is not two integer fields separated by a
/// colon with the minute in 0..=59. The hour is not range-checked.
pub fn parse_clock(label: &str) -> Option<u32> {
    let (h, m) = label.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if minute > 59 {
        return None;
    }
    Some(to_minutes(hour, minute))
}

/// Format minute-of-day as a zero-padded `HH:MM` label
pub fn format_minutes(minute_of_day: u32) -> String {
    let (hour, minute) = from_minutes(minute_of_day);
    format!("{:02}:{:02}", hour, minute)
}
