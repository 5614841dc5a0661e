//! Time and number formatting helpers.

use chrono::Duration;

/// Formats a Duration into HH:MM:SS string.
pub fn format_duration(dur: Duration) -> String {
    let total_secs = dur.num_seconds().max(0);
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part / total * 100`, rounded to two decimals. A zero total counts as one so
/// an idle pool reports `0.0` instead of `NaN`.
pub fn percent(part: u64, total: u64) -> f64 {
    round2(part as f64 / total.max(1) as f64 * 100.0)
}

/// A fresh request id for error bodies and log correlation.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
