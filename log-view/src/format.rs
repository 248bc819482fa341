use chrono::{DateTime, Utc};

/// Format a duration for group headers and step badges.
///
/// Under a minute: one decimal of seconds (`1.2s`). Then `4m 05s`, then `1h 02m`.
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 60_000 {
        return format!("{:.1}s", ms as f64 / 1000.0);
    }
    let total_secs = ms / 1000;
    if total_secs < 3600 {
        return format!("{}m {:02}s", total_secs / 60, total_secs % 60);
    }
    format!("{}h {:02}m", total_secs / 3600, (total_secs % 3600) / 60)
}

/// Milliseconds elapsed between `since` and `now`, clamped at zero.
pub fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - since).num_milliseconds().max(0) as u64
}

/// Wall-clock start shown in group headers.
pub fn format_clock(ts: DateTime<Utc>) -> String {
    ts.format("%H:%M:%S").to_string()
}
