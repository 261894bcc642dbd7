//! Wall-clock helpers shared by the buffer, persistence and IRC fan-out.
//!
//! Every timestamp in the system is a Unix second (`i64`). Human-readable
//! renderings use local time in the fixed `YYYY-MM-DD HH:MM:SS` shape, which
//! doubles as the rotated-file name format because it sorts chronologically.

use chrono::{Local, NaiveDateTime, TimeZone, Utc};

/// Fixed 19-character timestamp layout used in log lines and file names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current wall-clock time as Unix seconds.
pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Render a Unix timestamp as local `YYYY-MM-DD HH:MM:SS`.
pub fn format_timestamp(timestamp: i64) -> String {
    match Local.timestamp_opt(timestamp, 0).single() {
        Some(local) => local.format(TIMESTAMP_FORMAT).to_string(),
        // Out-of-range timestamps cannot occur from `now()`, but replayed
        // files are untrusted input; fall back to UTC rendering.
        None => Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .map(|utc| utc.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_else(|| timestamp.to_string()),
    }
}

/// Parse a local `YYYY-MM-DD HH:MM:SS` string back to Unix seconds.
///
/// Ambiguous local times (DST fold) resolve to the earlier instant so replay
/// stays deterministic. Returns `None` for any malformed input.
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.timestamp())
}
