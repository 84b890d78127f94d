//! Compact 32-bit timestamps counted from 2000-01-01T00:00:00Z

use chrono::{DateTime, TimeZone, Utc};

/// Unix time of the custom epoch
pub const EPOCH_UNIX_SECS: i64 = 946_684_800;

pub const SECS_PER_DAY: u32 = 86_400;

/// Seconds since the custom epoch. Instants before 2000 clamp to 0, instants
/// after early 2136 clamp to `u32::MAX`.
pub fn to_timestamp(t: DateTime<Utc>) -> u32 {
    let secs = t.timestamp() - EPOCH_UNIX_SECS;
    if secs < 0 {
        return 0;
    }
    u32::try_from(secs).unwrap_or(u32::MAX)
}

pub fn from_timestamp(ts: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(i64::from(ts) + EPOCH_UNIX_SECS, 0)
        .single()
        .unwrap_or_default()
}

pub fn now() -> u32 {
    to_timestamp(Utc::now())
}

/// Calendar day (UTC) a timestamp falls on, counted from the epoch
pub fn day_of(ts: u32) -> u32 {
    ts / SECS_PER_DAY
}
