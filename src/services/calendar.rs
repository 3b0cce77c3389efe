use chrono::{DateTime, NaiveDate, TimeZone};
use chrono_tz::Tz;

/// The single zone every calendar date is derived in
pub const REFERENCE_TZ: Tz = Tz::UTC;

/// Calendar date of an epoch-seconds timestamp in the reference zone
pub fn calendar_date(timestamp: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.with_timezone(&REFERENCE_TZ).date_naive())
}

/// Epoch seconds of local midnight for `date` in the reference zone
pub fn day_start(date: NaiveDate) -> Option<i64> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    REFERENCE_TZ
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp())
}

/// Human-readable form for logs and status output
pub fn format_timestamp(timestamp: i64) -> String {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(dt) => dt
            .with_timezone(&REFERENCE_TZ)
            .format("%Y-%m-%d %H:%M")
            .to_string(),
        None => timestamp.to_string(),
    }
}
