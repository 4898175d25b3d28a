use chrono::{DateTime, Local, TimeZone};

/// Format epoch seconds as a 24-hour "HH:mm" clock in `tz`.
///
/// Returns `None` if the timestamp is outside chrono's representable range.
pub fn clock_in<Tz: TimeZone>(epoch: i64, tz: &Tz) -> Option<String>
where
    Tz::Offset: std::fmt::Display,
{
    DateTime::from_timestamp(epoch, 0)
        .map(|utc| utc.with_timezone(tz).format("%H:%M").to_string())
}

/// Format epoch seconds as "HH:mm" in the local time zone.
pub fn clock(epoch: i64) -> Option<String> {
    clock_in(epoch, &Local)
}
