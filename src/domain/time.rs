//! Wall-clock to epoch conversion.
//!
//! The firmware renders its clock with `gmtime`, so the value it expects is
//! the target zone's wall-clock time read as if it were UTC. Every tier of the
//! time cascade goes through [`wall_clock_epoch`] so they agree with each other.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use chrono_tz::{OffsetComponents, Tz};
use serde::Deserialize;

/// Structured current-time answer from the time service.
///
/// Untrusted input: fields are validated when converted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    #[serde(alias = "second")]
    pub seconds: u32,
    #[serde(default, alias = "dstObserved", alias = "isDstObserved")]
    pub dst_active: bool,
}

impl RemoteTime {
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)?.and_hms_opt(
            self.hour,
            self.minute,
            self.seconds,
        )
    }

    /// Epoch seconds for this sample, adding `dst_offset_secs` when the
    /// service flags daylight saving.
    pub fn to_epoch(&self, dst_offset_secs: i64) -> Option<i64> {
        let base = wall_clock_epoch(&self.to_naive()?);
        Some(if self.dst_active {
            base + dst_offset_secs
        } else {
            base
        })
    }
}

/// Read a naive wall-clock time as UTC.
pub fn wall_clock_epoch(wall: &NaiveDateTime) -> i64 {
    wall.and_utc().timestamp()
}

/// Take an instant and express it as wall-clock epoch in `zone`, adding
/// `dst_offset_secs` while the zone observes daylight saving, the same rule
/// [`RemoteTime::to_epoch`] applies to the service's DST flag.
pub fn reinterpret_in_zone(instant: DateTime<Utc>, zone: Tz, dst_offset_secs: i64) -> i64 {
    let local = instant.with_timezone(&zone);
    let base = wall_clock_epoch(&local.naive_local());
    if local.offset().dst_offset() != TimeDelta::zero() {
        base + dst_offset_secs
    } else {
        base
    }
}

pub fn parse_zone(zone: &str) -> Option<Tz> {
    zone.parse::<Tz>().ok()
}
