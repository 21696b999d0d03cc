//! Temporal scalar types (spec §4.7): thin wrappers over integer wire
//! representations, backed by `chrono` for calendar arithmetic and text
//! formatting. The wire always carries microsecond-resolution integers
//! relative to the server's 2000-01-01 epoch, never a string — text
//! parsing is only needed for `duration` and lives in
//! [`super::duration_text`].

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Midnight, 2000-01-01 UTC — the wire epoch every temporal scalar here
/// is measured against.
fn wire_epoch() -> NaiveDateTime {
  NaiveDate::from_ymd_opt(2000, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

/// `datetime`: absolute instant, wire value is microseconds since the
/// wire epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTimeValue(pub i64);

impl DateTimeValue {
  pub fn to_chrono(self) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(wire_epoch() + ChronoDuration::microseconds(self.0), Utc)
  }

  pub fn from_chrono(dt: DateTime<Utc>) -> Self {
    Self((dt.naive_utc() - wire_epoch()).num_microseconds().unwrap_or(0))
  }
}

/// `local_datetime`: naive (timezone-less) calendar datetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalDateTimeValue(pub i64);

impl LocalDateTimeValue {
  pub fn to_chrono(self) -> NaiveDateTime {
    wire_epoch() + ChronoDuration::microseconds(self.0)
  }

  pub fn from_chrono(dt: NaiveDateTime) -> Self {
    Self((dt - wire_epoch()).num_microseconds().unwrap_or(0))
  }
}

/// `local_date`: wire value is days since the wire epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalDateValue(pub i32);

impl LocalDateValue {
  pub fn to_chrono(self) -> NaiveDate {
    wire_epoch().date() + ChronoDuration::days(self.0 as i64)
  }

  pub fn from_chrono(date: NaiveDate) -> Self {
    Self((date - wire_epoch().date()).num_days() as i32)
  }
}

/// `local_time`: wire value is microseconds since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalTimeValue(pub i64);

impl LocalTimeValue {
  pub fn to_chrono(self) -> NaiveTime {
    NaiveTime::from_hms_opt(0, 0, 0).unwrap() + ChronoDuration::microseconds(self.0)
  }

  pub fn from_chrono(time: NaiveTime) -> Self {
    let midnight = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
    Self((time - midnight).num_microseconds().unwrap_or(0))
  }
}

/// `duration`: exact microsecond count, no calendar component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DurationValue(pub i64);

/// `relative_duration`: months + days + microseconds, each independently
/// signed (a calendar-relative offset, not a fixed duration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeDurationValue {
  pub months: i32,
  pub days: i32,
  pub microseconds: i64,
}

/// `date_duration`: months + days only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateDurationValue {
  pub months: i32,
  pub days: i32,
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Datelike;

  #[test]
  fn datetime_round_trips_through_chrono() {
    let dt = DateTime::<Utc>::from_naive_utc_and_offset(
      NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(12, 0, 0).unwrap(),
      Utc,
    );
    let wire = DateTimeValue::from_chrono(dt);
    assert_eq!(wire.to_chrono(), dt);
  }

  #[test]
  fn local_date_round_trips() {
    let date = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
    let wire = LocalDateValue::from_chrono(date);
    assert_eq!(wire.to_chrono(), date);
    assert_eq!(wire.to_chrono().year(), 1999);
  }
}
