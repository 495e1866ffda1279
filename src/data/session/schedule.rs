use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::ValidationError;

pub const MIN_DURATION_HOURS: f64 = 0.5;
pub const MAX_DURATION_HOURS: f64 = 8.0;
pub const MIN_PRICE: f64 = 0.0;
pub const MAX_PRICE: f64 = 1000.0;

const TIME_FORMATS: [&str; 2] = ["%I:%M %p", "%I:%M%p"];

pub fn parse_date(date: &str) -> Result<NaiveDate, ValidationError> {
    let date = date.trim();
    if date.is_empty() {
        return Err(ValidationError::MissingDate);
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(date.to_string()))
}

/// Parses a 12-hour clock time such as `10:00 AM` or `2:30pm`.
pub fn parse_time(time: &str) -> Result<NaiveTime, ValidationError> {
    let time = time.trim();
    if time.is_empty() {
        return Err(ValidationError::MissingTime);
    }
    let normalized = time.to_ascii_uppercase();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(&normalized, format).ok())
        .ok_or_else(|| ValidationError::InvalidTime(time.to_string()))
}

/// Canonical `h:mm AM` rendering of a parsed time.
pub fn format_time(time: NaiveTime) -> String {
    time.format("%-I:%M %p").to_string()
}

pub fn hours(duration_hours: f64) -> Duration {
    Duration::seconds((duration_hours * 3600.0).round() as i64)
}

/// Half-open `[start, end)` time range.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    /// `None` when the end falls outside the representable range.
    pub fn checked(start: DateTime<Utc>, duration_hours: f64) -> Option<Interval> {
        let end = start.checked_add_signed(hours(duration_hours))?;
        Some(Interval { start, end })
    }

    /// Like [`Interval::checked`], but the end saturates at the latest instant.
    pub fn new(start: DateTime<Utc>, duration_hours: f64) -> Interval {
        Interval::checked(start, duration_hours).unwrap_or(Interval {
            start,
            end: DateTime::<Utc>::MAX_UTC,
        })
    }

    /// Touching intervals (`self.end == other.start`) don't overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Start instant of a session, dates and times are read as UTC.
pub fn start_of(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(time))
}
