use chrono::{DateTime, NaiveDate, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ValidationError;

pub mod schedule;

use schedule::Interval;

pub static SESSION_COLLECTION_NAME: &str = "sessions";

/// Lifecycle state of a bookable time-slot.
///
/// Statuses only move forward: `available -> booked -> completed`. Cancelling
/// removes the record instead of adding a state.
#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Available,
    Booked,
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Available => "available",
            SessionStatus::Booked => "booked",
            SessionStatus::Completed => "completed",
        }
    }

    /// Whether the slot still occupies the tutor's schedule.
    pub fn is_active(self) -> bool {
        self != SessionStatus::Completed
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub student_id: Uuid,
    pub student_name: String,
    pub booked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub tutor_id: Uuid,
    pub tutor_name: String,
    pub subject: String,
    pub date: NaiveDate,
    pub time: String,
    pub starts_at: DateTime<Utc>,
    pub duration_hours: f64,
    pub price: f64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub booking: Option<Booking>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn interval(&self) -> Interval {
        Interval::new(self.starts_at, self.duration_hours)
    }

    pub fn student_id(&self) -> Option<Uuid> {
        self.booking.as_ref().map(|b| b.student_id)
    }
}

/// Tutor supplied fields of a new session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionDraft {
    pub subject: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// 12-hour clock, e.g. `10:00 AM`
    pub time: String,
    #[serde(default = "default_duration")]
    pub duration_hours: f64,
    #[serde(default)]
    pub price: f64,
}

fn default_duration() -> f64 {
    1.0
}

/// Draft that passed every rule not depending on other sessions.
#[derive(Debug, Clone)]
pub struct ValidDraft {
    pub subject: String,
    pub date: NaiveDate,
    pub time: String,
    pub interval: Interval,
    pub duration_hours: f64,
    pub price: f64,
}

impl SessionDraft {
    /// Checks the draft rules in reporting order and returns the first one
    /// violated. Overlap is checked by the caller against stored sessions.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<ValidDraft, ValidationError> {
        let subject = self.subject.trim();
        if subject.is_empty() {
            return Err(ValidationError::MissingSubject);
        }
        let date = schedule::parse_date(&self.date)?;
        let time = schedule::parse_time(&self.time)?;

        if !(schedule::MIN_DURATION_HOURS..=schedule::MAX_DURATION_HOURS)
            .contains(&self.duration_hours)
        {
            return Err(ValidationError::DurationOutOfRange(self.duration_hours));
        }
        if !(schedule::MIN_PRICE..=schedule::MAX_PRICE).contains(&self.price) {
            return Err(ValidationError::PriceOutOfRange(self.price));
        }

        let start = schedule::start_of(date, time);
        if start <= now {
            return Err(ValidationError::NotInFuture);
        }

        let interval = Interval::checked(start, self.duration_hours)
            .ok_or_else(|| ValidationError::InvalidDate(self.date.trim().to_string()))?;

        Ok(ValidDraft {
            subject: subject.to_string(),
            date,
            time: schedule::format_time(time),
            interval,
            duration_hours: self.duration_hours,
            price: self.price,
        })
    }
}

impl ValidDraft {
    /// First non-completed session whose interval intersects this draft.
    pub fn first_overlap<'a>(&self, existing: &'a [Session]) -> Option<&'a Session> {
        existing
            .iter()
            .filter(|s| s.status.is_active())
            .find(|s| s.interval().overlaps(&self.interval))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BookingResponse {
    pub student_id: Uuid,
    pub student_name: String,
    pub booked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub tutor_id: Uuid,
    pub tutor_name: String,
    pub subject: String,
    pub date: NaiveDate,
    pub time: String,
    pub starts_at: DateTime<Utc>,
    pub duration_hours: f64,
    pub price: f64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub booking: Option<BookingResponse>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Session> for SessionResponse {
    fn from(s: Session) -> Self {
        SessionResponse {
            id: s.id,
            tutor_id: s.tutor_id,
            tutor_name: s.tutor_name,
            subject: s.subject,
            date: s.date,
            time: s.time,
            starts_at: s.starts_at,
            duration_hours: s.duration_hours,
            price: s.price,
            status: s.status,
            created_at: s.created_at,
            booking: s.booking.map(|b| BookingResponse {
                student_id: b.student_id,
                student_name: b.student_name,
                booked_at: b.booked_at,
            }),
            completed_at: s.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()
    }

    fn draft() -> SessionDraft {
        SessionDraft {
            subject: "Math".to_string(),
            date: "2025-06-01".to_string(),
            time: "10:00 AM".to_string(),
            duration_hours: 1.0,
            price: 20.0,
        }
    }

    #[test]
    fn valid_draft_is_normalized() {
        let valid = draft().validate(now()).expect("valid draft");
        assert_eq!(valid.time, "10:00 AM");
        assert_eq!(
            valid.interval.start,
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(
            valid.interval.end,
            Utc.with_ymd_and_hms(2025, 6, 1, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn rules_are_reported_in_priority_order() {
        let broken = SessionDraft {
            subject: " ".to_string(),
            date: String::new(),
            time: String::new(),
            duration_hours: 0.0,
            price: -1.0,
        };
        assert_eq!(broken.validate(now()).unwrap_err(), ValidationError::MissingSubject);

        let broken = SessionDraft {
            subject: "Math".to_string(),
            ..broken
        };
        assert_eq!(broken.validate(now()).unwrap_err(), ValidationError::MissingDate);

        let broken = SessionDraft {
            date: "2025-06-01".to_string(),
            ..broken
        };
        assert_eq!(broken.validate(now()).unwrap_err(), ValidationError::MissingTime);

        let broken = SessionDraft {
            time: "10:00 AM".to_string(),
            ..broken
        };
        assert_eq!(
            broken.validate(now()).unwrap_err(),
            ValidationError::DurationOutOfRange(0.0)
        );

        let broken = SessionDraft {
            duration_hours: 8.0,
            ..broken
        };
        assert_eq!(
            broken.validate(now()).unwrap_err(),
            ValidationError::PriceOutOfRange(-1.0)
        );

        let broken = SessionDraft {
            price: 1000.0,
            date: "2025-04-30".to_string(),
            ..broken
        };
        assert_eq!(broken.validate(now()).unwrap_err(), ValidationError::NotInFuture);
    }

    #[test]
    fn start_equal_to_now_is_not_future() {
        let at_now = SessionDraft {
            date: "2025-05-01".to_string(),
            time: "12:00 AM".to_string(),
            ..draft()
        };
        assert_eq!(at_now.validate(now()).unwrap_err(), ValidationError::NotInFuture);
    }

    #[test]
    fn end_past_the_calendar_is_an_invalid_date() {
        let far = SessionDraft {
            date: "+262142-12-31".to_string(),
            time: "11:00 PM".to_string(),
            duration_hours: 8.0,
            ..draft()
        };
        assert_eq!(
            far.validate(now()).unwrap_err(),
            ValidationError::InvalidDate("+262142-12-31".to_string())
        );
    }

    #[test]
    fn completed_sessions_never_overlap() {
        let valid = draft().validate(now()).unwrap();
        let mut existing = Session {
            id: Uuid::new_v4(),
            tutor_id: Uuid::new_v4(),
            tutor_name: "Tutor".to_string(),
            subject: "Math".to_string(),
            date: valid.date,
            time: valid.time.clone(),
            starts_at: valid.interval.start,
            duration_hours: 1.0,
            price: 20.0,
            status: SessionStatus::Completed,
            created_at: now(),
            booking: None,
            completed_at: Some(now()),
        };
        assert!(valid.first_overlap(std::slice::from_ref(&existing)).is_none());

        existing.status = SessionStatus::Booked;
        assert_eq!(
            valid.first_overlap(std::slice::from_ref(&existing)).map(|s| s.id),
            Some(existing.id)
        );
    }
}
