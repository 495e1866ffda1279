use chrono::{DateTime, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::user::User;

pub static REPORT_COLLECTION_NAME: &str = "reports";
pub static BAN_COLLECTION_NAME: &str = "banned";

/// A student's complaint about a tutor. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub reporter_id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub tutor_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Presence of a record blocks sign-in for `email`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanRecord {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub tutor_id: Uuid,
    pub name: String,
    pub email: String,
    pub banned_at: DateTime<Utc>,
}

impl BanRecord {
    pub fn new(tutor: &User) -> BanRecord {
        BanRecord {
            id: Uuid::new_v4(),
            tutor_id: tutor.id,
            name: tutor.name.clone(),
            email: tutor.email.clone(),
            banned_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReportData {
    pub tutor: Uuid,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportedTutorResponse {
    pub tutor_id: Uuid,
    pub name: String,
    pub email: String,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BanResponse {
    pub tutor_id: Uuid,
    pub name: String,
    pub email: String,
    pub banned_at: DateTime<Utc>,
}

impl From<BanRecord> for BanResponse {
    fn from(ban: BanRecord) -> Self {
        BanResponse {
            tutor_id: ban.tutor_id,
            name: ban.name,
            email: ban.email,
            banned_at: ban.banned_at,
        }
    }
}

/// Groups report messages by reported tutor, in first-report order.
pub fn group_by_tutor(reports: &[Report]) -> Vec<(Uuid, Vec<String>)> {
    let mut grouped: Vec<(Uuid, Vec<String>)> = vec![];
    for report in reports {
        match grouped.iter_mut().find(|(id, _)| *id == report.tutor_id) {
            Some((_, messages)) => messages.push(report.message.clone()),
            None => grouped.push((report.tutor_id, vec![report.message.clone()])),
        }
    }
    grouped
}
