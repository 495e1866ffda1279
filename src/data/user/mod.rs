use std::collections::BTreeMap;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::role::Role;

pub mod db;

pub static USER_COLLECTION_NAME: &str = "users";

/// PHC formatted argon2 hash of a user password.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(password: impl AsRef<str>) -> Result<PasswordHash, password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default().hash_password(password.as_ref().as_bytes(), &salt)?;
        Ok(PasswordHash(hash.to_string()))
    }

    pub fn verify(&self, password: impl AsRef<str>) -> bool {
        match password_hash::PasswordHash::new(&self.0) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_ref().as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!("stored password hash is malformed: {}", e);
                false
            }
        }
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PasswordHash(..)")
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl std::str::FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            other => Err(format!("unknown gender '{}'", other)),
        }
    }
}

/// Grade name mapped to the subjects taught in that grade.
pub type GradeSubjects = BTreeMap<String, Vec<String>>;

/// Role specific part of a user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Profile {
    Student {
        #[serde(default)]
        grade: Option<String>,
    },
    Tutor {
        #[serde(default)]
        rate: Option<f64>,
        #[serde(default, deserialize_with = "grades::lenient")]
        grades: GradeSubjects,
    },
    Admin,
}

impl Profile {
    pub fn role(&self) -> Role {
        match self {
            Profile::Student { .. } => Role::Student,
            Profile::Tutor { .. } => Role::Tutor,
            Profile::Admin => Role::Admin,
        }
    }
}

/// Older tutor records stored `grades` as a plain list of grade names.
mod grades {
    use super::GradeSubjects;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Stored {
        Map(GradeSubjects),
        List(Vec<String>),
    }

    pub fn lenient<'de, D: Deserializer<'de>>(d: D) -> Result<GradeSubjects, D::Error> {
        Ok(match Stored::deserialize(d)? {
            Stored::Map(map) => map,
            Stored::List(list) => list.into_iter().map(|grade| (grade, vec![])).collect(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub pw_hash: PasswordHash,
    pub province: String,
    pub gender: Gender,
    pub created_at: DateTime<Utc>,
    pub profile: Profile,
}

impl User {
    pub fn role(&self) -> Role {
        self.profile.role()
    }

    /// Subjects taught in any grade; empty for non-tutors.
    pub fn teaches(&self, subject: &str) -> bool {
        match &self.profile {
            Profile::Tutor { grades, .. } => grades
                .values()
                .flatten()
                .any(|it| it.eq_ignore_ascii_case(subject)),
            _ => false,
        }
    }

    pub fn rate(&self) -> Option<f64> {
        match &self.profile {
            Profile::Tutor { rate, .. } => *rate,
            _ => None,
        }
    }
}
