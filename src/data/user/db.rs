use chrono::Utc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::role::Role;

use super::{Gender, PasswordHash, Profile, User};

pub mod problem {
    use crate::resp::problem::Problem;
    use rocket::http::Status;
    use uuid::Uuid;

    #[inline]
    pub fn bad_email(email: impl ToString, detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad email.")
            .insert_str("email", email)
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_field(field: &str, detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad sign up data.")
            .insert_str("field", field)
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn email_taken(email: impl ToString) -> Problem {
        Problem::new_untyped(Status::Conflict, "E-mail already registered.")
            .insert_str("email", email)
            .to_owned()
    }

    #[inline]
    pub fn bad_password(detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad password.")
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        Problem::new_untyped(Status::NotFound, "User doesn't exist.")
            .insert("id", id.to_string())
            .clone()
    }

    #[inline]
    pub fn bad_login() -> Problem {
        Problem::new_untyped(Status::Unauthorized, "Bad email or password.")
    }

    #[inline]
    pub fn banned() -> Problem {
        Problem::new_untyped(Status::Forbidden, "Account is banned.")
    }
}

#[derive(Clone, FromForm, ToSchema)]
pub struct UserSignupData {
    #[schema(format = "email")]
    pub email: String,
    pub name: String,
    #[schema(format = "password")]
    pub password: String,
    /// `student` or `tutor`; admins are assigned by configuration.
    pub role: String,
    pub province: String,
    /// `male` or `female`
    pub gender: String,
    pub grade: Option<String>,
    pub rate: Option<f64>,
}

impl std::fmt::Debug for UserSignupData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserSignupInfo:{}", self.email)
    }
}

impl UserSignupData {
    pub fn validate(&self) -> Result<(Role, Gender), crate::resp::problem::Problem> {
        if !self.email.contains('@') {
            return Err(problem::bad_email(
                self.email.as_str(),
                "Not a valid e-mail address.",
            ));
        }

        if self.name.trim().len() < 2 || self.name.len() > 64 {
            return Err(problem::bad_field(
                "name",
                "Name must be between 2 and 64 characters (bytes) long.",
            ));
        }

        if self.password.len() < 8 {
            return Err(problem::bad_password(
                "Password must be at least 8 characters (bytes) long.",
            ));
        }

        if self.password.len() > 1024 {
            return Err(problem::bad_password(
                "Passwords longer than 1024 characters aren't supported.",
            ));
        }

        if self.province.trim().is_empty() {
            return Err(problem::bad_field("province", "Province is required."));
        }

        let role: Role = self
            .role
            .parse()
            .map_err(|e: String| problem::bad_field("role", e))?;
        if role == Role::Admin {
            return Err(problem::bad_field("role", "Admin accounts can't sign up."));
        }

        let gender: Gender = self
            .gender
            .parse()
            .map_err(|e: String| problem::bad_field("gender", e))?;

        if let Some(rate) = self.rate {
            if !(0.0..=1000.0).contains(&rate) {
                return Err(problem::bad_field(
                    "rate",
                    "Rate must be between 0 and 1000.",
                ));
            }
        }

        Ok((role, gender))
    }

    /// Builds the stored record. `admin` overrides the requested role.
    pub fn into_user(
        self,
        role: Role,
        gender: Gender,
        admin: bool,
    ) -> Result<User, argon2::password_hash::Error> {
        let profile = match (admin, role) {
            (true, _) => Profile::Admin,
            (false, Role::Tutor) => Profile::Tutor {
                rate: self.rate,
                grades: Default::default(),
            },
            (false, _) => Profile::Student { grade: self.grade },
        };

        let id = Uuid::new_v4();
        tracing::info!("Creating a new {} with UUID: {}", profile.role(), id);

        Ok(User {
            id,
            email: self.email.trim().to_lowercase(),
            name: self.name.trim().to_string(),
            pw_hash: PasswordHash::new(&self.password)?,
            province: self.province.trim().to_string(),
            gender,
            created_at: Utc::now(),
            profile,
        })
    }
}

#[derive(Clone, FromForm, ToSchema)]
pub struct UserLoginData {
    #[schema(format = "email")]
    pub email: String,
    #[schema(format = "password")]
    pub password: String,
}

impl std::fmt::Debug for UserLoginData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UserLoginInfo:{}", self.email)
    }
}

impl UserLoginData {
    pub fn validate(&self) -> Result<(), crate::resp::problem::Problem> {
        if !self.email.contains('@') || self.password.len() < 8 || self.password.len() > 1024 {
            return Err(problem::bad_login());
        }

        Ok(())
    }
}

/// Public view of a user record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub province: String,
    pub gender: String,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub grades: std::collections::BTreeMap<String, Vec<String>>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        let role = user.role();
        let rate = user.rate();
        let grades = match user.profile {
            Profile::Tutor { grades, .. } => grades,
            _ => Default::default(),
        };
        UserResponse {
            id: user.id,
            name: user.name,
            role,
            province: user.province,
            gender: match user.gender {
                Gender::Male => "male".to_string(),
                Gender::Female => "female".to_string(),
            },
            rate,
            grades,
        }
    }
}

/// Tutor search filters; unset fields match everything.
#[derive(Debug, Clone, Default, FromForm)]
pub struct TutorQuery {
    pub subject: Option<String>,
    pub province: Option<String>,
    pub gender: Option<String>,
    pub free: bool,
}

impl TutorQuery {
    pub fn matches(&self, tutor: &User) -> bool {
        if tutor.role() != Role::Tutor {
            return false;
        }
        if let Some(subject) = self.subject.as_deref().filter(|s| !s.is_empty()) {
            if !tutor.teaches(subject) {
                return false;
            }
        }
        if let Some(province) = self.province.as_deref().filter(|s| !s.is_empty()) {
            if !tutor.province.eq_ignore_ascii_case(province) {
                return false;
            }
        }
        if let Some(gender) = self.gender.as_deref().filter(|s| !s.is_empty()) {
            if gender.parse::<Gender>().ok() != Some(tutor.gender) {
                return false;
            }
        }
        if self.free && tutor.rate().map(|r| r > 0.0).unwrap_or(false) {
            return false;
        }
        true
    }
}

/// Grade/subject catalog update sent by tutors.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TutorGradesData {
    pub grades: std::collections::BTreeMap<String, Vec<String>>,
}

impl TutorGradesData {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.grades.keys().any(|g| g.trim().is_empty()) {
            return Err(ValidationError::Empty("grade"));
        }
        if self.grades.values().flatten().any(|s| s.trim().is_empty()) {
            return Err(ValidationError::Empty("subject"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(role: &str) -> UserSignupData {
        UserSignupData {
            email: "Sara@Example.com".to_string(),
            name: "Sara Nasser".to_string(),
            password: "s4r4_p4ssword".to_string(),
            role: role.to_string(),
            province: "Irbid".to_string(),
            gender: "female".to_string(),
            grade: Some("Grade 7-9".to_string()),
            rate: None,
        }
    }

    #[test]
    fn valid_signup_passes() {
        let (role, gender) = signup("student").validate().expect("valid signup");
        assert_eq!(role, Role::Student);
        assert_eq!(gender, Gender::Female);
    }

    #[test]
    fn admin_role_cannot_be_requested() {
        assert!(signup("admin").validate().is_err());
    }

    #[test]
    fn short_password_rejected() {
        let mut data = signup("tutor");
        data.password = "short".to_string();
        assert!(data.validate().is_err());
    }

    #[test]
    fn configured_admin_gets_admin_profile() {
        let user = signup("student")
            .into_user(Role::Student, Gender::Female, true)
            .expect("hashing works");
        assert_eq!(user.role(), Role::Admin);
        assert_eq!(user.email, "sara@example.com");
    }

    #[test]
    fn tutor_query_filters_on_every_field() {
        let mut tutor = signup("tutor")
            .into_user(Role::Tutor, Gender::Female, false)
            .expect("hashing works");
        tutor.profile = Profile::Tutor {
            rate: Some(10.0),
            grades: [("Grade 10-12".to_string(), vec!["Physics".to_string()])]
                .into_iter()
                .collect(),
        };

        let mut query = TutorQuery::default();
        assert!(query.matches(&tutor));

        query.subject = Some("physics".to_string());
        query.province = Some("irbid".to_string());
        query.gender = Some("female".to_string());
        assert!(query.matches(&tutor));

        query.free = true;
        assert!(!query.matches(&tutor), "paid tutor isn't free");

        query.free = false;
        query.subject = Some("Biology".to_string());
        assert!(!query.matches(&tutor));
    }
}
