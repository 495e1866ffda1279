use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("configuration file not found in '{0}'")]
    NotFound(PathBuf),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("missing JWT signing keys in '{0}'")]
    MissingKeys(PathBuf),
    #[error("unable to generate JWT signing keys: {0}")]
    KeyGeneration(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Security(#[from] SecurityError),
    #[error(transparent)]
    Store(#[from] StoreError),

    // External errors
    #[error(transparent)]
    Database(#[from] mongodb::error::Error),
    #[error(transparent)]
    Cors(#[from] rocket_cors::Error),
}

/// Failures of the document store itself, independent of business rules.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another transaction touched the same documents first.
    #[error("concurrent write conflict")]
    WriteConflict,
    #[error("duplicate key")]
    Duplicate,
    #[error(transparent)]
    Database(mongodb::error::Error),
    #[error(transparent)]
    Serialize(#[from] bson::ser::Error),
    #[error(transparent)]
    Deserialize(#[from] bson::de::Error),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(e: mongodb::error::Error) -> Self {
        use mongodb::error::{ErrorKind, WriteFailure};

        if e.contains_label(mongodb::error::TRANSIENT_TRANSACTION_ERROR) {
            return StoreError::WriteConflict;
        }
        if let ErrorKind::Write(WriteFailure::WriteError(we)) = e.kind.as_ref() {
            // E11000 duplicate key
            if we.code == 11000 {
                return StoreError::Duplicate;
            }
        }
        StoreError::Database(e)
    }
}

/// First violated rule of a session draft or user input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("subject is required")]
    MissingSubject,
    #[error("date is required")]
    MissingDate,
    #[error("date '{0}' is not a valid YYYY-MM-DD date")]
    InvalidDate(String),
    #[error("time is required")]
    MissingTime,
    #[error("time '{0}' is not a valid 12-hour time (e.g. 10:00 AM)")]
    InvalidTime(String),
    #[error("duration {0}h must be between 0.5 and 8 hours")]
    DurationOutOfRange(f64),
    #[error("price {0} must be between 0 and 1000")]
    PriceOutOfRange(f64),
    #[error("session must start in the future")]
    NotInFuture,
    #[error("session overlaps existing session {existing}")]
    Overlap { existing: Uuid },
    #[error("rating {0} must be between 1 and 5")]
    RatingOutOfRange(u8),
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    State,
    Forbidden,
    Store,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    State(String),
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LifecycleError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::WriteConflict => {
                LifecycleError::Conflict("record was modified concurrently".to_string())
            }
            other => LifecycleError::Store(other),
        }
    }
}

impl LifecycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LifecycleError::Validation(_) => ErrorKind::Validation,
            LifecycleError::NotFound(_) => ErrorKind::NotFound,
            LifecycleError::Conflict(_) => ErrorKind::Conflict,
            LifecycleError::State(_) => ErrorKind::State,
            LifecycleError::Forbidden(_) => ErrorKind::Forbidden,
            LifecycleError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn not_found(what: impl std::fmt::Display, id: impl std::fmt::Display) -> Self {
        LifecycleError::NotFound(format!("{} '{}'", what, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_conflicts_surface_as_conflicts() {
        let err = LifecycleError::from(StoreError::WriteConflict);
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn validation_messages_name_the_rule() {
        let err = LifecycleError::from(ValidationError::DurationOutOfRange(9.0));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "duration 9h must be between 0.5 and 8 hours");
    }
}
