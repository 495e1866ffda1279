use chrono::{DateTime, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ValidationError;

pub static REVIEW_COLLECTION_NAME: &str = "reviews";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub tutor_id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub author_id: Uuid,
    pub author_name: String,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReviewData {
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

impl ReviewData {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(1..=5).contains(&self.rating) {
            return Err(ValidationError::RatingOutOfRange(self.rating));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReviewResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl From<Review> for ReviewResponse {
    fn from(r: Review) -> Self {
        ReviewResponse {
            id: r.id,
            author_id: r.author_id,
            author_name: r.author_name,
            rating: r.rating,
            comment: r.comment,
            created_at: r.created_at,
        }
    }
}

pub fn average_rating(reviews: &[Review]) -> Option<f64> {
    if reviews.is_empty() {
        return None;
    }
    let total: u32 = reviews.iter().map(|r| u32::from(r.rating)).sum();
    Some(f64::from(total) / reviews.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratings_outside_one_to_five_are_rejected() {
        for rating in [0, 6] {
            let data = ReviewData {
                rating,
                comment: String::new(),
            };
            assert_eq!(data.validate(), Err(ValidationError::RatingOutOfRange(rating)));
        }
        assert!(ReviewData {
            rating: 5,
            comment: "great".to_string()
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn average_of_no_reviews_is_none() {
        assert_eq!(average_rating(&[]), None);
    }
}
