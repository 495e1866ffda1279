use chrono::Utc;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use super::current_user;
use crate::data::review::{Review, ReviewData, ReviewResponse};
use crate::data::session::SessionStatus;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::store::{SessionQuery, Store};
use crate::Backend;

/// Reviews left for a tutor, oldest first
#[utoipa::path(
    responses((status = 200, description = "Tutor reviews", body = Vec<ReviewResponse>))
)]
#[get("/tutors/<tutor>/reviews")]
#[tracing::instrument(skip(backend))]
pub async fn review_list(
    tutor: Uuid,
    backend: &State<Backend>,
) -> Result<Json<Vec<ReviewResponse>>, Problem> {
    let mut reviews = backend.store().reviews_of(tutor).await?;
    reviews.sort_by_key(|r| r.created_at);
    Ok(Json(reviews.into_iter().map(Into::into).collect()))
}

/// Review a tutor after a held session
#[utoipa::path(
    request_body = ReviewData,
    responses(
        (status = 200, description = "Stored review", body = ReviewResponse),
        (status = 400, description = "Rating outside 1-5", body = Problem),
        (status = 403, description = "No completed session with tutor", body = Problem),
    )
)]
#[post("/tutors/<tutor>/reviews", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(backend))]
pub async fn review_create(
    tutor: Uuid,
    data: Json<ReviewData>,
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<ReviewResponse>, Problem> {
    data.validate()?;

    let author = current_user(backend, &auth).await?;
    if author.role() != Role::Student {
        return Err(Problem::new_untyped(
            Status::Forbidden,
            "Only students can review tutors.",
        ));
    }

    let held = backend
        .store()
        .find_sessions(&SessionQuery::pair(author.id, tutor).with_status(SessionStatus::Completed))
        .await?;
    if held.is_empty() {
        return Err(Problem::new_untyped(
            Status::Forbidden,
            "Reviews require a completed session with the tutor.",
        ));
    }

    let data = data.into_inner();
    let review = Review {
        id: Uuid::new_v4(),
        tutor_id: tutor,
        author_id: author.id,
        author_name: author.name,
        rating: data.rating,
        comment: data.comment.trim().to_string(),
        created_at: Utc::now(),
    };
    backend.store().insert_review(&review).await?;
    tracing::info!("student {} reviewed tutor {}", review.author_id, tutor);

    Ok(Json(review.into()))
}
