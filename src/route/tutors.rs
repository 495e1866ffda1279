use std::collections::BTreeSet;

use rocket::serde::json::Json;
use rocket::State;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::review::average_rating;
use crate::data::user::db::{TutorQuery, UserResponse};
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::store::Store;
use crate::Backend;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TutorResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub average_rating: Option<f64>,
    pub review_count: usize,
}

/// Search tutors that aren't banned
#[utoipa::path(
    params(
        ("subject" = Option<String>, Query, description = "Subject taught in any grade"),
        ("province" = Option<String>, Query, description = "Tutor's province"),
        ("gender" = Option<String>, Query, description = "`male` or `female`"),
        ("free" = Option<bool>, Query, description = "Only tutors without a rate"),
    ),
    responses((status = 200, description = "Matching tutors", body = Vec<TutorResponse>))
)]
#[get("/tutors?<query..>")]
#[tracing::instrument(skip(backend))]
pub async fn tutor_search(
    query: TutorQuery,
    backend: &State<Backend>,
) -> Result<Json<Vec<TutorResponse>>, Problem> {
    let banned: BTreeSet<Uuid> = backend
        .store()
        .bans()
        .await?
        .into_iter()
        .map(|b| b.tutor_id)
        .collect();

    let mut found = vec![];
    for tutor in backend.store().list_users(Some(Role::Tutor)).await? {
        if banned.contains(&tutor.id) || !query.matches(&tutor) {
            continue;
        }
        let reviews = backend.store().reviews_of(tutor.id).await?;
        found.push(TutorResponse {
            average_rating: average_rating(&reviews),
            review_count: reviews.len(),
            user: tutor.into(),
        });
    }
    tracing::debug!("tutor search matched {} tutor(s)", found.len());

    Ok(Json(found))
}

#[cfg(test)]
mod tests {
    use rocket::http::Status;

    use super::*;
    use crate::data::moderation::BanRecord;
    use crate::testing;

    #[rocket::async_test]
    async fn v1_tutor_search_filters_and_hides_banned() {
        let client = testing::client().await;
        let (math, _) = testing::sign_in(&client, Role::Tutor).await;
        let (banned, _) = testing::sign_in(&client, Role::Tutor).await;
        testing::sign_in(&client, Role::Student).await;
        testing::backend(&client)
            .store()
            .insert_ban(&BanRecord::new(&banned))
            .await
            .unwrap();

        let response = client.get("/api/v1/tutors?subject=math").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let tutors: Vec<TutorResponse> = response.into_json().await.unwrap();
        assert_eq!(tutors.len(), 1);
        assert_eq!(tutors[0].user.id, math.id);
        assert_eq!(tutors[0].average_rating, None);

        let tutors: Vec<TutorResponse> = client
            .get("/api/v1/tutors?subject=history")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert!(tutors.is_empty());

        let tutors: Vec<TutorResponse> = client
            .get("/api/v1/tutors?free=true")
            .dispatch()
            .await
            .into_json()
            .await
            .unwrap();
        assert!(tutors.is_empty(), "sample tutors charge a rate");
    }
}
