use std::collections::BTreeMap;

use rocket::serde::json::Json;
use rocket::{Build, Rocket, Route};
use utoipa::OpenApi;

pub mod events;
pub mod moderation;
pub mod reviews;
pub mod rooms;
pub mod sessions;
pub mod tutors;
pub mod users;

use events::*;
use moderation::*;
use reviews::*;
use rooms::*;
use sessions::*;
use tutors::*;
use users::*;

use crate::{
    data::{
        moderation::{BanResponse, ReportData, ReportedTutorResponse},
        review::{ReviewData, ReviewResponse},
        room::{MessageData, MessageResponse, RoomResponse},
        session::{BookingResponse, SessionDraft, SessionResponse, SessionStatus},
        user::db::{TutorGradesData, UserLoginData, UserResponse, UserSignupData},
        user::User,
    },
    resp::{
        jwt::{auth_problem, doc::JWTAuth, UserRoleToken},
        problem::Problem,
    },
    role::Role,
    store::Store,
    Backend,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        user_get,
        user_create,
        user_delete,
        login_submit,
        logout,
        tutor_grades_update,
        tutor_search,
        tutor_catalog,
        session_create,
        session_mine,
        session_get,
        session_book,
        session_complete,
        session_cancel,
        room_list,
        message_list,
        message_send,
        event_stream,
        report_create,
        reported_list,
        ban_create,
        ban_delete,
        ban_list,
        review_list,
        review_create
    ),
    components(schemas(
        Role,
        UserResponse,
        UserLoginData,
        UserSignupData,
        TutorGradesData,
        TutorResponse,
        SessionStatus,
        SessionDraft,
        SessionResponse,
        BookingResponse,
        RoomResponse,
        MessageData,
        MessageResponse,
        ReportData,
        ReportedTutorResponse,
        BanResponse,
        ReviewData,
        ReviewResponse,
        Problem
    )),
    modifiers(&JWTAuth, &V1_PREFIX)
)]
pub struct ApiDocV1;

pub struct PathPrefix(pub &'static str);
static V1_PREFIX: PathPrefix = PathPrefix("/api/v1");

impl utoipa::Modify for PathPrefix {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut new_paths = BTreeMap::new();

        for (path, item) in std::mem::take(&mut openapi.paths.paths) {
            new_paths.insert(self.0.to_string() + path.as_ref(), item);
        }

        openapi.paths.paths = new_paths;
    }
}

/// Record of the authenticated caller.
pub(crate) async fn current_user(backend: &Backend, auth: &UserRoleToken) -> Result<User, Problem> {
    backend
        .store()
        .get_user(auth.user)
        .await?
        .ok_or_else(|| auth_problem("Account no longer exists."))
}

#[get("/openapi.json")]
pub fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}

pub fn api_v1() -> Vec<Route> {
    routes![
        openapi_json,
        user_get,
        user_create,
        user_delete,
        login_submit,
        logout,
        tutor_grades_update,
        tutor_search,
        tutor_catalog,
        session_create,
        session_mine,
        session_get,
        session_book,
        session_complete,
        session_cancel,
        room_list,
        message_list,
        message_send,
        event_stream,
        report_create,
        reported_list,
        ban_create,
        ban_delete,
        ban_list,
        review_list,
        review_create
    ]
}

pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/api/v1", api_v1())
}

#[cfg(test)]
mod tests {
    use rocket::http::Status;

    use super::*;
    use crate::testing;

    #[test]
    fn api_paths_are_prefixed() {
        let doc = ApiDocV1::openapi();
        assert!(doc.paths.paths.contains_key("/api/v1/sessions"));
        assert!(doc
            .paths
            .paths
            .keys()
            .all(|path| path.starts_with("/api/v1/")));
    }

    #[rocket::async_test]
    async fn v1_openapi_document_is_served() {
        let client = testing::client().await;
        let response = client.get("/api/v1/openapi.json").dispatch().await;

        assert_eq!(response.status(), Status::Ok);
        let doc: serde_json::Value = response.into_json().await.unwrap();
        assert!(doc["components"]["schemas"]["SessionResponse"].is_object());
    }
}
