use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use super::current_user;
use crate::data::session::{SessionDraft, SessionResponse};
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::Backend;

/// Publish a new bookable session
#[utoipa::path(
    request_body = SessionDraft,
    responses(
        (status = 200, description = "Created session", body = SessionResponse),
        (status = 400, description = "First violated scheduling rule", body = Problem),
        (status = 403, description = "Caller isn't a tutor", body = Problem),
    )
)]
#[post("/sessions", format = "application/json", data = "<draft>")]
#[tracing::instrument(skip(backend))]
pub async fn session_create(
    draft: Json<SessionDraft>,
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<SessionResponse>, Problem> {
    if !auth.role.can_teach() {
        return Err(Problem::new_untyped(
            Status::Forbidden,
            "Only tutors can publish sessions.",
        ));
    }

    let session = backend.create_session(auth.user, &draft).await?;
    Ok(Json(session.into()))
}

/// Sessions of a tutor still open for booking
#[utoipa::path(
    responses(
        (status = 200, description = "Available sessions, earliest first", body = Vec<SessionResponse>),
        (status = 404, description = "No such tutor", body = Problem),
    )
)]
#[get("/tutors/<tutor>/sessions")]
#[tracing::instrument(skip(backend))]
pub async fn tutor_catalog(
    tutor: Uuid,
    backend: &State<Backend>,
) -> Result<Json<Vec<SessionResponse>>, Problem> {
    let sessions = backend.tutor_catalog(tutor).await?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

/// Sessions the caller offers or booked
#[utoipa::path(
    responses((status = 200, description = "Caller's sessions", body = Vec<SessionResponse>))
)]
#[get("/sessions/mine")]
#[tracing::instrument(skip(backend))]
pub async fn session_mine(
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<Vec<SessionResponse>>, Problem> {
    let user = current_user(backend, &auth).await?;
    let sessions = backend.sessions_of(&user).await?;
    Ok(Json(sessions.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Session", body = SessionResponse),
        (status = 404, description = "No such session", body = Problem),
    )
)]
#[get("/sessions/<id>")]
#[tracing::instrument(skip(backend))]
pub async fn session_get(
    id: Uuid,
    _auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<SessionResponse>, Problem> {
    Ok(Json(backend.get_session(id).await?.into()))
}

/// Book an available session of a tutor
#[utoipa::path(
    responses(
        (status = 200, description = "Booked session", body = SessionResponse),
        (status = 404, description = "Tutor or session not found", body = Problem),
        (status = 409, description = "Session is no longer available", body = Problem),
    )
)]
#[post("/tutors/<tutor>/sessions/<id>/book")]
#[tracing::instrument(skip(backend))]
pub async fn session_book(
    tutor: Uuid,
    id: Uuid,
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<SessionResponse>, Problem> {
    let session = backend.book_session(tutor, id, auth.user).await?;
    Ok(Json(session.into()))
}

/// Mark a booked session as held
#[utoipa::path(
    responses(
        (status = 200, description = "Completed session", body = SessionResponse),
        (status = 403, description = "Caller isn't the session's tutor", body = Problem),
        (status = 409, description = "Session isn't booked", body = Problem),
    )
)]
#[post("/sessions/<id>/complete")]
#[tracing::instrument(skip(backend))]
pub async fn session_complete(
    id: Uuid,
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<SessionResponse>, Problem> {
    let session = backend.complete_session(auth.user, id).await?;
    Ok(Json(session.into()))
}

/// Cancel a booking or withdraw an open slot
#[utoipa::path(
    responses(
        (status = 204, description = "Session removed"),
        (status = 403, description = "Caller isn't a participant", body = Problem),
        (status = 409, description = "Session already completed", body = Problem),
    )
)]
#[delete("/sessions/<id>")]
#[tracing::instrument(skip(backend))]
pub async fn session_cancel(
    id: Uuid,
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Status, Problem> {
    backend.cancel_session(auth.user, id).await?;
    Ok(Status::NoContent)
}
