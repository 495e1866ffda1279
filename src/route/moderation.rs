use chrono::Utc;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use crate::data::moderation::{
    group_by_tutor, BanRecord, BanResponse, Report, ReportData, ReportedTutorResponse,
};
use crate::error::{StoreError, ValidationError};
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::store::Store;
use crate::Backend;

fn require_admin(auth: &UserRoleToken) -> Result<(), Problem> {
    if !auth.is_admin() {
        return Err(Problem::new_untyped(
            Status::Forbidden,
            "Only admins can moderate tutors.",
        ));
    }
    Ok(())
}

fn tutor_not_found(id: Uuid) -> Problem {
    Problem::new_untyped(Status::NotFound, "Tutor doesn't exist.")
        .insert("id", id)
        .clone()
}

/// Report a tutor to the admins
#[utoipa::path(
    request_body = ReportData,
    responses(
        (status = 201, description = "Report filed"),
        (status = 400, description = "Empty report", body = Problem),
        (status = 404, description = "No such tutor", body = Problem),
    )
)]
#[post("/reports", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(backend))]
pub async fn report_create(
    data: Json<ReportData>,
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Status, Problem> {
    if auth.role != Role::Student {
        return Err(Problem::new_untyped(
            Status::Forbidden,
            "Only students can report tutors.",
        ));
    }
    let message = data.message.trim();
    if message.is_empty() {
        return Err(ValidationError::Empty("message").into());
    }
    match backend.store().get_user(data.tutor).await? {
        Some(tutor) if tutor.role() == Role::Tutor => {}
        _ => return Err(tutor_not_found(data.tutor)),
    }

    backend
        .store()
        .insert_report(&Report {
            id: Uuid::new_v4(),
            reporter_id: auth.user,
            tutor_id: data.tutor,
            message: message.to_string(),
            created_at: Utc::now(),
        })
        .await?;
    tracing::info!("student {} reported tutor {}", auth.user, data.tutor);

    Ok(Status::Created)
}

/// Reported tutors with their report messages
#[utoipa::path(
    responses(
        (status = 200, description = "Reported tutors", body = Vec<ReportedTutorResponse>),
        (status = 403, description = "Caller isn't an admin", body = Problem),
    )
)]
#[get("/admin/reports")]
#[tracing::instrument(skip(backend))]
pub async fn reported_list(
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<Vec<ReportedTutorResponse>>, Problem> {
    require_admin(&auth)?;

    let reports = backend.store().reports().await?;
    let mut reported = vec![];
    for (tutor_id, messages) in group_by_tutor(&reports) {
        // Deleted accounts keep their reports but aren't listed.
        if let Some(tutor) = backend.store().get_user(tutor_id).await? {
            reported.push(ReportedTutorResponse {
                tutor_id,
                name: tutor.name,
                email: tutor.email,
                messages,
            });
        }
    }

    Ok(Json(reported))
}

/// Ban a tutor from signing in
#[utoipa::path(
    responses(
        (status = 200, description = "Created ban", body = BanResponse),
        (status = 404, description = "No such tutor", body = Problem),
        (status = 409, description = "Tutor is already banned", body = Problem),
    )
)]
#[post("/admin/bans/<tutor>")]
#[tracing::instrument(skip(backend))]
pub async fn ban_create(
    tutor: Uuid,
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<BanResponse>, Problem> {
    require_admin(&auth)?;

    let user = match backend.store().get_user(tutor).await? {
        Some(user) if user.role() == Role::Tutor => user,
        _ => return Err(tutor_not_found(tutor)),
    };

    let ban = BanRecord::new(&user);
    match backend.store().insert_ban(&ban).await {
        Ok(()) => {}
        Err(StoreError::Duplicate) => {
            return Err(Problem::new_untyped(Status::Conflict, "Tutor is already banned.")
                .insert("id", tutor)
                .clone())
        }
        Err(other) => return Err(other.into()),
    }
    backend.feed().disconnect(tutor);
    tracing::info!("admin {} banned tutor {}", auth.user, tutor);

    Ok(Json(ban.into()))
}

/// Lift a ban
#[utoipa::path(
    responses(
        (status = 200, description = "Removed ban", body = BanResponse),
        (status = 404, description = "Tutor isn't banned", body = Problem),
    )
)]
#[delete("/admin/bans/<tutor>")]
#[tracing::instrument(skip(backend))]
pub async fn ban_delete(
    tutor: Uuid,
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<BanResponse>, Problem> {
    require_admin(&auth)?;

    let ban = backend.store().delete_ban(tutor).await?.ok_or_else(|| {
        Problem::new_untyped(Status::NotFound, "Tutor isn't banned.")
            .insert("id", tutor)
            .clone()
    })?;
    tracing::info!("admin {} unbanned tutor {}", auth.user, tutor);

    Ok(Json(ban.into()))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Banned tutors", body = Vec<BanResponse>),
        (status = 403, description = "Caller isn't an admin", body = Problem),
    )
)]
#[get("/admin/bans")]
#[tracing::instrument(skip(backend))]
pub async fn ban_list(
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<Vec<BanResponse>>, Problem> {
    require_admin(&auth)?;

    let bans = backend.store().bans().await?;
    Ok(Json(bans.into_iter().map(Into::into).collect()))
}
