use rocket::form::Form;
use rocket::http::{Cookie, CookieJar, Status};
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use super::current_user;
use crate::config::Config;
use crate::data::user::db::problem as user_problem;
use crate::data::user::db::{TutorGradesData, UserLoginData, UserResponse, UserSignupData};
use crate::data::user::Profile;
use crate::error::StoreError;
use crate::resp::jwt::{UserRoleToken, AUTH_COOKIE_NAME};
use crate::resp::problem::Problem;
use crate::security::Security;
use crate::store::Store;
use crate::Backend;

/// Look up a user profile
#[utoipa::path(
    responses(
        (status = 200, description = "User profile", body = UserResponse),
        (status = 404, description = "No such user", body = Problem),
    )
)]
#[get("/user/<id>")]
#[tracing::instrument(skip(backend))]
pub async fn user_get(
    id: Uuid,
    _auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<UserResponse>, Problem> {
    let user = backend
        .store()
        .get_user(id)
        .await?
        .ok_or_else(|| user_problem::not_found(id))?;

    Ok(Json(user.into()))
}

/// Sign up as a student or tutor
#[utoipa::path(
    request_body(content = UserSignupData, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Created user", body = UserResponse),
        (status = 400, description = "Invalid sign up data", body = Problem),
        (status = 409, description = "Email already registered", body = Problem),
    )
)]
#[post("/user", data = "<create_user>")]
#[tracing::instrument(skip(cookies, backend, c, security))]
pub async fn user_create(
    create_user: Form<UserSignupData>,
    cookies: &CookieJar<'_>,
    backend: &State<Backend>,
    c: &State<Config>,
    security: &State<Security>,
) -> Result<Json<UserResponse>, Problem> {
    let (role, gender) = create_user.validate()?;

    let admin = c.is_admin_email(create_user.email.trim());
    let user = create_user
        .into_inner()
        .into_user(role, gender, admin)
        .map_err(|e| {
            tracing::error!("unable to hash password: {}", e);
            Problem::new_untyped(Status::InternalServerError, "Unable to store password.")
        })?;

    match backend.store().insert_user(&user).await {
        Ok(()) => {}
        Err(StoreError::Duplicate) => {
            return Err(user_problem::email_taken(&user.email));
        }
        Err(other) => return Err(other.into()),
    }

    cookies.add(UserRoleToken::new(&user).cookie(&security.jwt_keys.private)?);

    Ok(Json(user.into()))
}

/// Log in with e-mail and password
#[utoipa::path(
    request_body(content = UserLoginData, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Logged in user", body = UserResponse),
        (status = 401, description = "Bad credentials", body = Problem),
        (status = 403, description = "Account is banned", body = Problem),
    )
)]
#[post("/login", data = "<login_user>")]
#[tracing::instrument(skip(cookies, backend, security))]
pub async fn login_submit(
    login_user: Form<UserLoginData>,
    cookies: &CookieJar<'_>,
    backend: &State<Backend>,
    security: &State<Security>,
) -> Result<Json<UserResponse>, Problem> {
    login_user.validate()?;

    let email = login_user.email.trim().to_lowercase();
    if backend.store().find_ban_by_email(&email).await?.is_some() {
        tracing::info!("refused login of banned account {}", email);
        return Err(user_problem::banned());
    }

    let user = backend
        .store()
        .find_user_by_email(&email)
        .await?
        .ok_or_else(user_problem::bad_login)?;

    if !user.pw_hash.verify(&login_user.password) {
        return Err(user_problem::bad_login());
    }

    cookies.add(UserRoleToken::new(&user).cookie(&security.jwt_keys.private)?);

    Ok(Json(user.into()))
}

/// Log out and close every live event stream of the caller
#[utoipa::path(responses((status = 200, description = "Logged out")))]
#[post("/logout")]
#[tracing::instrument(skip(cookies, backend))]
pub async fn logout(auth: UserRoleToken, cookies: &CookieJar<'_>, backend: &State<Backend>) {
    let closed = backend.feed().disconnect(auth.user);
    tracing::debug!("user {} logged out, closed {} stream(s)", auth.user, closed);
    cookies.remove(Cookie::from(AUTH_COOKIE_NAME));
}

/// Delete an account. Users may delete themselves, admins anyone.
#[utoipa::path(
    responses(
        (status = 200, description = "Id of deleted user", body = String),
        (status = 403, description = "Not allowed to delete this user", body = Problem),
        (status = 404, description = "No such user", body = Problem),
    )
)]
#[delete("/user/<id>")]
#[tracing::instrument(skip(cookies, backend))]
pub async fn user_delete(
    id: Uuid,
    auth: UserRoleToken,
    cookies: &CookieJar<'_>,
    backend: &State<Backend>,
) -> Result<String, Problem> {
    if auth.user != id && !auth.is_admin() {
        return Err(Problem::new_untyped(
            Status::Forbidden,
            "Only admins can delete other users.",
        ));
    }

    let removed = backend
        .store()
        .delete_user(id)
        .await?
        .ok_or_else(|| user_problem::not_found(id))?;

    if auth.user == id {
        backend.feed().disconnect(id);
        cookies.remove(Cookie::from(AUTH_COOKIE_NAME));
    }
    Ok(removed.id.to_string())
}

/// Replace the grades and subjects a tutor teaches
#[utoipa::path(
    request_body = TutorGradesData,
    responses(
        (status = 200, description = "Updated tutor", body = UserResponse),
        (status = 403, description = "Caller isn't a tutor", body = Problem),
    )
)]
#[put("/user/grades", format = "application/json", data = "<data>")]
#[tracing::instrument(skip(backend))]
pub async fn tutor_grades_update(
    data: Json<TutorGradesData>,
    auth: UserRoleToken,
    backend: &State<Backend>,
) -> Result<Json<UserResponse>, Problem> {
    data.validate()?;

    let mut user = current_user(backend, &auth).await?;
    match &mut user.profile {
        Profile::Tutor { grades, .. } => *grades = data.into_inner().grades,
        _ => {
            return Err(Problem::new_untyped(
                Status::Forbidden,
                "Only tutors have grades to teach.",
            ))
        }
    }

    if !backend.store().replace_user(&user).await? {
        return Err(user_problem::not_found(user.id));
    }

    Ok(Json(user.into()))
}
