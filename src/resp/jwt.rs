use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rocket::http::{Cookie, CookieJar, Status};
use rocket::outcome::Outcome::{Error, Success};
use rocket::request::{self, FromRequest, Request};
use rocket::time::OffsetDateTime;
use uuid::Uuid;

use crate::data::user::User;
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::security::Security;
use crate::util::date_time_as_unix_seconds;

pub static AUTH_COOKIE_NAME: &str = "jwt_auth";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleToken {
    #[serde(with = "date_time_as_unix_seconds")]
    iat: DateTime<Utc>,
    #[serde(with = "date_time_as_unix_seconds")]
    exp: DateTime<Utc>,
    pub user: Uuid,
    pub role: Role,
}

impl UserRoleToken {
    pub fn new(user: &User) -> UserRoleToken {
        let now = Utc::now();
        UserRoleToken {
            iat: now,
            exp: now + Duration::weeks(1),
            user: user.id,
            role: user.role(),
        }
    }

    pub fn encode_jwt(
        &self,
        private_key: impl AsRef<[u8]>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let header = Header::new(Algorithm::PS256);
        let key = EncodingKey::from_rsa_pem(private_key.as_ref())?;

        encode(&header, &self, &key)
    }

    pub fn cookie(
        &self,
        private_key: impl AsRef<[u8]>,
    ) -> Result<Cookie<'static>, jsonwebtoken::errors::Error> {
        Ok(Cookie::build((AUTH_COOKIE_NAME, self.encode_jwt(private_key)?))
            .secure(true)
            .expires(OffsetDateTime::from_unix_timestamp(self.exp.timestamp()).ok())
            .path("/")
            .http_only(true)
            .build())
    }

    pub fn is_admin(&self) -> bool {
        self.role.can_moderate()
    }
}

pub fn auth_problem(detail: impl ToString) -> Problem {
    Problem::new_untyped(Status::Unauthorized, "Unable to authorize user.")
        .detail(detail)
        .clone()
}

pub fn extract_claims(
    cookies: &CookieJar,
    public_key: impl AsRef<[u8]>,
) -> Result<UserRoleToken, Problem> {
    let token = match cookies.get(AUTH_COOKIE_NAME) {
        Some(jwt) => jwt.value().to_owned(),
        None => {
            return Err(auth_problem("No JWT auth cookie."));
        }
    };
    tracing::debug!("extracted jwt auth from cookie");

    let key = DecodingKey::from_rsa_pem(public_key.as_ref()).map_err(|e| {
        tracing::error!("user auth public key isn't valid: {}", e);
        Problem::from(e)
    })?;

    match decode::<UserRoleToken>(&token, &key, &Validation::new(Algorithm::PS256)) {
        Ok(data) => {
            tracing::debug!("decoded user role token for user: {}", data.claims.user);
            Ok(data.claims)
        }
        Err(_) => Err(auth_problem("JWT cookie was malformed.")),
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserRoleToken {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let security: &Security = match req.rocket().state() {
            Some(it) => it,
            None => {
                tracing::error!("security keys aren't managed by rocket");
                return Error((
                    Status::InternalServerError,
                    Problem::new_untyped(Status::InternalServerError, "Server misconfigured."),
                ));
            }
        };

        tracing::trace!("extracting user role token from request cookies");
        match extract_claims(req.cookies(), &security.jwt_keys.public) {
            Ok(claims) => Success(claims),
            Err(e) => {
                tracing::debug!("unable to extract claims from cookies");
                Error((Status::Unauthorized, e))
            }
        }
    }
}

pub mod doc {
    use utoipa::openapi::security::*;

    #[derive(Clone, Copy)]
    pub struct JWTAuth;

    impl From<JWTAuth> for SecurityScheme {
        fn from(_: JWTAuth) -> Self {
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(
                super::AUTH_COOKIE_NAME,
            )))
        }
    }

    impl utoipa::Modify for JWTAuth {
        fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
            if let Some(c) = openapi.components.as_mut() {
                c.add_security_scheme("jwt", *self)
            }
        }
    }
}

pub trait HasAuthCookie {
    fn get_auth_cookie(&self, public_key: impl AsRef<[u8]>) -> Option<UserRoleToken>;
}

#[cfg(test)]
impl HasAuthCookie for rocket::local::asynchronous::LocalResponse<'_> {
    fn get_auth_cookie(&self, public_key: impl AsRef<[u8]>) -> Option<UserRoleToken> {
        extract_claims(self.cookies(), public_key).ok()
    }
}
