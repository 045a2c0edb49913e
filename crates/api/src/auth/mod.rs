pub(crate) mod oidc;

use actix_web::http::header::AUTHORIZATION;
use actix_web::{FromRequest, HttpRequest, dev::Payload, web};
use futures_util::future::LocalBoxFuture;
use sqlx::{Pool, Postgres};

use crate::errors::ApiError;
use crate::storage::postgres::users;
use crate::users::models::User;
use oidc::{OidcClient, UserClaims};

/// The validated caller identity, extracted from the bearer token.
#[derive(Debug, Clone)]
pub(crate) struct AuthenticatedUser {
    pub sub: String,
    pub username: String,
    pub email: Option<String>,
}

impl From<UserClaims> for AuthenticatedUser {
    fn from(claims: UserClaims) -> Self {
        let username = claims
            .preferred_username
            .unwrap_or_else(|| claims.sub.clone());
        Self {
            sub: claims.sub,
            username,
            email: claims.email,
        }
    }
}

/// Extract a Bearer token from the Authorization header, if present.
/// The "Bearer " prefix is optional — a raw token is also accepted.
fn extract_bearer_token(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    if value.len() > 7 && value[..7].eq_ignore_ascii_case("bearer ") {
        Some(value[7..].to_string())
    } else {
        Some(value.to_string())
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let token = extract_bearer_token(req);
        let client = req.app_data::<web::Data<OidcClient>>().cloned();

        Box::pin(async move {
            let token = token.ok_or(ApiError::Unauthorized)?;
            let client = client.ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!("OIDC client missing from app data"))
            })?;
            let claims = client
                .validate_bearer(&token)
                .await
                .ok_or(ApiError::Unauthorized)?;
            Ok(AuthenticatedUser::from(claims))
        })
    }
}

/// Mirror the caller into local storage; first sight creates the row.
pub(crate) async fn resolve_local_user(
    pool: &Pool<Postgres>,
    auth: &AuthenticatedUser,
) -> Result<User, ApiError> {
    let user = users::get_or_create_user(pool, &auth.sub, &auth.username, auth.email.as_deref())
        .await
        .map_err(ApiError::Internal)?;

    if !user.enabled {
        return Err(ApiError::Forbidden("account is disabled".to_string()));
    }
    Ok(user)
}
