use actix_web::web::Data;
use actix_web::{HttpResponse, get};
use sqlx::{Pool, Postgres};

use crate::auth::{AuthenticatedUser, resolve_local_user};
use crate::errors::ApiError;
use crate::users::models::User;

#[utoipa::path(
    get,
    path = "/api/users/me",
    tag = "Users",
    responses(
        (status = 200, description = "The locally mirrored caller record", body = User),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[get("/api/users/me")]
#[tracing::instrument(name = "get_current_user", skip(user, pool))]
pub async fn get_current_user(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    Ok(HttpResponse::Ok().json(db_user))
}
