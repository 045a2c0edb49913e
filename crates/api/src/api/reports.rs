use actix_web::web::Data;
use actix_web::{HttpResponse, get};
use serde_json::json;
use sqlx::{Pool, Postgres};

use crate::auth::{AuthenticatedUser, resolve_local_user};
use crate::errors::ApiError;
use crate::reports::models::Report;
use crate::storage::postgres::reports;

#[utoipa::path(
    get,
    path = "/api/reports",
    tag = "Reports",
    responses(
        (status = 200, description = "The caller's report entries", body = Vec<Report>),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[get("/api/reports")]
#[tracing::instrument(name = "get_reports", skip(user, pool))]
pub async fn get_reports(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let data = reports::get_reports_for_user(&pool, db_user.id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(json!({ "data": data })))
}
