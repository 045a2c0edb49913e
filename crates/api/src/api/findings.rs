use actix_web::web::{Data, Path};
use actix_web::{HttpResponse, delete, get};
use serde_json::json;
use sqlx::{Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use crate::auth::{AuthenticatedUser, resolve_local_user};
use crate::errors::ApiError;
use crate::findings::models::Finding;
use crate::storage::postgres::findings;

#[utoipa::path(
    get,
    path = "/api/findings",
    tag = "Findings",
    responses(
        (status = 200, description = "All findings across the caller's targets", body = Vec<Finding>),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[get("/api/findings")]
#[tracing::instrument(name = "get_findings", skip(user, pool))]
pub async fn get_findings(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let data = findings::get_findings_for_user(&pool, db_user.id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(json!({ "data": data })))
}

#[utoipa::path(
    get,
    path = "/api/findings/{finding_uuid}",
    tag = "Findings",
    params(("finding_uuid" = Uuid, Path, description = "Finding UUID")),
    responses(
        (status = 200, description = "Finding details", body = Finding),
        (status = 404, description = "Finding not found"),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[get("/api/findings/{finding_uuid}")]
#[tracing::instrument(name = "get_finding", skip(user, pool), fields(finding_uuid = %path.as_ref()))]
pub async fn get_finding(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    path: Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let finding = findings::get_finding_by_uuid(&pool, db_user.id, path.into_inner())
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("Finding not found".to_string()))?;
    Ok(HttpResponse::Ok().json(finding))
}

#[utoipa::path(
    delete,
    path = "/api/findings/{finding_uuid}",
    tag = "Findings",
    params(("finding_uuid" = Uuid, Path, description = "Finding UUID")),
    responses(
        (status = 200, description = "Finding deleted"),
        (status = 404, description = "Finding not found"),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[delete("/api/findings/{finding_uuid}")]
#[tracing::instrument(name = "delete_finding", skip(user, pool), fields(finding_uuid = %path.as_ref()))]
pub async fn delete_finding(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    path: Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let finding_uuid = path.into_inner();
    let deleted = findings::delete_finding(&pool, db_user.id, finding_uuid)
        .await
        .map_err(ApiError::Internal)?;

    if !deleted {
        return Err(ApiError::NotFound("Finding not found".to_string()));
    }
    info!(%finding_uuid, "finding deleted");
    Ok(HttpResponse::Ok().json(json!({ "message": "Finding deleted successfully" })))
}
