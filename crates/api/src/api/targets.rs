use actix_web::web::{Data, Path};
use actix_web::{HttpResponse, delete, get};
use serde_json::json;
use sqlx::{Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use crate::auth::{AuthenticatedUser, resolve_local_user};
use crate::errors::ApiError;
use crate::storage::postgres::targets;
use crate::targets::models::Target;

#[utoipa::path(
    get,
    path = "/api/targets",
    tag = "Targets",
    responses(
        (status = 200, description = "The caller's targets", body = Vec<Target>),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[get("/api/targets")]
#[tracing::instrument(name = "get_targets", skip(user, pool))]
pub async fn get_targets(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let data = targets::get_targets_for_user(&pool, db_user.id)
        .await
        .map_err(ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(json!({ "data": data })))
}

#[utoipa::path(
    get,
    path = "/api/targets/{target_uuid}",
    tag = "Targets",
    params(("target_uuid" = Uuid, Path, description = "Target UUID")),
    responses(
        (status = 200, description = "Target details", body = Target),
        (status = 404, description = "Target not found"),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[get("/api/targets/{target_uuid}")]
#[tracing::instrument(name = "get_target", skip(user, pool), fields(target_uuid = %path.as_ref()))]
pub async fn get_target(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    path: Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let target = targets::get_target_by_uuid(&pool, db_user.id, path.into_inner())
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("Target not found".to_string()))?;
    Ok(HttpResponse::Ok().json(target))
}

#[utoipa::path(
    delete,
    path = "/api/targets/{target_uuid}",
    tag = "Targets",
    params(("target_uuid" = Uuid, Path, description = "Target UUID")),
    responses(
        (status = 200, description = "Target deleted"),
        (status = 422, description = "Target participates in an active scan"),
        (status = 404, description = "Target not found"),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[delete("/api/targets/{target_uuid}")]
#[tracing::instrument(name = "delete_target", skip(user, pool), fields(target_uuid = %path.as_ref()))]
pub async fn delete_target(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    path: Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let target = targets::get_target_by_uuid(&pool, db_user.id, path.into_inner())
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("Target not found".to_string()))?;

    let active = targets::target_has_active_scans(&pool, target.id)
        .await
        .map_err(ApiError::Internal)?;
    if active {
        return Err(ApiError::InvalidRequest(
            "Cannot delete a target that participates in a pending or running scan".to_string(),
        ));
    }

    targets::delete_target(&pool, db_user.id, target.id)
        .await
        .map_err(ApiError::Internal)?;
    info!(target_uuid = %target.uuid, "target deleted");
    Ok(HttpResponse::Ok().json(json!({ "message": "Target deleted successfully" })))
}
