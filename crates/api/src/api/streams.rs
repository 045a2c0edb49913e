use actix_web::web::{Data, Path, Query};
use actix_web::{HttpRequest, HttpResponse, get, web};
use serde::Deserialize;
use sqlx::{Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use crate::auth::{AuthenticatedUser, resolve_local_user};
use crate::errors::ApiError;
use crate::gateway::{self, GatewayContext};
use crate::storage::kvb::KvbClient;
use crate::storage::postgres::scans;

#[derive(Debug, Deserialize)]
pub struct ScanListStreamQuery {
    pub keycloak_uuid: String,
}

#[utoipa::path(
    get,
    path = "/api/scans/ws/{scan_uuid}",
    tag = "Streams",
    params(("scan_uuid" = Uuid, Path, description = "Scan UUID")),
    responses(
        (status = 101, description = "WebSocket stream of progress, status and output frames"),
        (status = 404, description = "Scan not found"),
        (status = 403, description = "Not the scan owner"),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[get("/api/scans/ws/{scan_uuid}")]
#[tracing::instrument(name = "scan_stream", skip(req, stream, user, pool, kvb), fields(scan_uuid = %path.as_ref()))]
pub async fn scan_stream(
    req: HttpRequest,
    stream: web::Payload,
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    kvb: Data<KvbClient>,
    path: Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let scan_uuid = path.into_inner();
    let db_user = resolve_local_user(&pool, &user).await?;

    let scan = scans::get_scan_by_uuid(&pool, scan_uuid)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("Scan not found".to_string()))?;
    if scan.user_id != db_user.id {
        return Err(ApiError::Forbidden(
            "Not authorized to stream this scan".to_string(),
        ));
    }

    let (response, session, msg_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("websocket handshake failed: {e}")))?;

    let ctx = GatewayContext {
        db: pool.get_ref().clone(),
        kvb: kvb.get_ref().clone(),
    };
    actix_web::rt::spawn(gateway::run_scan_stream(session, msg_stream, ctx, scan_uuid));

    Ok(response)
}

#[utoipa::path(
    get,
    path = "/api/scans/ws",
    tag = "Streams",
    params(("keycloak_uuid" = String, Query, description = "OIDC subject of the caller")),
    responses(
        (status = 101, description = "WebSocket stream of scan_update frames for the scan-list page"),
        (status = 403, description = "Subject does not match the caller"),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[get("/api/scans/ws")]
#[tracing::instrument(name = "scan_list_stream", skip(req, stream, user, pool, kvb, query))]
pub async fn scan_list_stream(
    req: HttpRequest,
    stream: web::Payload,
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    kvb: Data<KvbClient>,
    query: Query<ScanListStreamQuery>,
) -> Result<HttpResponse, ApiError> {
    if query.keycloak_uuid != user.sub {
        return Err(ApiError::Forbidden(
            "Cannot stream another user's scans".to_string(),
        ));
    }
    resolve_local_user(&pool, &user).await?;

    let (response, session, msg_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("websocket handshake failed: {e}")))?;
    info!(sub = %user.sub, "scan list stream opened");

    let ctx = GatewayContext {
        db: pool.get_ref().clone(),
        kvb: kvb.get_ref().clone(),
    };
    actix_web::rt::spawn(gateway::run_scan_list_stream(
        session,
        msg_stream,
        ctx,
        user.sub.clone(),
    ));

    Ok(response)
}
