use actix_web::web::{Data, Json, Path};
use actix_web::{HttpResponse, delete, get, post, web};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{AuthenticatedUser, resolve_local_user};
use crate::errors::ApiError;
use crate::findings::models::Finding;
use crate::reports::models::CreateReportRequest;
use crate::scanner::ScannerClient;
use crate::scans::models::{
    Scan, ScanHookRequest, ScanStateEnvelope, ScanStatus, ScanType, StartScanRequest,
    StartScanResponse, next_assessment_name,
};
use crate::storage::kvb::{KvbClient, keys};
use crate::storage::postgres::{findings, reports, scans, targets};
use crate::targets::models::TargetRef;
use crate::users::models::User;
use crate::watcher::{self, WatcherContext};
use hostscan_core::normalize::clean_targets;

/// Limit on reading and parsing the webhook body.
const WEBHOOK_PARSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, ToSchema)]
pub struct ScanSummary {
    pub uuid: Uuid,
    pub name: String,
    pub status: ScanStatus,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub targets: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScanDetail {
    pub scan_uuid: Uuid,
    pub name: String,
    pub status: ScanStatus,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    #[schema(value_type = Object)]
    pub parameters: Option<Value>,
    pub output: Option<String>,
    #[schema(value_type = Object)]
    pub result: Value,
    pub targets: Vec<TargetRef>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_progress: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FindingWithTarget {
    #[serde(flatten)]
    #[schema(inline)]
    pub finding: Finding,
    pub target: Option<TargetRef>,
}

/// Fetch the scan and enforce ownership in one place.
async fn get_owned_scan(
    pool: &Pool<Postgres>,
    user: &User,
    scan_uuid: Uuid,
) -> Result<Scan, ApiError> {
    let scan = scans::get_scan_by_uuid(pool, scan_uuid)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound("Scan not found".to_string()))?;

    if scan.user_id != user.id {
        return Err(ApiError::Forbidden(
            "Not authorized to access this scan".to_string(),
        ));
    }
    Ok(scan)
}

#[utoipa::path(
    post,
    path = "/api/scans/start",
    tag = "Scans",
    request_body = StartScanRequest,
    responses(
        (status = 200, description = "Scan accepted", body = StartScanResponse),
        (status = 422, description = "Invalid request"),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[post("/api/scans/start")]
#[tracing::instrument(name = "start_scan", skip(user, pool, kvb, scanner, body), fields(scan_type = body.scan_type.as_str()))]
pub async fn start_scan(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    kvb: Data<KvbClient>,
    scanner: Data<ScannerClient>,
    body: Json<StartScanRequest>,
) -> Result<HttpResponse, ApiError> {
    if body.targets.is_empty() {
        return Err(ApiError::InvalidRequest("targets must not be empty".to_string()));
    }

    let db_user = resolve_local_user(&pool, &user).await?;

    let cleaned = clean_targets(&body.targets);
    if cleaned.is_empty() {
        return Err(ApiError::InvalidRequest(
            "no scannable targets left after normalization".to_string(),
        ));
    }

    let mut target_ids = Vec::with_capacity(cleaned.len());
    for name in &cleaned {
        let target = targets::get_or_create_target(&pool, db_user.id, name)
            .await
            .map_err(ApiError::Internal)?;
        target_ids.push(target.id);
    }

    let scan_uuid = Uuid::new_v4();
    let existing_names = scans::get_assessment_names(&pool, db_user.id)
        .await
        .map_err(ApiError::Internal)?;
    let scan_name = next_assessment_name(&existing_names);

    scans::create_scan(
        &pool,
        scan_uuid,
        db_user.id,
        &scan_name,
        body.scan_type,
        body.scan_options.as_ref(),
        &target_ids,
    )
    .await
    .map_err(ApiError::Internal)?;
    info!(%scan_uuid, name = %scan_name, "scan created");

    // Seed the bus state so stream clients and the watcher have a baseline.
    if let Err(e) = kvb
        .set_json(&keys::scan_state(scan_uuid), &ScanStateEnvelope::pending())
        .await
    {
        error!(%scan_uuid, error = ?e, "failed to seed bus state");
    }

    if let Err(e) = scanner
        .submit_scan(
            scan_uuid,
            &cleaned,
            body.scan_type.as_str(),
            body.scan_options.as_ref(),
        )
        .await
    {
        // Submission failure fails the scan, but the uuid is still returned;
        // clients learn the outcome through the status surface.
        error!(%scan_uuid, error = ?e, "scanner submission failed");
        if let Err(bus_err) = kvb
            .set_json(&keys::scan_state(scan_uuid), &ScanStateEnvelope::failed())
            .await
        {
            error!(%scan_uuid, error = ?bus_err, "failed to record failed state on the bus");
        }
        if let Err(db_err) = scans::transition_scan_status(&pool, scan_uuid, ScanStatus::Failed).await
        {
            error!(%scan_uuid, error = ?db_err, "failed to mark scan failed");
        }
    }

    let ctx = WatcherContext {
        db: pool.get_ref().clone(),
        kvb: kvb.get_ref().clone(),
    };
    watcher::spawn_watcher(ctx, scan_uuid);

    Ok(HttpResponse::Ok().json(StartScanResponse { scan_uuid }))
}

#[utoipa::path(
    get,
    path = "/api/scans",
    tag = "Scans",
    responses(
        (status = 200, description = "The caller's scans, newest first", body = Vec<ScanSummary>),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[get("/api/scans")]
#[tracing::instrument(name = "get_scans", skip(user, pool))]
pub async fn get_scans(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let scans_list = scans::get_scans_for_user(&pool, db_user.id)
        .await
        .map_err(ApiError::Internal)?;

    let mut summaries = Vec::with_capacity(scans_list.len());
    for scan in scans_list {
        let scan_targets = scans::get_targets_for_scan(&pool, scan.id)
            .await
            .map_err(ApiError::Internal)?;
        summaries.push(ScanSummary {
            uuid: scan.uuid,
            name: scan.name,
            status: scan.status,
            scan_type: scan.scan_type,
            created_at: scan.created_at,
            started_at: scan.started_at,
            finished_at: scan.finished_at,
            targets: scan_targets.into_iter().map(|t| t.name).collect(),
        });
    }

    Ok(HttpResponse::Ok().json(json!({ "data": summaries })))
}

#[utoipa::path(
    get,
    path = "/api/scans/{scan_uuid}",
    tag = "Scans",
    params(("scan_uuid" = Uuid, Path, description = "Scan UUID")),
    responses(
        (status = 200, description = "Scan details with live progress when running", body = ScanDetail),
        (status = 404, description = "Scan not found"),
        (status = 403, description = "Not the scan owner"),
        (status = 401, description = "Unauthorized"),
    ),
)]
#[get("/api/scans/{scan_uuid}")]
#[tracing::instrument(name = "get_scan", skip(user, pool, kvb), fields(scan_uuid = %path.as_ref()))]
pub async fn get_scan(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    kvb: Data<KvbClient>,
    path: Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let scan = get_owned_scan(&pool, &db_user, path.into_inner()).await?;

    let scan_targets = scans::get_targets_for_scan(&pool, scan.id)
        .await
        .map_err(ApiError::Internal)?;
    let target_refs: Vec<TargetRef> = scan_targets.iter().map(TargetRef::from).collect();

    let result = scan
        .result
        .as_deref()
        .and_then(|raw| match serde_json::from_str::<Value>(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                error!(scan_uuid = %scan.uuid, error = %e, "invalid JSON in stored scan result");
                None
            }
        })
        .unwrap_or_else(|| Value::Array(Vec::new()));

    // Overlay live state from the bus while the scan is in flight; the
    // database copy only becomes authoritative at terminal state.
    let mut current_progress = None;
    let mut output = scan.output.clone();
    if !scan.status.is_terminal() {
        current_progress = kvb
            .get_string(&keys::scan_progress(scan.uuid))
            .await
            .and_then(|p| p.parse::<f64>().ok());
        let live_lines = kvb.list_range(&keys::scan_output(scan.uuid)).await;
        if !live_lines.is_empty() {
            output = Some(live_lines.join("\n"));
        }
    }

    Ok(HttpResponse::Ok().json(ScanDetail {
        scan_uuid: scan.uuid,
        name: scan.name,
        status: scan.status,
        scan_type: scan.scan_type,
        parameters: scan.parameters.map(|p| p.0),
        output,
        result,
        targets: target_refs,
        created_at: scan.created_at,
        started_at: scan.started_at,
        finished_at: scan.finished_at,
        current_progress,
    }))
}

#[utoipa::path(
    get,
    path = "/api/scans/{scan_uuid}/status",
    tag = "Scans",
    params(("scan_uuid" = Uuid, Path, description = "Scan UUID")),
    responses(
        (status = 200, description = "Current scan status"),
        (status = 404, description = "Scan not found"),
        (status = 403, description = "Not the scan owner"),
    ),
)]
#[get("/api/scans/{scan_uuid}/status")]
#[tracing::instrument(name = "get_scan_status", skip(user, pool), fields(scan_uuid = %path.as_ref()))]
pub async fn get_scan_status(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    path: Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let scan = get_owned_scan(&pool, &db_user, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "status": scan.status })))
}

#[utoipa::path(
    get,
    path = "/api/scans/{scan_uuid}/findings",
    tag = "Scans",
    params(("scan_uuid" = Uuid, Path, description = "Scan UUID")),
    responses(
        (status = 200, description = "Findings for the scan's targets", body = Vec<FindingWithTarget>),
        (status = 404, description = "Scan not found"),
        (status = 403, description = "Not the scan owner"),
    ),
)]
#[get("/api/scans/{scan_uuid}/findings")]
#[tracing::instrument(name = "get_scan_findings", skip(user, pool), fields(scan_uuid = %path.as_ref()))]
pub async fn get_scan_findings(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    path: Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let scan = get_owned_scan(&pool, &db_user, path.into_inner()).await?;

    let scan_targets = scans::get_targets_for_scan(&pool, scan.id)
        .await
        .map_err(ApiError::Internal)?;
    let target_refs: std::collections::HashMap<i32, TargetRef> = scan_targets
        .iter()
        .map(|t| (t.id, TargetRef::from(t)))
        .collect();

    let scan_findings = findings::get_findings_for_scan(&pool, scan.id)
        .await
        .map_err(ApiError::Internal)?;
    let data: Vec<FindingWithTarget> = scan_findings
        .into_iter()
        .map(|finding| {
            let target = target_refs.get(&finding.target_id).cloned();
            FindingWithTarget { finding, target }
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({ "data": data })))
}

#[utoipa::path(
    post,
    path = "/api/scans/hook",
    tag = "Scans",
    request_body = ScanHookRequest,
    responses(
        (status = 200, description = "Always 200; errors are reported in the body"),
    ),
)]
#[post("/api/scans/hook")]
#[tracing::instrument(name = "scan_hook", skip(pool, payload))]
pub async fn scan_hook(pool: Data<Pool<Postgres>>, payload: web::Payload) -> HttpResponse {
    // The scanner treats any non-200 as a delivery failure and retries, so
    // every outcome is a 200 with the error in the body.
    let body = match timeout(WEBHOOK_PARSE_TIMEOUT, collect_body(payload)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            error!(error = %e, "failed to read webhook body");
            return HttpResponse::Ok().json(json!({ "error": "Failed to read request body" }));
        }
        Err(_) => {
            error!("timed out reading webhook body");
            return HttpResponse::Ok().json(json!({ "error": "Timed out reading request body" }));
        }
    };

    let hook: ScanHookRequest = match serde_json::from_slice(&body) {
        Ok(hook) => hook,
        Err(e) => {
            error!(error = %e, "failed to parse webhook body");
            return HttpResponse::Ok().json(json!({ "error": "Failed to parse request body" }));
        }
    };
    info!(scan_uuid = %hook.scan_id, status = %hook.status, "webhook received");

    let Ok(status) = hook.status.parse::<ScanStatus>() else {
        return HttpResponse::Ok().json(json!({ "error": "Unknown scan status" }));
    };

    match scans::get_scan_by_uuid(&pool, hook.scan_id).await {
        Ok(Some(_)) => match scans::transition_scan_status(&pool, hook.scan_id, status).await {
            // None means the transition was already applied or absorbed —
            // duplicate deliveries are expected and fine.
            Ok(_) => HttpResponse::Ok().json(json!({ "success": true })),
            Err(e) => {
                error!(scan_uuid = %hook.scan_id, error = ?e, "webhook status update failed");
                HttpResponse::Ok().json(json!({ "error": "Failed to update scan status" }))
            }
        },
        Ok(None) => {
            warn!(scan_uuid = %hook.scan_id, "webhook for unknown scan");
            HttpResponse::Ok().json(json!({ "error": "Scan not found" }))
        }
        Err(e) => {
            error!(error = ?e, "webhook scan lookup failed");
            HttpResponse::Ok().json(json!({ "error": "Database unavailable" }))
        }
    }
}

async fn collect_body(mut payload: web::Payload) -> Result<web::BytesMut, actix_web::Error> {
    let mut bytes = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(bytes)
}

#[utoipa::path(
    delete,
    path = "/api/scans/{scan_uuid}",
    tag = "Scans",
    params(("scan_uuid" = Uuid, Path, description = "Scan UUID")),
    responses(
        (status = 200, description = "Scan deleted"),
        (status = 422, description = "Scan is still pending or running"),
        (status = 404, description = "Scan not found"),
        (status = 403, description = "Not the scan owner"),
    ),
)]
#[delete("/api/scans/{scan_uuid}")]
#[tracing::instrument(name = "delete_scan", skip(user, pool), fields(scan_uuid = %path.as_ref()))]
pub async fn delete_scan(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    path: Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let scan = get_owned_scan(&pool, &db_user, path.into_inner()).await?;

    if !scan.status.is_terminal() {
        return Err(ApiError::InvalidRequest(
            "Cannot delete a running or pending scan".to_string(),
        ));
    }

    scans::delete_scan(&pool, scan.id, db_user.id)
        .await
        .map_err(ApiError::Internal)?;
    info!(scan_uuid = %scan.uuid, "scan deleted");
    Ok(HttpResponse::Ok().json(json!({ "message": "Scan deleted successfully" })))
}

#[utoipa::path(
    post,
    path = "/api/scans/bulk-delete",
    tag = "Scans",
    responses(
        (status = 200, description = "Scans deleted"),
        (status = 422, description = "A scan is still pending or running"),
        (status = 403, description = "A scan belongs to another user"),
    ),
)]
#[post("/api/scans/bulk-delete")]
#[tracing::instrument(name = "bulk_delete_scans", skip(user, pool, body))]
pub async fn bulk_delete_scans(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    body: Json<Vec<Uuid>>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;

    let mut owned = Vec::with_capacity(body.len());
    for scan_uuid in body.iter() {
        let scan = get_owned_scan(&pool, &db_user, *scan_uuid).await?;
        if !scan.status.is_terminal() {
            return Err(ApiError::InvalidRequest(format!(
                "Cannot delete scan {} while it is pending or running",
                scan.uuid
            )));
        }
        owned.push(scan);
    }

    for scan in &owned {
        scans::delete_scan(&pool, scan.id, db_user.id)
            .await
            .map_err(ApiError::Internal)?;
    }
    info!(count = owned.len(), "scans bulk-deleted");
    Ok(HttpResponse::Ok().json(json!({ "message": "Scans deleted successfully" })))
}

#[utoipa::path(
    post,
    path = "/api/scans/{scan_uuid}/report",
    tag = "Scans",
    params(("scan_uuid" = Uuid, Path, description = "Scan UUID")),
    request_body = CreateReportRequest,
    responses(
        (status = 200, description = "Report entry created"),
        (status = 422, description = "Scan is not completed"),
        (status = 404, description = "Scan not found"),
        (status = 403, description = "Not the scan owner"),
    ),
)]
#[post("/api/scans/{scan_uuid}/report")]
#[tracing::instrument(name = "generate_report", skip(user, pool, body), fields(scan_uuid = %path.as_ref()))]
pub async fn generate_report(
    user: AuthenticatedUser,
    pool: Data<Pool<Postgres>>,
    path: Path<Uuid>,
    body: Json<CreateReportRequest>,
) -> Result<HttpResponse, ApiError> {
    let db_user = resolve_local_user(&pool, &user).await?;
    let scan = get_owned_scan(&pool, &db_user, path.into_inner()).await?;

    if scan.status != ScanStatus::Completed {
        return Err(ApiError::InvalidRequest(
            "Cannot generate a report for an incomplete scan".to_string(),
        ));
    }

    let report_name = format!(
        "{} - {} Report",
        scan.name,
        body.format.as_str().to_uppercase()
    );
    let report = reports::create_report(&pool, scan.id, &report_name, body.format)
        .await
        .map_err(ApiError::Internal)?;
    info!(scan_uuid = %scan.uuid, report_uuid = %report.uuid, "report entry created");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Report generation started",
        "report_uuid": report.uuid,
        "format": report.report_type,
    })))
}
