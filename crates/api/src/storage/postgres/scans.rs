use anyhow::Result;
use serde_json::Value;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::scans::models::{Scan, ScanStatus, ScanType};
use crate::targets::models::Target;

const CREATE_SCAN_QUERY: &str = r#"
    INSERT INTO scans (uuid, user_id, name, scan_type, status, parameters)
    VALUES ($1, $2, $3, $4, 'pending', $5)
    RETURNING id, uuid, user_id, name, scan_type, status, parameters, output, result, created_at, started_at, finished_at
"#;

const ASSOCIATE_TARGET_QUERY: &str = r#"
    INSERT INTO scan_targets (scan_id, target_id)
    VALUES ($1, $2)
    ON CONFLICT DO NOTHING
"#;

const GET_SCAN_BY_UUID_QUERY: &str = r#"
    SELECT id, uuid, user_id, name, scan_type, status, parameters, output, result, created_at, started_at, finished_at
    FROM scans
    WHERE uuid = $1
"#;

const GET_SCANS_FOR_USER_QUERY: &str = r#"
    SELECT id, uuid, user_id, name, scan_type, status, parameters, output, result, created_at, started_at, finished_at
    FROM scans
    WHERE user_id = $1
    ORDER BY created_at DESC
"#;

const GET_ASSESSMENT_NAMES_QUERY: &str = r#"
    SELECT name FROM scans WHERE user_id = $1 AND name LIKE 'Assessment no. %'
"#;

const GET_TARGETS_FOR_SCAN_QUERY: &str = r#"
    SELECT t.id, t.uuid, t.user_id, t.name, t.created_at
    FROM targets t
    JOIN scan_targets st ON st.target_id = t.id
    WHERE st.scan_id = $1
    ORDER BY t.id
"#;

const GET_STREAMING_SCANS_QUERY: &str = r#"
    SELECT s.id, s.uuid, s.user_id, s.name, s.scan_type, s.status, s.parameters, s.output, s.result, s.created_at, s.started_at, s.finished_at
    FROM scans s
    JOIN users u ON u.id = s.user_id
    WHERE u.oidc_sub = $1 AND s.status NOT IN ('pending', 'completed')
"#;

const GET_ACTIVE_SCAN_UUIDS_QUERY: &str = r#"
    SELECT uuid FROM scans WHERE status IN ('pending', 'running')
"#;

/// Monotonic status transition. Sets `started_at` and `finished_at` exactly
/// once, refuses to leave a terminal state and refuses to move backwards to
/// `pending`. Returns the updated row, or None when the transition was
/// absorbed (already applied, already terminal, or unknown uuid).
const TRANSITION_SCAN_STATUS_QUERY: &str = r#"
    UPDATE scans
    SET status = $2,
        started_at = COALESCE(started_at, NOW()),
        finished_at = CASE
            WHEN finished_at IS NULL AND $2 IN ('completed', 'failed') THEN NOW()
            ELSE finished_at
        END
    WHERE uuid = $1
      AND status NOT IN ('completed', 'failed')
      AND status <> $2
      AND $2 <> 'pending'
    RETURNING id, uuid, user_id, name, scan_type, status, parameters, output, result, created_at, started_at, finished_at
"#;

const SET_SCAN_OUTPUT_QUERY: &str = r#"
    UPDATE scans SET output = $2 WHERE uuid = $1
"#;

const APPEND_SCAN_OUTPUT_QUERY: &str = r#"
    UPDATE scans
    SET output = COALESCE(output, '') || $2
    WHERE uuid = $1 AND status IN ('pending', 'running')
"#;

const DELETE_SCAN_QUERY: &str = r#"
    DELETE FROM scans WHERE id = $1 AND user_id = $2
"#;

/// Insert a pending scan and associate it with its resolved targets.
pub(crate) async fn create_scan(
    pool: &Pool<Postgres>,
    uuid: Uuid,
    user_id: i32,
    name: &str,
    scan_type: ScanType,
    parameters: Option<&Value>,
    target_ids: &[i32],
) -> Result<Scan> {
    let mut tx = pool.begin().await?;

    let scan = sqlx::query_as::<_, Scan>(CREATE_SCAN_QUERY)
        .bind(uuid)
        .bind(user_id)
        .bind(name)
        .bind(scan_type)
        .bind(parameters)
        .fetch_one(&mut *tx)
        .await?;

    for target_id in target_ids {
        sqlx::query(ASSOCIATE_TARGET_QUERY)
            .bind(scan.id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(scan)
}

pub(crate) async fn get_scan_by_uuid(pool: &Pool<Postgres>, uuid: Uuid) -> Result<Option<Scan>> {
    let scan = sqlx::query_as::<_, Scan>(GET_SCAN_BY_UUID_QUERY)
        .bind(uuid)
        .fetch_optional(pool)
        .await?;
    Ok(scan)
}

pub(crate) async fn get_scans_for_user(pool: &Pool<Postgres>, user_id: i32) -> Result<Vec<Scan>> {
    let scans = sqlx::query_as::<_, Scan>(GET_SCANS_FOR_USER_QUERY)
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(scans)
}

/// Names of the user's prior "Assessment no. K" scans, for numbering.
pub(crate) async fn get_assessment_names(
    pool: &Pool<Postgres>,
    user_id: i32,
) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(GET_ASSESSMENT_NAMES_QUERY)
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(names)
}

pub(crate) async fn get_targets_for_scan(
    pool: &Pool<Postgres>,
    scan_id: i32,
) -> Result<Vec<Target>> {
    let targets = sqlx::query_as::<_, Target>(GET_TARGETS_FOR_SCAN_QUERY)
        .bind(scan_id)
        .fetch_all(pool)
        .await?;
    Ok(targets)
}

/// Scans shown on the live scan-list stream: anything the user owns whose
/// status is neither pending nor completed.
pub(crate) async fn get_streaming_scans(
    pool: &Pool<Postgres>,
    oidc_sub: &str,
) -> Result<Vec<Scan>> {
    let scans = sqlx::query_as::<_, Scan>(GET_STREAMING_SCANS_QUERY)
        .bind(oidc_sub)
        .fetch_all(pool)
        .await?;
    Ok(scans)
}

/// Non-terminal scan uuids, used to resume watchers after a restart.
pub(crate) async fn get_active_scan_uuids(pool: &Pool<Postgres>) -> Result<Vec<Uuid>> {
    let uuids: Vec<Uuid> = sqlx::query_scalar(GET_ACTIVE_SCAN_UUIDS_QUERY)
        .fetch_all(pool)
        .await?;
    Ok(uuids)
}

pub(crate) async fn transition_scan_status(
    pool: &Pool<Postgres>,
    uuid: Uuid,
    status: ScanStatus,
) -> Result<Option<Scan>> {
    let scan = sqlx::query_as::<_, Scan>(TRANSITION_SCAN_STATUS_QUERY)
        .bind(uuid)
        .bind(status)
        .fetch_optional(pool)
        .await?;
    Ok(scan)
}

/// Final authoritative output write, performed by the watcher at terminal
/// state. Overwrites any partial output flushed by stream connections.
pub(crate) async fn set_scan_output(
    pool: &Pool<Postgres>,
    uuid: Uuid,
    output: &str,
) -> Result<()> {
    sqlx::query(SET_SCAN_OUTPUT_QUERY)
        .bind(uuid)
        .bind(output)
        .execute(pool)
        .await?;
    Ok(())
}

/// Buffered output append from a stream connection. Only succeeds while the
/// scan is non-terminal; returns false once the row has been frozen.
pub(crate) async fn append_scan_output(
    pool: &Pool<Postgres>,
    uuid: Uuid,
    chunk: &str,
) -> Result<bool> {
    let result = sqlx::query(APPEND_SCAN_OUTPUT_QUERY)
        .bind(uuid)
        .bind(chunk)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn delete_scan(pool: &Pool<Postgres>, scan_id: i32, user_id: i32) -> Result<bool> {
    let result = sqlx::query(DELETE_SCAN_QUERY)
        .bind(scan_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
