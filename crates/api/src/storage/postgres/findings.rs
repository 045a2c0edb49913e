use anyhow::Result;
use sqlx::{Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use crate::classifier::DraftFinding;
use crate::findings::models::Finding;

const CLAIM_SCAN_RESULT_QUERY: &str = r#"
    UPDATE scans SET result = $2
    WHERE uuid = $1 AND result IS NULL
    RETURNING id, user_id
"#;

const UPSERT_TARGET_FOR_INGEST_QUERY: &str = r#"
    INSERT INTO targets (user_id, name)
    VALUES ($1, $2)
    ON CONFLICT (user_id, name) DO UPDATE SET name = EXCLUDED.name
    RETURNING id
"#;

const ASSOCIATE_TARGET_FOR_INGEST_QUERY: &str = r#"
    INSERT INTO scan_targets (scan_id, target_id)
    VALUES ($1, $2)
    ON CONFLICT DO NOTHING
"#;

const INSERT_FINDING_QUERY: &str = r#"
    INSERT INTO findings (target_id, name, description, recommendation, port, port_state, protocol, service, os, traceroute, severity)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
"#;

const GET_FINDINGS_FOR_SCAN_QUERY: &str = r#"
    SELECT f.id, f.uuid, f.target_id, f.name, f.description, f.recommendation, f.port, f.port_state, f.protocol, f.service, f.os, f.traceroute, f.severity, f.created_at
    FROM findings f
    JOIN scan_targets st ON st.target_id = f.target_id
    WHERE st.scan_id = $1
    ORDER BY f.id
"#;

const GET_FINDINGS_FOR_USER_QUERY: &str = r#"
    SELECT f.id, f.uuid, f.target_id, f.name, f.description, f.recommendation, f.port, f.port_state, f.protocol, f.service, f.os, f.traceroute, f.severity, f.created_at
    FROM findings f
    JOIN targets t ON t.id = f.target_id
    WHERE t.user_id = $1
    ORDER BY f.created_at DESC
"#;

const GET_FINDING_BY_UUID_QUERY: &str = r#"
    SELECT f.id, f.uuid, f.target_id, f.name, f.description, f.recommendation, f.port, f.port_state, f.protocol, f.service, f.os, f.traceroute, f.severity, f.created_at
    FROM findings f
    JOIN targets t ON t.id = f.target_id
    WHERE f.uuid = $1 AND t.user_id = $2
"#;

const DELETE_FINDING_QUERY: &str = r#"
    DELETE FROM findings f
    USING targets t
    WHERE f.target_id = t.id AND f.uuid = $1 AND t.user_id = $2
"#;

#[derive(sqlx::FromRow)]
struct ClaimedScan {
    id: i32,
    user_id: i32,
}

/// Store the raw result blob and the classified findings for a completed
/// scan in one transaction.
///
/// The `result IS NULL` claim makes ingestion single-shot: a duplicate
/// terminal event (webhook plus watcher poll) finds the column populated and
/// inserts nothing. Targets are resolved under the scan owner and associated
/// with the scan, covering hosts the scanner expanded out of ranges.
pub(crate) async fn ingest_scan_results(
    pool: &Pool<Postgres>,
    scan_uuid: Uuid,
    raw_result: &str,
    drafts: &[DraftFinding],
) -> Result<u64> {
    let mut tx = pool.begin().await?;

    let claimed = sqlx::query_as::<_, ClaimedScan>(CLAIM_SCAN_RESULT_QUERY)
        .bind(scan_uuid)
        .bind(raw_result)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(scan) = claimed else {
        tx.rollback().await?;
        info!(%scan_uuid, "scan results already ingested, skipping");
        return Ok(0);
    };

    let mut inserted = 0u64;
    for draft in drafts {
        let target_id: i32 = sqlx::query_scalar(UPSERT_TARGET_FOR_INGEST_QUERY)
            .bind(scan.user_id)
            .bind(&draft.target_name)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(ASSOCIATE_TARGET_FOR_INGEST_QUERY)
            .bind(scan.id)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(INSERT_FINDING_QUERY)
            .bind(target_id)
            .bind(&draft.name)
            .bind(&draft.description)
            .bind(&draft.recommendation)
            .bind(draft.port)
            .bind(draft.port_state)
            .bind(&draft.protocol)
            .bind(&draft.service)
            .bind(&draft.os)
            .bind(&draft.traceroute)
            .bind(draft.severity)
            .execute(&mut *tx)
            .await?;
        inserted += 1;
    }

    tx.commit().await?;
    Ok(inserted)
}

pub(crate) async fn get_findings_for_scan(
    pool: &Pool<Postgres>,
    scan_id: i32,
) -> Result<Vec<Finding>> {
    let findings = sqlx::query_as::<_, Finding>(GET_FINDINGS_FOR_SCAN_QUERY)
        .bind(scan_id)
        .fetch_all(pool)
        .await?;
    Ok(findings)
}

pub(crate) async fn get_findings_for_user(
    pool: &Pool<Postgres>,
    user_id: i32,
) -> Result<Vec<Finding>> {
    let findings = sqlx::query_as::<_, Finding>(GET_FINDINGS_FOR_USER_QUERY)
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(findings)
}

pub(crate) async fn get_finding_by_uuid(
    pool: &Pool<Postgres>,
    user_id: i32,
    uuid: Uuid,
) -> Result<Option<Finding>> {
    let finding = sqlx::query_as::<_, Finding>(GET_FINDING_BY_UUID_QUERY)
        .bind(uuid)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(finding)
}

pub(crate) async fn delete_finding(
    pool: &Pool<Postgres>,
    user_id: i32,
    uuid: Uuid,
) -> Result<bool> {
    let result = sqlx::query(DELETE_FINDING_QUERY)
        .bind(uuid)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
