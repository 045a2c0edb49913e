use anyhow::Result;
use sqlx::{Pool, Postgres};

use crate::reports::models::{Report, ReportType};

const CREATE_REPORT_QUERY: &str = r#"
    INSERT INTO reports (scan_id, name, report_type, status)
    VALUES ($1, $2, $3, 'pending')
    RETURNING id, uuid, scan_id, name, report_type, status, url, last_downloaded_at, created_at
"#;

const GET_REPORTS_FOR_USER_QUERY: &str = r#"
    SELECT r.id, r.uuid, r.scan_id, r.name, r.report_type, r.status, r.url, r.last_downloaded_at, r.created_at
    FROM reports r
    JOIN scans s ON s.id = r.scan_id
    WHERE s.user_id = $1
    ORDER BY r.created_at DESC
"#;

pub(crate) async fn create_report(
    pool: &Pool<Postgres>,
    scan_id: i32,
    name: &str,
    report_type: ReportType,
) -> Result<Report> {
    let report = sqlx::query_as::<_, Report>(CREATE_REPORT_QUERY)
        .bind(scan_id)
        .bind(name)
        .bind(report_type)
        .fetch_one(pool)
        .await?;
    Ok(report)
}

pub(crate) async fn get_reports_for_user(
    pool: &Pool<Postgres>,
    user_id: i32,
) -> Result<Vec<Report>> {
    let reports = sqlx::query_as::<_, Report>(GET_REPORTS_FOR_USER_QUERY)
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(reports)
}
