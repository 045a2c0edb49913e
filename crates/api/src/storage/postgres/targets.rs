use anyhow::Result;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::targets::models::Target;

const UPSERT_TARGET_QUERY: &str = r#"
    INSERT INTO targets (user_id, name)
    VALUES ($1, $2)
    ON CONFLICT (user_id, name) DO UPDATE SET name = EXCLUDED.name
    RETURNING id, uuid, user_id, name, created_at
"#;

const GET_TARGETS_FOR_USER_QUERY: &str = r#"
    SELECT id, uuid, user_id, name, created_at
    FROM targets
    WHERE user_id = $1
    ORDER BY created_at DESC
"#;

const GET_TARGET_BY_UUID_QUERY: &str = r#"
    SELECT id, uuid, user_id, name, created_at
    FROM targets
    WHERE uuid = $1 AND user_id = $2
"#;

const TARGET_HAS_ACTIVE_SCANS_QUERY: &str = r#"
    SELECT EXISTS (
        SELECT 1
        FROM scan_targets st
        JOIN scans s ON s.id = st.scan_id
        WHERE st.target_id = $1 AND s.status IN ('pending', 'running')
    )
"#;

const DELETE_TARGET_QUERY: &str = r#"
    DELETE FROM targets WHERE id = $1 AND user_id = $2
"#;

/// Resolve the target row for `(user, name)`, creating it on first use.
/// The no-op upsert makes the insert race-free and always returns the row.
pub(crate) async fn get_or_create_target(
    pool: &Pool<Postgres>,
    user_id: i32,
    name: &str,
) -> Result<Target> {
    let target = sqlx::query_as::<_, Target>(UPSERT_TARGET_QUERY)
        .bind(user_id)
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(target)
}

pub(crate) async fn get_targets_for_user(
    pool: &Pool<Postgres>,
    user_id: i32,
) -> Result<Vec<Target>> {
    let targets = sqlx::query_as::<_, Target>(GET_TARGETS_FOR_USER_QUERY)
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(targets)
}

pub(crate) async fn get_target_by_uuid(
    pool: &Pool<Postgres>,
    user_id: i32,
    uuid: Uuid,
) -> Result<Option<Target>> {
    let target = sqlx::query_as::<_, Target>(GET_TARGET_BY_UUID_QUERY)
        .bind(uuid)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(target)
}

pub(crate) async fn target_has_active_scans(pool: &Pool<Postgres>, target_id: i32) -> Result<bool> {
    let active: bool = sqlx::query_scalar(TARGET_HAS_ACTIVE_SCANS_QUERY)
        .bind(target_id)
        .fetch_one(pool)
        .await?;
    Ok(active)
}

pub(crate) async fn delete_target(
    pool: &Pool<Postgres>,
    user_id: i32,
    target_id: i32,
) -> Result<bool> {
    let result = sqlx::query(DELETE_TARGET_QUERY)
        .bind(target_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
