use anyhow::Result;
use sqlx::{Pool, Postgres};

use crate::users::models::User;

const UPSERT_USER_QUERY: &str = r#"
    INSERT INTO users (oidc_sub, username, email)
    VALUES ($1, $2, $3)
    ON CONFLICT (oidc_sub) DO UPDATE
    SET username = EXCLUDED.username, email = EXCLUDED.email
    RETURNING id, oidc_sub, username, email, enabled, created_at
"#;

/// Mirror an OIDC identity into local storage, refreshing mutable claims.
pub(crate) async fn get_or_create_user(
    pool: &Pool<Postgres>,
    oidc_sub: &str,
    username: &str,
    email: Option<&str>,
) -> Result<User> {
    let user = sqlx::query_as::<_, User>(UPSERT_USER_QUERY)
        .bind(oidc_sub)
        .bind(username)
        .bind(email)
        .fetch_one(pool)
        .await?;
    Ok(user)
}
