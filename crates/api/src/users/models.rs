use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Local mirror of an identity owned by the external OIDC provider.
/// Rows are created on first sight of a valid bearer token.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct User {
    pub id: i32,
    pub oidc_sub: String,
    pub username: String,
    pub email: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}
