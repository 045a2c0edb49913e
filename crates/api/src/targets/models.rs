use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// A user-owned network endpoint (hostname, public IP, public CIDR or
/// public IP range). Reusable across scans; `(user_id, name)` is unique.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct Target {
    pub id: i32,
    pub uuid: Uuid,
    pub user_id: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Slim target reference embedded in scan responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TargetRef {
    pub uuid: Uuid,
    pub name: String,
}

impl From<&Target> for TargetRef {
    fn from(target: &Target) -> Self {
        Self {
            uuid: target.uuid,
            name: target.name.clone(),
        }
    }
}
