use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Output format of a requested report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "report_type", rename_all = "lowercase")]
pub enum ReportType {
    Pdf,
    Json,
    Csv,
}

impl ReportType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportType::Pdf => "pdf",
            ReportType::Json => "json",
            ReportType::Csv => "csv",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "report_status", rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Generated,
    Failed,
}

/// Report row created as a sink of a completed scan. Generation itself is
/// handled outside this service.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct Report {
    pub id: i32,
    pub uuid: Uuid,
    pub scan_id: i32,
    pub name: String,
    pub report_type: ReportType,
    pub status: ReportStatus,
    pub url: Option<String>,
    pub last_downloaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Request body for POST /api/scans/{uuid}/report
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateReportRequest {
    #[serde(default = "default_format")]
    pub format: ReportType,
}

fn default_format() -> ReportType {
    ReportType::Json
}
