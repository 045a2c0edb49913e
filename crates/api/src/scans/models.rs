use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle state of a scan. Transitions are monotonic along
/// pending → running → {completed | failed}; terminal states are absorbing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "scan_status", rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            _ => Err(()),
        }
    }
}

/// Scan profile selected by the user. `default` and `deep` carry canned
/// scanner option sets; `custom` passes the caller's options through.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "scan_type", rename_all = "lowercase")]
pub enum ScanType {
    Default,
    Custom,
    Deep,
}

impl ScanType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanType::Default => "default",
            ScanType::Custom => "custom",
            ScanType::Deep => "deep",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct Scan {
    pub id: i32,
    pub uuid: Uuid,
    pub user_id: i32,
    pub name: String,
    pub scan_type: ScanType,
    pub status: ScanStatus,
    #[schema(value_type = Object)]
    pub parameters: Option<Json<serde_json::Value>>,
    pub output: Option<String>,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Request body for POST /api/scans/start
#[derive(Debug, Deserialize, ToSchema)]
pub struct StartScanRequest {
    pub targets: Vec<String>,
    #[serde(rename = "type")]
    pub scan_type: ScanType,
    #[serde(default)]
    pub scan_options: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StartScanResponse {
    pub scan_uuid: Uuid,
}

/// Webhook body posted by the external scanner on completion.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ScanHookRequest {
    pub scan_id: Uuid,
    #[serde(default = "default_hook_status")]
    pub status: String,
}

fn default_hook_status() -> String {
    "completed".to_string()
}

/// State envelope stored by the external scanner under `scan:{uuid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStateEnvelope {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl ScanStateEnvelope {
    pub fn pending() -> Self {
        Self {
            status: ScanStatus::Pending.as_str().to_string(),
            finished_at: None,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: ScanStatus::Failed.as_str().to_string(),
            finished_at: None,
        }
    }
}

/// Status event published by the watcher on `{uuid}:status` and relayed
/// verbatim to stream clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: ScanStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

const ASSESSMENT_PREFIX: &str = "Assessment no. ";

/// Compose the next scan display name from the user's existing scan names.
///
/// Numbering is a per-user counter over every scan ever created, so names
/// stay unique even after earlier assessments complete.
pub fn next_assessment_name<S: AsRef<str>>(existing: &[S]) -> String {
    let highest = existing
        .iter()
        .filter_map(|name| name.as_ref().strip_prefix(ASSESSMENT_PREFIX))
        .filter_map(|suffix| suffix.trim().parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("{}{}", ASSESSMENT_PREFIX, highest + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            ScanStatus::Pending,
            ScanStatus::Running,
            ScanStatus::Completed,
            ScanStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ScanStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<ScanStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ScanStatus::Pending.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
    }

    #[test]
    fn test_first_assessment_name() {
        let names: Vec<String> = vec![];
        assert_eq!(next_assessment_name(&names), "Assessment no. 1");
    }

    #[test]
    fn test_assessment_numbering_skips_unrelated_names() {
        let names = ["Assessment no. 2", "My custom scan", "Assessment no. 7"];
        assert_eq!(next_assessment_name(&names), "Assessment no. 8");
    }

    #[test]
    fn test_assessment_numbering_ignores_garbage_suffix() {
        let names = ["Assessment no. abc", "Assessment no. 3"];
        assert_eq!(next_assessment_name(&names), "Assessment no. 4");
    }

    #[test]
    fn test_state_envelope_serialization() {
        let pending = serde_json::to_string(&ScanStateEnvelope::pending()).unwrap();
        assert_eq!(pending, r#"{"status":"pending"}"#);

        let parsed: ScanStateEnvelope =
            serde_json::from_str(r#"{"status":"completed","finished_at":"2024-01-01T00:00:00Z"}"#)
                .unwrap();
        assert_eq!(parsed.status, "completed");
        assert!(parsed.finished_at.is_some());
    }
}
