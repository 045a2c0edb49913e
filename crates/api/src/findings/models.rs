use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Severity classification assigned by the finding classifier.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    sqlx::Type,
    ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "severity", rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of a scanned port.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "port_state", rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
    Unknown,
}

impl FromStr for PortState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PortState::Open),
            "closed" => Ok(PortState::Closed),
            "filtered" => Ok(PortState::Filtered),
            _ => Err(()),
        }
    }
}

/// A single interpreted observation about a target, derived from scanner
/// output, carrying a severity and a remediation recommendation.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, ToSchema)]
pub struct Finding {
    pub id: i32,
    pub uuid: Uuid,
    pub target_id: i32,
    pub name: String,
    pub description: String,
    pub recommendation: String,
    pub port: Option<i32>,
    pub port_state: Option<PortState>,
    pub protocol: Option<String>,
    pub service: Option<String>,
    #[schema(value_type = Object)]
    pub os: Option<Json<serde_json::Value>>,
    pub traceroute: Option<String>,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_port_state_parsing() {
        assert_eq!("open".parse::<PortState>().unwrap(), PortState::Open);
        assert_eq!("closed".parse::<PortState>().unwrap(), PortState::Closed);
        assert!("weird".parse::<PortState>().is_err());
    }
}
