//! Rule-driven post-processing of the scanner's structured output into
//! typed findings.
//!
//! `classify` is a pure function: the same host records always produce the
//! same finding set, in the same order. Malformed entries never abort the
//! pass; anything that cannot be interpreted is skipped.

pub(crate) mod rules;

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::findings::models::{PortState, Severity};

/// One host entry of the scanner's structured result blob.
///
/// Script outputs are kept in a sorted map so classification order (and with
/// it finding order) is deterministic regardless of producer serialization.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct HostRecord {
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub os_info: Option<Value>,
    #[serde(default)]
    pub traceroute: Option<Value>,
    #[serde(default)]
    pub ports: Vec<PortRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PortRecord {
    #[serde(default)]
    pub port: Option<Value>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient_service")]
    pub service: Option<ServiceRecord>,
    #[serde(default)]
    pub scripts: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ServiceRecord {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Accept any JSON shape for `service`; only an object yields fields.
fn lenient_service<'de, D>(deserializer: D) -> Result<Option<ServiceRecord>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

impl PortRecord {
    /// Port number as an integer, tolerating numeric strings.
    /// Synthetic extraports entries carry no number and are skipped upstream.
    fn port_number(&self) -> Option<i32> {
        match self.port.as_ref()? {
            Value::Number(n) => n.as_i64().and_then(|n| i32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// A classified finding not yet attached to storage rows. `target_name` is
/// the host key (IP address, falling back to hostname) used to resolve the
/// owning target during ingestion.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DraftFinding {
    pub target_name: String,
    pub name: String,
    pub description: String,
    pub recommendation: String,
    pub port: Option<i32>,
    pub port_state: Option<PortState>,
    pub protocol: Option<String>,
    pub service: Option<String>,
    pub os: Option<Value>,
    pub traceroute: Option<String>,
    pub severity: Severity,
}

/// Parse the raw result blob into host records.
/// Elements that fail to parse are dropped with a warning.
pub(crate) fn parse_hosts(raw: &str) -> anyhow::Result<Vec<HostRecord>> {
    let values: Vec<Value> = serde_json::from_str(raw)?;
    let hosts = values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<HostRecord>(value) {
            Ok(host) => Some(host),
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable host record");
                None
            }
        })
        .collect();
    Ok(hosts)
}

/// Classify every host record into findings.
pub(crate) fn classify(hosts: &[HostRecord]) -> Vec<DraftFinding> {
    let mut findings = Vec::new();

    for host in hosts {
        let Some(key) = host_key(host) else {
            continue;
        };

        if let Some(finding) = classify_os(host, key) {
            findings.push(finding);
        }
        if let Some(finding) = classify_traceroute(host, key) {
            findings.push(finding);
        }

        for port in &host.ports {
            classify_port(port, key, &mut findings);
        }
    }

    findings
}

/// The host identifier findings are attached to: the IP address when the
/// scanner resolved one, else the hostname. Hosts with neither are skipped.
fn host_key(host: &HostRecord) -> Option<&str> {
    host.ip_address
        .as_deref()
        .filter(|s| !s.is_empty())
        .or_else(|| host.hostname.as_deref().filter(|s| !s.is_empty()))
}

fn classify_os(host: &HostRecord, key: &str) -> Option<DraftFinding> {
    let os_info = host.os_info.as_ref()?;
    let os_name = os_info.get("name")?.as_str().filter(|s| !s.is_empty())?;
    let (severity, recommendation) = rules::os_rule(os_name);

    Some(DraftFinding {
        target_name: key.to_string(),
        name: format!("{key}-OS"),
        description: format!("Operating system fingerprint: {os_name}"),
        recommendation: recommendation.to_string(),
        port: None,
        port_state: None,
        protocol: None,
        service: None,
        os: Some(os_info.clone()),
        traceroute: None,
        severity,
    })
}

fn classify_traceroute(host: &HostRecord, key: &str) -> Option<DraftFinding> {
    let traceroute = host.traceroute.as_ref()?;

    Some(DraftFinding {
        target_name: key.to_string(),
        name: format!("{key}-Traceroute"),
        description: "Network path to the host as observed by the scanner".to_string(),
        recommendation: rules::TRACEROUTE_RECOMMENDATION.to_string(),
        port: None,
        port_state: None,
        protocol: None,
        service: None,
        os: None,
        traceroute: Some(traceroute.to_string()),
        severity: Severity::Info,
    })
}

fn classify_port(port: &PortRecord, key: &str, findings: &mut Vec<DraftFinding>) {
    // Only open and closed ports are reported; filtered/unknown are noise.
    let state = match port
        .state
        .as_deref()
        .and_then(|s| s.to_lowercase().parse::<PortState>().ok())
    {
        Some(state @ (PortState::Open | PortState::Closed)) => state,
        _ => return,
    };
    let Some(number) = port.port_number() else {
        return;
    };

    let protocol = port
        .protocol
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "tcp".to_string());
    let service_name = port
        .service
        .as_ref()
        .and_then(|s| s.name.clone())
        .filter(|s| !s.is_empty());

    let (severity, recommendation) = if state == PortState::Closed {
        (Severity::Info, rules::CLOSED_PORT_RECOMMENDATION)
    } else {
        rules::port_rule(number)
    };

    let state_str = if state == PortState::Open {
        "open"
    } else {
        "closed"
    };
    let description = match &service_name {
        Some(service) => format!("Port {number}/{protocol} is {state_str}, running {service}"),
        None => format!("Port {number}/{protocol} is {state_str}"),
    };

    findings.push(DraftFinding {
        target_name: key.to_string(),
        name: format!("{key}:{number}/{protocol}"),
        description,
        recommendation: recommendation.to_string(),
        port: Some(number),
        port_state: Some(state),
        protocol: Some(protocol.clone()),
        service: service_name.clone(),
        os: None,
        traceroute: None,
        severity,
    });

    // BTreeMap iteration keeps script findings in script-id order.
    for (script_id, output) in &port.scripts {
        let text = match output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let (severity, recommendation) = rules::script_rule(script_id).evaluate(&text);

        findings.push(DraftFinding {
            target_name: key.to_string(),
            name: format!("{key}:{number}/{protocol} {script_id}"),
            description: text,
            recommendation,
            port: Some(number),
            port_state: Some(state),
            protocol: Some(protocol.clone()),
            service: service_name.clone(),
            os: None,
            traceroute: None,
            severity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn host_from(value: serde_json::Value) -> HostRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_os_and_traceroute_findings() {
        let host = host_from(json!({
            "ip_address": "1.2.3.4",
            "os_info": {"name": "Windows XP"},
            "ports": [],
            "traceroute": []
        }));

        let findings = classify(&[host]);
        assert_eq!(findings.len(), 2);

        assert_eq!(findings[0].name, "1.2.3.4-OS");
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[1].name, "1.2.3.4-Traceroute");
        assert_eq!(findings[1].severity, Severity::Info);
    }

    #[test]
    fn test_port_and_script_findings() {
        let host = host_from(json!({
            "ip_address": "5.6.7.8",
            "ports": [{
                "port": 443,
                "protocol": "tcp",
                "state": "open",
                "service": {"name": "https"},
                "scripts": {"ssl-enum-ciphers": "TLSv1.0 ciphers include RC4"}
            }]
        }));

        let findings = classify(&[host]);
        assert_eq!(findings.len(), 2);

        let port_finding = &findings[0];
        assert_eq!(port_finding.name, "5.6.7.8:443/tcp");
        assert_eq!(port_finding.severity, Severity::Low);
        assert_eq!(port_finding.port, Some(443));
        assert_eq!(port_finding.port_state, Some(PortState::Open));
        assert_eq!(port_finding.service.as_deref(), Some("https"));

        let script_finding = &findings[1];
        assert_eq!(script_finding.name, "5.6.7.8:443/tcp ssl-enum-ciphers");
        assert_eq!(script_finding.severity, Severity::Medium);
        assert!(script_finding.recommendation.contains("RC4"));
    }

    #[test]
    fn test_closed_port_is_informational() {
        let host = host_from(json!({
            "ip_address": "5.6.7.8",
            "ports": [{"port": 23, "protocol": "tcp", "state": "closed"}]
        }));

        let findings = classify(&[host]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Info);
        assert_eq!(findings[0].recommendation, rules::CLOSED_PORT_RECOMMENDATION);
    }

    #[test]
    fn test_filtered_ports_and_extraports_skipped() {
        let host = host_from(json!({
            "ip_address": "5.6.7.8",
            "ports": [
                {"port": 80, "protocol": "tcp", "state": "filtered"},
                {"port": null, "protocol": "tcp", "state": "open", "count": 994}
            ]
        }));

        assert!(classify(&[host]).is_empty());
    }

    #[test]
    fn test_host_without_identifiers_skipped() {
        let host = host_from(json!({
            "os_info": {"name": "Linux"},
            "ports": [{"port": 22, "protocol": "tcp", "state": "open"}]
        }));

        assert!(classify(&[host]).is_empty());
    }

    #[test]
    fn test_hostname_fallback_as_target_key() {
        let host = host_from(json!({
            "hostname": "example.com",
            "ports": [{"port": 80, "protocol": "tcp", "state": "open"}]
        }));

        let findings = classify(&[host]);
        assert_eq!(findings[0].target_name, "example.com");
        assert_eq!(findings[0].name, "example.com:80/tcp");
    }

    #[test]
    fn test_numeric_string_port_tolerated() {
        let host = host_from(json!({
            "ip_address": "5.6.7.8",
            "ports": [{"port": "8080", "protocol": "tcp", "state": "open"}]
        }));

        let findings = classify(&[host]);
        assert_eq!(findings[0].port, Some(8080));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let make_hosts = || {
            vec![host_from(json!({
                "ip_address": "9.9.9.9",
                "os_info": {"name": "Linux 5.15"},
                "traceroute": [{"ttl": "1", "ipaddr": "10.0.0.1"}],
                "ports": [{
                    "port": 22,
                    "protocol": "tcp",
                    "state": "open",
                    "service": {"name": "ssh"},
                    "scripts": {
                        "ssh-hostkey": "2048 aa:bb",
                        "banner": "SSH-2.0-OpenSSH_8.9"
                    }
                }]
            }))]
        };

        let first = classify(&make_hosts());
        let second = classify(&make_hosts());
        assert_eq!(first, second);

        // OS, traceroute, port, then script findings in sorted script-id order.
        assert_eq!(first[2].name, "9.9.9.9:22/tcp");
        assert_eq!(first[3].name, "9.9.9.9:22/tcp banner");
        assert_eq!(first[4].name, "9.9.9.9:22/tcp ssh-hostkey");
    }

    #[test]
    fn test_parse_hosts_drops_malformed_entries() {
        let raw = r#"[{"ip_address": "1.1.1.1", "ports": []}, 42]"#;
        let hosts = parse_hosts(raw).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].ip_address.as_deref(), Some("1.1.1.1"));
    }

    #[test]
    fn test_parse_hosts_rejects_non_array() {
        assert!(parse_hosts(r#"{"not": "an array"}"#).is_err());
    }
}
