//! Severity and recommendation tables for the finding classifier.
//!
//! Port and OS rules are static lookups. Script rules are either static
//! pairs or custom evaluators over the script's output text.

use chrono::{NaiveDateTime, TimeDelta, Utc};

use crate::findings::models::Severity;

pub(crate) const CLOSED_PORT_RECOMMENDATION: &str = "Port closed; no service listening";

pub(crate) const UNKNOWN_PORT_RECOMMENDATION: &str =
    "Unrecognized service; review whether it is needed and keep it patched";

pub(crate) const TRACEROUTE_RECOMMENDATION: &str =
    "Informational; review the network path for unexpected intermediate hops";

const DEFAULT_SCRIPT_RECOMMENDATION: &str = "Script ran; review its output manually";

/// Classification rule for a single script id.
pub(crate) enum ScriptRule {
    Static(Severity, &'static str),
    Custom(fn(&str) -> (Severity, String)),
}

impl ScriptRule {
    pub(crate) fn evaluate(&self, output: &str) -> (Severity, String) {
        match self {
            ScriptRule::Static(severity, recommendation) => {
                (*severity, (*recommendation).to_string())
            }
            ScriptRule::Custom(evaluate) => evaluate(output),
        }
    }
}

/// Severity and recommendation for a well-known open port.
pub(crate) fn port_rule(port: i32) -> (Severity, &'static str) {
    match port {
        21 => (
            Severity::Medium,
            "FTP transmits credentials in cleartext; switch to SFTP or FTPS",
        ),
        22 => (
            Severity::Medium,
            "SSH: enforce key-based authentication, disable root login, rate-limit attempts",
        ),
        23 => (
            Severity::High,
            "Telnet is cleartext; disable it and use SSH instead",
        ),
        25 => (
            Severity::Medium,
            "SMTP: verify the server is not an open relay and require authentication",
        ),
        80 => (
            Severity::Low,
            "HTTP: redirect to HTTPS and enable HSTS",
        ),
        110 => (
            Severity::Medium,
            "POP3 transmits credentials in cleartext; prefer POP3S on 995",
        ),
        111 => (
            Severity::Medium,
            "rpcbind exposes RPC service mappings; restrict to trusted networks or disable",
        ),
        135 => (
            Severity::High,
            "MSRPC endpoint mapper should not be internet-reachable; block at the perimeter",
        ),
        139 => (
            Severity::Medium,
            "NetBIOS session service; block at the perimeter and prefer SMB over 445",
        ),
        143 => (
            Severity::Medium,
            "IMAP transmits credentials in cleartext; prefer IMAPS on 993 or STARTTLS",
        ),
        443 => (
            Severity::Low,
            "HTTPS: require TLS 1.2 or newer and strong cipher suites",
        ),
        445 => (
            Severity::Medium,
            "SMB: disable SMBv1 and restrict access to trusted networks",
        ),
        465 => (
            Severity::Low,
            "SMTPS: verify certificate validity and modern TLS configuration",
        ),
        563 => (
            Severity::Low,
            "NNTPS: verify certificate validity and modern TLS configuration",
        ),
        587 => (
            Severity::Medium,
            "Mail submission: require authentication and STARTTLS",
        ),
        993 => (
            Severity::Low,
            "IMAPS: verify certificate validity and modern TLS configuration",
        ),
        995 => (
            Severity::Low,
            "POP3S: verify certificate validity and modern TLS configuration",
        ),
        3389 => (
            Severity::High,
            "RDP: restrict source IPs, enforce NLA and multi-factor authentication",
        ),
        _ => (Severity::Low, UNKNOWN_PORT_RECOMMENDATION),
    }
}

/// Operating system families past end-of-support.
const OUTDATED_OS_FAMILIES: &[&str] = &[
    "windows 2000",
    "windows xp",
    "windows vista",
    "windows 7",
    "windows 8",
    "windows server 2003",
    "windows server 2008",
    "windows me",
    "windows 98",
    "windows nt",
];

pub(crate) fn os_rule(os_name: &str) -> (Severity, &'static str) {
    let lowered = os_name.to_lowercase();
    if OUTDATED_OS_FAMILIES
        .iter()
        .any(|family| lowered.contains(family))
    {
        (
            Severity::High,
            "Operating system is past end-of-support; upgrade to a supported release",
        )
    } else {
        (
            Severity::Info,
            "Operating system appears current; keep it patched",
        )
    }
}

/// Rule lookup by script id. Unlisted scripts fall back to an informational
/// static rule.
pub(crate) fn script_rule(script_id: &str) -> ScriptRule {
    match script_id {
        "ssl-cert" => ScriptRule::Custom(classify_ssl_cert),
        "ssl-enum-ciphers" => ScriptRule::Custom(classify_cipher_suites),
        "http-sql-injection" => ScriptRule::Custom(classify_sql_injection),
        "http-server-header" => ScriptRule::Static(
            Severity::Low,
            "Server header reveals software version; strip or genericize the banner",
        ),
        "http-headers" => ScriptRule::Static(
            Severity::Info,
            "Review response headers for missing security headers (CSP, HSTS, X-Frame-Options)",
        ),
        "http-title" => ScriptRule::Static(
            Severity::Info,
            "Informational; confirm the page served is the one intended for exposure",
        ),
        _ => ScriptRule::Static(Severity::Info, DEFAULT_SCRIPT_RECOMMENDATION),
    }
}

fn classify_ssl_cert(output: &str) -> (Severity, String) {
    classify_ssl_cert_at(output, Utc::now().naive_utc())
}

/// Evaluate an ssl-cert script output against the given reference time.
///
/// The scanner emits validity bounds as `Not valid before: <ts>` and
/// `Not valid after:  <ts>` lines, sometimes without a seconds component.
pub(crate) fn classify_ssl_cert_at(output: &str, now: NaiveDateTime) -> (Severity, String) {
    let not_before = extract_cert_date(output, "Not valid before:");
    let not_after = extract_cert_date(output, "Not valid after:");

    let (Some(not_before), Some(not_after)) = (not_before, not_after) else {
        return (
            Severity::Info,
            "Certificate validity dates unreadable; review manually".to_string(),
        );
    };

    if now > not_after {
        (
            Severity::High,
            format!("Certificate expired on {not_after}; renew immediately"),
        )
    } else if not_after.signed_duration_since(now) < TimeDelta::days(30) {
        (
            Severity::Medium,
            format!("Certificate expiring soon ({not_after}); schedule renewal"),
        )
    } else if now >= not_before {
        (
            Severity::Info,
            "Certificate is within its validity window".to_string(),
        )
    } else {
        (
            Severity::Info,
            format!("Certificate not valid before {not_before}; verify issuance"),
        )
    }
}

/// Pull the timestamp following `label` out of the script output and parse
/// it, normalizing timestamps missing the seconds component.
fn extract_cert_date(output: &str, label: &str) -> Option<NaiveDateTime> {
    let line = output.lines().find(|line| line.contains(label))?;
    let raw = line.split(label).nth(1)?.trim();
    let raw = raw.split_whitespace().next()?;

    let normalized = if raw.len() == 16 {
        format!("{raw}:00")
    } else {
        raw.to_string()
    };
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S").ok()
}

fn classify_cipher_suites(output: &str) -> (Severity, String) {
    let lowered = output.to_lowercase();
    if ["rc4", "3des", "md5"]
        .iter()
        .any(|weak| lowered.contains(weak))
    {
        (
            Severity::Medium,
            "Weak cipher suites offered (RC4/3DES/MD5); restrict to modern AEAD ciphers"
                .to_string(),
        )
    } else {
        (
            Severity::Low,
            "Review the offered cipher suites against current best practice".to_string(),
        )
    }
}

fn classify_sql_injection(output: &str) -> (Severity, String) {
    let has_line = |needle: &str| {
        output
            .lines()
            .any(|line| line.to_lowercase().contains(needle))
    };

    if has_line("vulnerable") {
        (
            Severity::Critical,
            "SQL injection reported; sanitize inputs and use parameterized queries".to_string(),
        )
    } else if has_line("possible") {
        (
            Severity::High,
            "Possible SQL injection; investigate the flagged parameters".to_string(),
        )
    } else {
        (
            Severity::High,
            "No SQL injection found; keep input validation in place".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(date: (i32, u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_port_rules_severities() {
        assert_eq!(port_rule(23).0, Severity::High);
        assert_eq!(port_rule(3389).0, Severity::High);
        assert_eq!(port_rule(22).0, Severity::Medium);
        assert_eq!(port_rule(443).0, Severity::Low);
        assert_eq!(port_rule(60000).0, Severity::Low);
        assert_eq!(port_rule(60000).1, UNKNOWN_PORT_RECOMMENDATION);
    }

    #[test]
    fn test_os_rule_outdated_families() {
        assert_eq!(os_rule("Microsoft Windows XP SP3").0, Severity::High);
        assert_eq!(os_rule("Windows Server 2008 R2").0, Severity::High);
        assert_eq!(os_rule("Linux 5.15").0, Severity::Info);
    }

    #[test]
    fn test_ssl_cert_within_window() {
        let output = "Subject: commonName=example.com\n\
                      Not valid before: 2024-01-01T00:00:00\n\
                      Not valid after:  2026-01-01T00:00:00";
        let (severity, _) = classify_ssl_cert_at(output, at((2024, 6, 1)));
        assert_eq!(severity, Severity::Info);
    }

    #[test]
    fn test_ssl_cert_expiring_soon() {
        let output = "Not valid before: 2024-01-01T00:00:00\n\
                      Not valid after:  2024-06-20T00:00:00";
        let (severity, reco) = classify_ssl_cert_at(output, at((2024, 6, 1)));
        assert_eq!(severity, Severity::Medium);
        assert!(reco.contains("expiring soon"));
    }

    #[test]
    fn test_ssl_cert_expired() {
        let output = "Not valid before: 2022-01-01T00:00:00\n\
                      Not valid after:  2023-01-01T00:00:00";
        let (severity, reco) = classify_ssl_cert_at(output, at((2024, 6, 1)));
        assert_eq!(severity, Severity::High);
        assert!(reco.contains("expired"));
    }

    #[test]
    fn test_ssl_cert_missing_seconds_normalized() {
        let output = "Not valid before: 2024-01-01T00:00\n\
                      Not valid after:  2026-01-01T08:30";
        let (severity, _) = classify_ssl_cert_at(output, at((2024, 6, 1)));
        assert_eq!(severity, Severity::Info);
    }

    #[test]
    fn test_ssl_cert_unparseable() {
        let (severity, reco) = classify_ssl_cert_at("no dates here", at((2024, 6, 1)));
        assert_eq!(severity, Severity::Info);
        assert!(reco.contains("review manually"));
    }

    #[test]
    fn test_cipher_suite_rules() {
        let (severity, reco) = classify_cipher_suites("TLSv1.0: ciphers: TLS_RSA_WITH_RC4_128_SHA");
        assert_eq!(severity, Severity::Medium);
        assert!(reco.contains("RC4"));

        let (severity, _) = classify_cipher_suites("TLSv1.3: TLS_AES_256_GCM_SHA384");
        assert_eq!(severity, Severity::Low);
    }

    #[test]
    fn test_sql_injection_rules() {
        assert_eq!(
            classify_sql_injection("/index.php?id=1 looks VULNERABLE to injection").0,
            Severity::Critical
        );
        assert_eq!(
            classify_sql_injection("possible sqli at /search").0,
            Severity::High
        );
        let (severity, reco) = classify_sql_injection("scan complete, nothing found");
        assert_eq!(severity, Severity::High);
        assert!(reco.contains("No SQL injection found"));
    }

    #[test]
    fn test_unlisted_script_defaults_to_info() {
        let (severity, reco) = script_rule("dns-brute").evaluate("some output");
        assert_eq!(severity, Severity::Info);
        assert_eq!(reco, DEFAULT_SCRIPT_RECOMMENDATION);
    }
}
