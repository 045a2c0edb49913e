//! External scanner submission client.
//!
//! The scanner runs out-of-process; this client hands it a scan job over
//! HTTP and tells it where to call back when the job finishes. Everything
//! after submission flows through the key-value bus and the webhook.

use anyhow::{Context, Result, bail};
use hostscan_core::config::ScannerConfig;
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub(crate) struct ScannerClient {
    http: reqwest::Client,
    submit_url: String,
    callback_url: String,
}

#[derive(Debug, Serialize)]
struct SubmitPayload<'a> {
    targets: &'a [String],
    scan_type: &'a str,
    scan_id: Uuid,
    scan_options: Option<&'a Value>,
}

impl ScannerClient {
    pub(crate) fn new(config: &ScannerConfig, callback_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.submit_timeout)
            .timeout(config.submit_timeout)
            .build()
            .context("Failed to build the scanner HTTP client")?;

        Ok(Self {
            http,
            submit_url: config.submit_url.clone(),
            callback_url,
        })
    }

    /// Submit a scan job. The scanner acknowledges with 202 Accepted and
    /// reports progress through the bus from then on.
    pub(crate) async fn submit_scan(
        &self,
        scan_id: Uuid,
        targets: &[String],
        scan_type: &str,
        scan_options: Option<&Value>,
    ) -> Result<()> {
        let payload = SubmitPayload {
            targets,
            scan_type,
            scan_id,
            scan_options,
        };

        let response = self
            .http
            .post(&self.submit_url)
            .header("X-Callback-Url", &self.callback_url)
            .json(&payload)
            .send()
            .await
            .context("Scanner submission request failed")?;

        if response.status() != reqwest::StatusCode::ACCEPTED {
            bail!("scanner rejected submission with status {}", response.status());
        }

        info!(%scan_id, target_count = targets.len(), "scan job submitted");
        Ok(())
    }
}
