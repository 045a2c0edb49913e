//! Tracing and log output initialization shared by all binaries.

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::{LogFormat, ObservabilityConfig};

/// Initialize the global tracing subscriber.
///
/// Log level defaults to `info` for the service and `warn` for dependencies,
/// overridable via `RUST_LOG`. Output format (json/pretty) comes from config.
pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,{}=info,hostscan=info,hostscan_core=info",
            config.service_name.replace('-', "_")
        ))
    });

    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().boxed(),
    };

    Registry::default().with(filter).with(fmt_layer).try_init()?;
    Ok(())
}
