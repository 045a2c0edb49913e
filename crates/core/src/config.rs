//! Centralized configuration management.
//!
//! All configuration is loaded from environment variables at startup.
//! This provides a single source of truth and fails fast if required config is missing.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub kvb: KvbConfig,
    pub server: ServerConfig,
    pub oidc: OidcConfig,
    pub scanner: ScannerConfig,
    pub observability: ObservabilityConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

/// Key-value bus (Redis-compatible) configuration.
/// The bus holds transient scan state, the output ring and the progress
/// cache, and carries the three per-scan pub/sub channels.
#[derive(Debug, Clone)]
pub struct KvbConfig {
    /// Connection URL (e.g., redis://localhost:6379)
    pub url: String,
    /// Optional authentication password
    pub password: Option<String>,
    /// Enable TLS for bus connections
    pub tls_enabled: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub shutdown_timeout_secs: Option<u64>,
    /// Public URL for external access (used for the scanner webhook callback).
    /// If not set, defaults to http://{hostname}:{port}
    pub public_url: Option<String>,
}

/// OIDC provider configuration (bearer-token validation only)
#[derive(Debug, Clone)]
pub struct OidcConfig {
    /// Issuer base URL; discovery metadata is fetched from
    /// {issuer_url}/.well-known/openid-configuration
    pub issuer_url: String,
    /// TTL for the in-process bearer token cache (seconds)
    pub bearer_cache_ttl_secs: u64,
}

/// External scanner service configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// URL of the external scanner's async submission endpoint
    pub submit_url: String,
    /// Connect/request limit for the submission call
    pub submit_timeout: Duration,
}

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub log_format: LogFormat,
}

/// Log format type
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// This should be called once at application startup.
    /// It will fail fast if required configuration is missing.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            kvb: KvbConfig::from_env()?,
            server: ServerConfig::from_env()?,
            oidc: OidcConfig::from_env()?,
            scanner: ScannerConfig::from_env()?,
            observability: ObservabilityConfig::from_env()?,
        })
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("DB_MAX_CONNECTIONS must be a number")?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .context("DB_MIN_CONNECTIONS must be a number")?,
            acquire_timeout: Duration::from_secs(
                env::var("DB_ACQUIRE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("DB_ACQUIRE_TIMEOUT_SECS must be a number")?,
            ),
            idle_timeout: Duration::from_secs(
                env::var("DB_IDLE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .context("DB_IDLE_TIMEOUT_SECS must be a number")?,
            ),
            max_lifetime: Duration::from_secs(
                env::var("DB_MAX_LIFETIME_SECS")
                    .unwrap_or_else(|_| "1800".to_string())
                    .parse()
                    .context("DB_MAX_LIFETIME_SECS must be a number")?,
            ),
        })
    }
}

impl KvbConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("KVB_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            password: env::var("KVB_PASSWORD").ok(),
            tls_enabled: env::var("KVB_TLS_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .context("KVB_TLS_ENABLED must be true or false")?,
        })
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            hostname: env::var("SERVER_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("SERVER_PORT must be a number")?,
            cors_allowed_origins,
            shutdown_timeout_secs: env::var("SERVER_SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .map(|v| {
                    v.parse()
                        .context("SERVER_SHUTDOWN_TIMEOUT_SECS must be a number")
                })
                .transpose()?,
            public_url: env::var("SERVER_PUBLIC_URL").ok(),
        })
    }
}

impl OidcConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            issuer_url: env::var("OIDC_ISSUER_URL").context("OIDC_ISSUER_URL is required")?,
            bearer_cache_ttl_secs: env::var("OIDC_BEARER_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("OIDC_BEARER_CACHE_TTL_SECS must be a number")?,
        })
    }
}

impl ScannerConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            submit_url: env::var("SCANNER_SUBMIT_URL").context("SCANNER_SUBMIT_URL is required")?,
            submit_timeout: Duration::from_secs(
                env::var("SCANNER_SUBMIT_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .context("SCANNER_SUBMIT_TIMEOUT_SECS must be a number")?,
            ),
        })
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Result<Self> {
        let log_format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "pretty".to_string())
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "hostscan".to_string()),
            log_format,
        })
    }
}
