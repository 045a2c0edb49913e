//! Bearer-token validation against the external OIDC provider.
//!
//! The provider's userinfo endpoint is discovered once at startup. Validated
//! tokens are cached in-process, keyed by SHA-256 hash so raw credentials
//! are never retained.

use anyhow::{Context, Result};
use hostscan_core::config::OidcConfig;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Claims we care about from the userinfo response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UserClaims {
    pub sub: String,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Deserialize)]
struct DiscoveryDocument {
    userinfo_endpoint: String,
}

/// L1 cache keyed by token hash → (claims, insert time).
type BearerTokenCache = Arc<RwLock<HashMap<String, (UserClaims, Instant)>>>;

#[derive(Clone)]
pub(crate) struct OidcClient {
    http: reqwest::Client,
    userinfo_endpoint: String,
    cache: BearerTokenCache,
    cache_ttl: Duration,
}

/// Fetch the provider's discovery document and build the client.
pub(crate) async fn initialize_client(config: &OidcConfig) -> Result<OidcClient> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build the OIDC HTTP client")?;

    let discovery_url = format!(
        "{}/.well-known/openid-configuration",
        config.issuer_url.trim_end_matches('/')
    );
    let discovery: DiscoveryDocument = http
        .get(&discovery_url)
        .send()
        .await
        .with_context(|| format!("OIDC discovery request failed: {discovery_url}"))?
        .error_for_status()
        .context("OIDC discovery returned an error status")?
        .json()
        .await
        .context("OIDC discovery document is unreadable")?;

    info!(
        userinfo_endpoint = %discovery.userinfo_endpoint,
        "OIDC discovery complete"
    );

    Ok(OidcClient {
        http,
        userinfo_endpoint: discovery.userinfo_endpoint,
        cache: Arc::new(RwLock::new(HashMap::new())),
        cache_ttl: Duration::from_secs(config.bearer_cache_ttl_secs),
    })
}

/// Hash a bearer token with SHA-256 so raw credentials are never persisted.
fn hash_bearer_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl OidcClient {
    /// Validate a bearer token, returning the caller's claims.
    /// Returns None for invalid tokens and when the provider is unreachable.
    pub(crate) async fn validate_bearer(&self, token: &str) -> Option<UserClaims> {
        let cache_key = hash_bearer_token(token);
        if let Some(claims) = self.cached(&cache_key) {
            return Some(claims);
        }

        let response = match self
            .http
            .get(&self.userinfo_endpoint)
            .bearer_auth(token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "userinfo endpoint unreachable");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(status = %response.status(), "bearer token rejected by provider");
            return None;
        }

        match response.json::<UserClaims>().await {
            Ok(claims) => {
                self.store(cache_key, claims.clone());
                Some(claims)
            }
            Err(e) => {
                warn!(error = %e, "unreadable userinfo response");
                None
            }
        }
    }

    fn cached(&self, cache_key: &str) -> Option<UserClaims> {
        let cache = self.cache.read().ok()?;
        let (claims, inserted_at) = cache.get(cache_key)?;
        if inserted_at.elapsed() < self.cache_ttl {
            Some(claims.clone())
        } else {
            None
        }
    }

    fn store(&self, cache_key: String, claims: UserClaims) {
        if let Ok(mut cache) = self.cache.write() {
            // Drop expired entries while we hold the write lock anyway.
            let ttl = self.cache_ttl;
            cache.retain(|_, (_, inserted_at)| inserted_at.elapsed() < ttl);
            cache.insert(cache_key, (claims, Instant::now()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_hashing_is_stable_and_opaque() {
        let hash = hash_bearer_token("my-secret-token");
        assert_eq!(hash, hash_bearer_token("my-secret-token"));
        assert_ne!(hash, hash_bearer_token("other-token"));
        assert_eq!(hash.len(), 64);
        assert!(!hash.contains("my-secret-token"));
    }
}
