//! JWKS fetch/refresh and bearer-token validation against the identity
//! provider (spec §4.1 readiness contract: "OIDC provider was
//! successfully initialized"; §6 "Token contract").

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tokio::sync::RwLock;

use kuberde_types::CoreError;

use super::claims::TokenClaims;

const REFRESH_INTERVAL: Duration = Duration::from_secs(300);
const STARTUP_RETRY_ATTEMPTS: usize = 3;
const STARTUP_RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct JwksCache {
    inner: Arc<RwLock<JwkSet>>,
    jwks_url: String,
    http: reqwest::Client,
    /// Issuer check is skipped when the IdP is reached over an internal
    /// DNS alias (spec §6): `expected_issuer` is `None` in that case.
    expected_issuer: Option<String>,
}

impl JwksCache {
    /// Discovers the JWKS endpoint via the OIDC discovery document and
    /// performs the first fetch, retrying up to `STARTUP_RETRY_ATTEMPTS`
    /// times with `STARTUP_RETRY_BACKOFF` between attempts (spec §4.1
    /// failure semantics: "IdP unreachable at startup: retry up to 3x
    /// with 5s backoff; abort if still failing").
    pub async fn init(discovery_base: &str, expected_issuer: Option<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::new();
        let discovery_url = format!("{discovery_base}/.well-known/openid-configuration");

        let mut last_err = None;
        for attempt in 1..=STARTUP_RETRY_ATTEMPTS {
            match Self::fetch_once(&http, &discovery_url).await {
                Ok((jwks_url, jwks)) => {
                    let cache = Self {
                        inner: Arc::new(RwLock::new(jwks)),
                        jwks_url,
                        http,
                        expected_issuer,
                    };
                    cache.spawn_refresh_task();
                    return Ok(cache);
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "failed to initialize OIDC provider");
                    last_err = Some(e);
                    if attempt < STARTUP_RETRY_ATTEMPTS {
                        tokio::time::sleep(STARTUP_RETRY_BACKOFF).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("unknown OIDC init failure")))
    }

    async fn fetch_once(http: &reqwest::Client, discovery_url: &str) -> anyhow::Result<(String, JwkSet)> {
        #[derive(serde::Deserialize)]
        struct Discovery {
            jwks_uri: String,
        }
        let discovery: Discovery = http.get(discovery_url).send().await?.error_for_status()?.json().await?;
        let jwks: JwkSet = http.get(&discovery.jwks_uri).send().await?.error_for_status()?.json().await?;
        Ok((discovery.jwks_uri, jwks))
    }

    fn spawn_refresh_task(&self) {
        let inner = self.inner.clone();
        let http = self.http.clone();
        let jwks_url = self.jwks_url.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(REFRESH_INTERVAL).await;
                match http.get(&jwks_url).send().await.and_then(|r| r.error_for_status()) {
                    Ok(resp) => match resp.json::<JwkSet>().await {
                        Ok(jwks) => *inner.write().await = jwks,
                        Err(e) => tracing::warn!(error = %e, "failed to parse refreshed JWKS"),
                    },
                    Err(e) => tracing::warn!(error = %e, "failed to refresh JWKS; keeping last-known keys"),
                }
            }
        });
    }

    /// Validates a bearer token's signature, expiry, and (when
    /// configured) issuer against the cached JWKS. Does not check
    /// authorization — that's the caller's job (spec §4.1 authorization
    /// rule is identity-specific, not part of generic token validation).
    pub async fn validate(&self, token: &str) -> Result<TokenClaims, CoreError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| CoreError::Unauthorized(format!("malformed token header: {e}")))?;
        let kid = header.kid.ok_or_else(|| CoreError::Unauthorized("token header missing kid".into()))?;

        let jwks = self.inner.read().await;
        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| CoreError::Unauthorized("no matching JWKS key for token".into()))?;
        let decoding_key = DecodingKey::from_jwk(jwk)
            .map_err(|e| CoreError::Unauthorized(format!("unusable JWKS key: {e}")))?;

        let mut validation = Validation::new(header.alg.unwrap_or(Algorithm::RS256));
        validation.validate_exp = true;
        validation.validate_aud = false;
        // Issuer check may be skipped when the IdP is reached via an
        // internal DNS alias (spec §6); signature and expiry checks
        // above are mandatory regardless.
        if let Some(issuer) = &self.expected_issuer {
            validation.set_issuer(&[issuer]);
        }

        let data = decode::<TokenClaims>(token, &decoding_key, &validation)
            .map_err(|e| CoreError::Unauthorized(format!("token validation failed: {e}")))?;
        Ok(data.claims)
    }

    /// Probes the JWKS endpoint directly, independent of the background
    /// refresh cadence, so the readiness check (spec §4.1: "IdP
    /// unreachable at runtime: new connections rejected with 503")
    /// reflects the IdP's current reachability rather than the
    /// last-known-good cache.
    pub async fn healthy(&self) -> bool {
        self.http.get(&self.jwks_url).send().await.map(|r| r.status().is_success()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_always_checks_expiry() {
        let v = Validation::new(Algorithm::RS256);
        assert!(v.validate_exp);
    }
}
