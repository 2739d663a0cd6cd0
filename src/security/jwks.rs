use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::JwkSet;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::AuthError;

#[derive(Debug, Clone)]
struct CachedKeySet {
    keys: Arc<JwkSet>,
    fetched_at: DateTime<Utc>,
}

/// A key set and whether it came from the cache rather than a fresh fetch.
#[derive(Debug, Clone)]
pub struct KeySetSnapshot {
    pub keys: Arc<JwkSet>,
    pub from_cache: bool,
}

/// Client for an identity provider's published JWKS document.
///
/// With a zero TTL every call fetches the document again. With a non-zero
/// TTL the last fetched set is reused until it ages out or until the caller
/// asks for a [`refresh`](Self::refresh) after a key id miss.
#[derive(Debug, Clone)]
pub struct JwksClient {
    url: String,
    ttl: Duration,
    http_client: Client,
    cached: Arc<RwLock<Option<CachedKeySet>>>,
}

impl JwksClient {
    pub fn new(url: impl Into<String>, timeout: Duration, ttl: Duration) -> Result<Self, AuthError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::KeySetUnavailable(format!("creating HTTP client: {e}")))?;

        Ok(Self {
            url: url.into(),
            ttl,
            http_client,
            cached: Arc::new(RwLock::new(None)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Cached set if still fresh, otherwise a newly fetched one.
    pub async fn current(&self) -> Result<KeySetSnapshot, AuthError> {
        if !self.ttl.is_zero() {
            if let Some(cached) = self.cached.read().await.as_ref() {
                if Self::age(cached) < self.ttl {
                    return Ok(KeySetSnapshot {
                        keys: cached.keys.clone(),
                        from_cache: true,
                    });
                }
            }
        }
        let keys = self.refresh().await?;
        Ok(KeySetSnapshot {
            keys,
            from_cache: false,
        })
    }

    /// Fetch the document now and, when caching is on, replace the cached
    /// copy.
    pub async fn refresh(&self) -> Result<Arc<JwkSet>, AuthError> {
        let keys = Arc::new(self.fetch().await?);
        if !self.ttl.is_zero() {
            let mut cached = self.cached.write().await;
            *cached = Some(CachedKeySet {
                keys: keys.clone(),
                fetched_at: Utc::now(),
            });
            debug!(keys = keys.keys.len(), "key set cached");
        }
        Ok(keys)
    }

    /// Time the cached set was fetched, if any.
    pub async fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.cached.read().await.as_ref().map(|c| c.fetched_at)
    }

    fn age(cached: &CachedKeySet) -> Duration {
        (Utc::now() - cached.fetched_at).to_std().unwrap_or_default()
    }

    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        debug!(url = %self.url, "fetching key set");
        let response = self.http_client.get(&self.url).send().await.map_err(|e| {
            warn!(url = %self.url, error = %e, "failed to fetch JWKS");
            AuthError::KeySetUnavailable(e.to_string())
        })?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(url = %self.url, %status, "JWKS endpoint returned an error");
            return Err(AuthError::KeySetUnavailable(format!(
                "JWKS endpoint returned status {status}"
            )));
        }

        response.json::<JwkSet>().await.map_err(|e| {
            warn!(url = %self.url, error = %e, "malformed JWKS document");
            AuthError::KeySetUnavailable(format!("malformed key set: {e}"))
        })
    }
}
