use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::BackendError;
use crate::store::backend::{SecretBackend, SecretData};

/// Vault KV v2 read envelope: `{"data":{"data":{...},"metadata":{...}}}`.
#[derive(Debug, Deserialize)]
struct KvReadResponse {
    #[serde(default)]
    data: KvReadData,
}

#[derive(Debug, Deserialize, Default)]
struct KvReadData {
    #[serde(default)]
    data: Option<HashMap<String, Value>>,
}

/// Vault KV v2 write envelope: `{"data":{"version":3,...}}`.
#[derive(Debug, Deserialize)]
struct KvWriteResponse {
    data: KvVersionMetadata,
}

#[derive(Debug, Deserialize)]
struct KvVersionMetadata {
    version: u64,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    keys: Vec<String>,
}

/// HTTP client for a Vault server's KV v2 engine.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct VaultClient {
    base_url: Url,
    token: String,
    http_client: Client,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

impl VaultClient {
    /// Build a client for `address` (e.g. `https://vault.internal:8200`).
    ///
    /// Every request is bounded by `timeout`. With `skip_tls_verify` the
    /// server certificate is not checked.
    pub fn new(
        address: &str,
        token: impl Into<String>,
        skip_tls_verify: bool,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let base_url = Url::parse(address)
            .map_err(|e| BackendError::Transport(format!("invalid vault address {address}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::Transport(format!(
                "invalid vault address {address}: not a base URL"
            )));
        }

        if skip_tls_verify {
            warn!("Vault TLS certificate verification is DISABLED");
        }

        let http_client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(skip_tls_verify)
            .build()
            .map_err(|e| BackendError::Transport(format!("creating HTTP client: {e}")))?;

        debug!("Vault client initialized with base_url={}", base_url);

        Ok(VaultClient {
            base_url,
            token: token.into(),
            http_client,
        })
    }

    /// `{base}/v1/{segments...}`, each segment percent-encoded.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push("v1")
                .extend(segments.into_iter().filter(|s| !s.is_empty()));
        }
        url
    }

    fn kv_url(&self, mount: &str, area: &str, path: &str) -> Url {
        self.url(std::iter::once(mount).chain(std::iter::once(area)).chain(path.split('/')))
    }

    async fn get(&self, url: Url) -> Result<Response, BackendError> {
        debug!("Vault GET {}", url);
        Ok(self
            .http_client
            .get(url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await?)
    }

    async fn post(&self, url: Url, payload: &Value) -> Result<Response, BackendError> {
        debug!("Vault POST {}", url);
        Ok(self
            .http_client
            .post(url)
            .header("X-Vault-Token", &self.token)
            .json(payload)
            .send()
            .await?)
    }

    async fn status_error(response: Response) -> BackendError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        BackendError::Status { status, body }
    }

    async fn mount_exists(&self, mount: &str) -> Result<bool, BackendError> {
        let response = self.get(self.url(["sys", "mounts"])).await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let body: Value = response.json().await?;
        let key = format!("{}/", mount.trim_matches('/'));
        // newer servers nest the table under "data", older ones return it flat
        let listed = body
            .get("data")
            .and_then(Value::as_object)
            .is_some_and(|table| table.contains_key(&key))
            || body.get(&key).is_some();
        Ok(listed)
    }
}

#[async_trait]
impl SecretBackend for VaultClient {
    async fn verify_access(&self) -> Result<(), BackendError> {
        let response = self.get(self.url(["auth", "token", "lookup-self"])).await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                return Err(BackendError::NotReady(
                    "Vault authentication failed, the token is invalid, expired, or lacks permissions"
                        .to_string(),
                ));
            }
            _ => return Err(Self::status_error(response).await),
        }
        info!("Successfully authenticated with Vault");

        // standby and replication secondaries answer with 429/472/473 but can serve
        let response = self.get(self.url(["sys", "health"])).await?;
        match response.status().as_u16() {
            200 | 429 | 472 | 473 => Ok(()),
            501 => Err(BackendError::NotReady("Vault server is not initialized".to_string())),
            503 => Err(BackendError::NotReady("Vault server is sealed".to_string())),
            _ => Err(Self::status_error(response).await),
        }
    }

    async fn ensure_mount(&self, mount: &str) -> Result<(), BackendError> {
        if self.mount_exists(mount).await? {
            info!("KV engine '{}' is enabled and ready", mount);
            return Ok(());
        }

        info!("Enabling KV v2 secrets engine at path '{}'", mount);
        let payload = json!({
            "type": "kv",
            "options": { "version": "2" }
        });
        let response = self.post(self.url(["sys", "mounts", mount]), &payload).await?;
        if response.status().is_success() {
            info!("KV engine '{}' created", mount);
            return Ok(());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("already in use") {
            debug!("KV engine '{}' was created concurrently", mount);
            return Ok(());
        }
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn read(&self, mount: &str, path: &str) -> Result<Option<SecretData>, BackendError> {
        let response = self.get(self.kv_url(mount, "data", path)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let envelope: KvReadResponse = response.json().await?;
        Ok(envelope.data.data.map(|fields| {
            fields
                .into_iter()
                .filter_map(|(k, v)| match v {
                    Value::String(s) => Some((k, s)),
                    _ => None,
                })
                .collect()
        }))
    }

    async fn list(&self, mount: &str, prefix: &str) -> Result<Vec<String>, BackendError> {
        let mut url = self.kv_url(mount, "metadata", prefix);
        url.query_pairs_mut().append_pair("list", "true");

        let response = self.get(url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            // nothing stored under this prefix yet
            return Ok(vec![]);
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let list_resp: ListResponse = response.json().await?;
        debug!("Found {} keys under {}/{}", list_resp.data.keys.len(), mount, prefix);
        Ok(list_resp.data.keys)
    }

    async fn write(&self, mount: &str, path: &str, data: &SecretData) -> Result<u64, BackendError> {
        let payload = json!({ "data": data });
        let response = self.post(self.kv_url(mount, "data", path), &payload).await?;
        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let written: KvWriteResponse = response.json().await?;
        Ok(written.data.version)
    }
}
