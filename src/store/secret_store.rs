use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::error::StoreError;
use crate::otp::{clean_secret, derive, is_valid_secret};
use crate::security::Principal;
use crate::store::backend::{SecretBackend, SecretData};

/// Field holding the encoded secret inside each stored document.
pub const SECRET_FIELD: &str = "totp_secret";

/// Default mount name.
pub const DEFAULT_MOUNT: &str = "prod_totp_secrets";

const MAX_NAME_LEN: usize = 50;

/// A stored entry together with its current code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpCode {
    pub name: String,
    pub otp: String,
    pub time_remaining: u64,
}

/// Per-principal TOTP secrets on top of a [`SecretBackend`].
///
/// All principals share one mount; isolation comes from prefixing every
/// path with the principal id.
#[derive(Clone)]
pub struct SecretStore {
    backend: Arc<dyn SecretBackend>,
    mount: String,
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore").field("mount", &self.mount).finish()
    }
}

impl SecretStore {
    /// Check the backend and provision `mount`, failing fast if either step
    /// does not succeed.
    pub async fn connect(
        backend: Arc<dyn SecretBackend>,
        mount: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let mount = mount.into();

        backend.verify_access().await.map_err(|e| {
            error!(error = %e, "secret backend is not usable");
            StoreError::Unavailable(e)
        })?;
        backend.ensure_mount(&mount).await.map_err(|e| {
            error!(mount = %mount, error = %e, "failed to set up KV engine");
            StoreError::Unavailable(e)
        })?;

        info!(mount = %mount, "secret store ready");
        Ok(Self { backend, mount })
    }

    pub fn mount(&self) -> &str {
        &self.mount
    }

    /// Current code for `owner`'s entry `name`, or `None` if it does not
    /// exist.
    pub async fn read_one(&self, owner: &Principal, name: &str) -> Result<Option<TotpCode>, StoreError> {
        self.read_one_at(owner, name, now()).await
    }

    /// [`read_one`](Self::read_one) with an explicit unix time.
    #[instrument(skip(self), fields(mount = %self.mount))]
    pub async fn read_one_at(
        &self,
        owner: &Principal,
        name: &str,
        now: u64,
    ) -> Result<Option<TotpCode>, StoreError> {
        if !is_valid_name(name) {
            return Ok(None);
        }
        let path = entry_path(owner, name);
        let data = self.backend.read(&self.mount, &path).await.map_err(|e| {
            error!(path = %path, error = %e, "error getting TOTP");
            StoreError::ReadFailed(e.to_string())
        })?;

        let Some(secret) = data.as_ref().and_then(|d| d.get(SECRET_FIELD)) else {
            return Ok(None);
        };

        let code = derive(secret, now).map_err(|e| {
            error!(path = %path, error = %e, "stored secret cannot be decoded");
            StoreError::ReadFailed(format!("stored secret for {name} is corrupt"))
        })?;

        Ok(Some(TotpCode {
            name: name.to_string(),
            otp: code.otp,
            time_remaining: code.time_remaining,
        }))
    }

    /// Codes for every entry `owner` has, in listing order.
    pub async fn list_and_read_all(&self, owner: &Principal) -> Result<Vec<TotpCode>, StoreError> {
        self.list_and_read_all_at(owner, now()).await
    }

    /// [`list_and_read_all`](Self::list_and_read_all) with an explicit unix
    /// time.
    #[instrument(skip(self), fields(mount = %self.mount))]
    pub async fn list_and_read_all_at(
        &self,
        owner: &Principal,
        now: u64,
    ) -> Result<Vec<TotpCode>, StoreError> {
        let names = self
            .backend
            .list(&self.mount, owner.as_str())
            .await
            .map_err(|e| {
                error!(error = %e, "error listing TOTPs");
                StoreError::ReadFailed(e.to_string())
            })?;

        let mut codes = Vec::with_capacity(names.len());
        for name in names.iter().filter(|n| !n.is_empty() && !n.ends_with('/')) {
            // entries removed after the listing are skipped
            if let Some(code) = self.read_one_at(owner, name, now).await? {
                codes.push(code);
            }
        }
        debug!(count = codes.len(), "listed TOTPs");
        Ok(codes)
    }

    /// Store `raw_secret` under `name` for `owner`, replacing any previous
    /// value with a new version.
    #[instrument(skip(self, raw_secret), fields(mount = %self.mount))]
    pub async fn write(&self, owner: &Principal, name: &str, raw_secret: &str) -> Result<(), StoreError> {
        let name = name.trim();
        if !is_valid_name(name) {
            return Err(StoreError::InvalidName);
        }

        let cleaned = clean_secret(raw_secret);
        if !is_valid_secret(&cleaned) {
            return Err(StoreError::InvalidSecretFormat);
        }

        let path = entry_path(owner, name);
        let data = SecretData::from([(SECRET_FIELD.to_string(), cleaned)]);
        let version = self
            .backend
            .write(&self.mount, &path, &data)
            .await
            .map_err(|e| {
                error!(path = %path, error = %e, "error creating TOTP");
                StoreError::WriteFailed(e.to_string())
            })?;

        if version > 1 {
            info!(path = %path, version, "TOTP overwritten");
        } else {
            info!(path = %path, "TOTP created");
        }
        Ok(())
    }
}

/// A name must be a single path segment the backend keeps verbatim.
fn is_valid_name(name: &str) -> bool {
    (1..=MAX_NAME_LEN).contains(&name.chars().count())
        && !name.contains('/')
        && name != "."
        && name != ".."
}

fn entry_path(owner: &Principal, name: &str) -> String {
    format!("{}/{}", owner.as_str(), name)
}

fn now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use crate::store::memory::MemoryBackend;

    const SECRET: &str = "JBSWY3DPEHPK3PXP";
    const NOW: u64 = 1_700_000_000;

    async fn store() -> (SecretStore, MemoryBackend) {
        let backend = MemoryBackend::new();
        let store = SecretStore::connect(Arc::new(backend.clone()), "totp").await.unwrap();
        (store, backend)
    }

    fn alice() -> Principal {
        Principal::new("auth0|alice")
    }

    #[tokio::test]
    async fn test_connect_provisions_mount() {
        let (store, backend) = store().await;
        assert_eq!(store.mount(), "totp");
        assert!(backend.has_mount("totp").await);
    }

    #[tokio::test]
    async fn test_connect_fails_when_backend_unavailable() {
        let backend = MemoryBackend::new();
        backend.set_unavailable(true);
        let result = SecretStore::connect(Arc::new(backend.clone()), "totp").await;
        assert!(matches!(result, Err(StoreError::Unavailable(BackendError::Transport(_)))));
        assert!(!backend.has_mount("totp").await);
    }

    #[tokio::test]
    async fn test_connect_twice_reuses_mount() {
        let backend = MemoryBackend::new();
        let first = SecretStore::connect(Arc::new(backend.clone()), "totp").await.unwrap();
        first.write(&alice(), "github", SECRET).await.unwrap();

        let second = SecretStore::connect(Arc::new(backend.clone()), "totp").await.unwrap();
        assert!(second.read_one_at(&alice(), "github", NOW).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let (store, _) = store().await;
        store.write(&alice(), "mytoken", SECRET).await.unwrap();

        let code = store.read_one_at(&alice(), "mytoken", NOW).await.unwrap().unwrap();
        let expected = derive(SECRET, NOW).unwrap();
        assert_eq!(code.name, "mytoken");
        assert_eq!(code.otp, expected.otp);
        assert_eq!(code.time_remaining, expected.time_remaining);
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let (store, _) = store().await;
        assert!(store.read_one(&alice(), "nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_entry_without_secret_field_is_none() {
        let (store, backend) = store().await;
        let doc = SecretData::from([("other".to_string(), "value".to_string())]);
        backend.write("totp", "auth0|alice/odd", &doc).await.unwrap();
        assert!(store.read_one_at(&alice(), "odd", NOW).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_corrupt_secret_is_fault() {
        let (store, backend) = store().await;
        let doc = SecretData::from([(SECRET_FIELD.to_string(), "not base32!".to_string())]);
        backend.write("totp", "auth0|alice/bad", &doc).await.unwrap();
        let err = store.read_one_at(&alice(), "bad", NOW).await.unwrap_err();
        assert!(matches!(err, StoreError::ReadFailed(_)));
    }

    #[tokio::test]
    async fn test_list_for_new_owner_is_empty() {
        let (store, _) = store().await;
        let codes = store.list_and_read_all(&Principal::new("nobody")).await.unwrap();
        assert!(codes.is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_sub_namespaces_and_other_owners() {
        let (store, backend) = store().await;
        store.write(&alice(), "github", SECRET).await.unwrap();
        store.write(&alice(), "email", "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ").await.unwrap();
        store.write(&Principal::new("bob"), "bank", SECRET).await.unwrap();
        let doc = SecretData::from([(SECRET_FIELD.to_string(), SECRET.to_string())]);
        backend.write("totp", "auth0|alice/folder/inner", &doc).await.unwrap();

        let codes = store.list_and_read_all_at(&alice(), NOW).await.unwrap();
        let names: Vec<_> = codes.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["email", "github"]);
    }

    #[tokio::test]
    async fn test_write_trims_name() {
        let (store, _) = store().await;
        store.write(&alice(), "  github  ", SECRET).await.unwrap();
        assert!(store.read_one_at(&alice(), "github", NOW).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_write_rejects_bad_names() {
        let (store, _) = store().await;
        let long = "x".repeat(51);
        assert!(matches!(store.write(&alice(), "", SECRET).await, Err(StoreError::InvalidName)));
        assert!(matches!(store.write(&alice(), "   ", SECRET).await, Err(StoreError::InvalidName)));
        assert!(matches!(store.write(&alice(), &long, SECRET).await, Err(StoreError::InvalidName)));
        assert!(store.write(&alice(), &"x".repeat(50), SECRET).await.is_ok());
    }

    #[tokio::test]
    async fn test_write_rejects_names_that_are_not_one_segment() {
        let (store, backend) = store().await;
        for name in ["work/vpn", "/github", "github/", "..", ".", "../bob/github"] {
            let result = store.write(&alice(), name, SECRET).await;
            assert!(matches!(result, Err(StoreError::InvalidName)), "{name:?}");
        }
        assert!(backend.list("totp", "auth0|alice").await.unwrap().is_empty());
        assert!(store.list_and_read_all_at(&alice(), NOW).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_of_dot_segment_name_is_absent() {
        let (store, _) = store().await;
        store.write(&alice(), "github", SECRET).await.unwrap();
        assert!(store.read_one_at(&alice(), "..", NOW).await.unwrap().is_none());
        assert!(store.read_one_at(&alice(), "x/../github", NOW).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_rejects_bad_secret() {
        let (store, _) = store().await;
        let err = store.write(&alice(), "mytoken", "short").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidSecretFormat));
    }

    #[tokio::test]
    async fn test_write_cleans_secret() {
        let (store, backend) = store().await;
        store.write(&alice(), "spaced", "jbsw y3dp ehpk 3pxp").await.unwrap();
        let stored = backend.read("totp", "auth0|alice/spaced").await.unwrap().unwrap();
        assert_eq!(stored[SECRET_FIELD], SECRET);
    }

    #[tokio::test]
    async fn test_rewrite_overwrites_with_new_version() {
        let (store, backend) = store().await;
        store.write(&alice(), "github", SECRET).await.unwrap();
        store.write(&alice(), "github", "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ").await.unwrap();

        assert_eq!(backend.version_count("totp", "auth0|alice/github").await, 2);
        let code = store.read_one_at(&alice(), "github", 59).await.unwrap().unwrap();
        assert_eq!(code.otp, "287082");
    }

    #[tokio::test]
    async fn test_backend_write_failure_is_fault() {
        let (store, backend) = store().await;
        backend.set_fail_writes(true);
        let err = store.write(&alice(), "github", SECRET).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteFailed(_)));
        assert!(!err.is_client_error());
    }
}
