//! In-process [`SecretBackend`] keeping every version in memory.
//!
//! Used by tests and by `serve --memory` for local development. Nothing
//! survives a restart.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::BackendError;
use crate::store::backend::{SecretBackend, SecretData};

type Versions = Vec<SecretData>;

#[derive(Debug, Default)]
struct Inner {
    mounts: HashSet<String>,
    // (mount, path) -> every version written, oldest first
    entries: BTreeMap<(String, String), Versions>,
}

/// Memory-backed store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Inner>>,
    unavailable: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail, as an unreachable server would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make every subsequent write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn has_mount(&self, mount: &str) -> bool {
        self.inner.read().await.mounts.contains(mount)
    }

    /// Number of versions written at `path`.
    pub async fn version_count(&self, mount: &str, path: &str) -> usize {
        self.inner
            .read()
            .await
            .entries
            .get(&(mount.to_string(), path.to_string()))
            .map_or(0, Vec::len)
    }

    fn check_reachable(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Transport("connection refused".to_string()));
        }
        Ok(())
    }

    fn check_mount(inner: &Inner, mount: &str) -> Result<(), BackendError> {
        if inner.mounts.contains(mount) {
            Ok(())
        } else {
            Err(BackendError::Status {
                status: 404,
                body: format!("no handler for route \"{mount}\""),
            })
        }
    }
}

#[async_trait]
impl SecretBackend for MemoryBackend {
    async fn verify_access(&self) -> Result<(), BackendError> {
        self.check_reachable()
    }

    async fn ensure_mount(&self, mount: &str) -> Result<(), BackendError> {
        self.check_reachable()?;
        self.inner.write().await.mounts.insert(mount.to_string());
        Ok(())
    }

    async fn read(&self, mount: &str, path: &str) -> Result<Option<SecretData>, BackendError> {
        self.check_reachable()?;
        let inner = self.inner.read().await;
        Self::check_mount(&inner, mount)?;
        Ok(inner
            .entries
            .get(&(mount.to_string(), path.to_string()))
            .and_then(|versions| versions.last().cloned()))
    }

    async fn list(&self, mount: &str, prefix: &str) -> Result<Vec<String>, BackendError> {
        self.check_reachable()?;
        let inner = self.inner.read().await;
        Self::check_mount(&inner, mount)?;

        let wanted = format!("{}/", prefix.trim_end_matches('/'));
        let children: BTreeSet<String> = inner
            .entries
            .keys()
            .filter(|(m, _)| m == mount)
            .filter_map(|(_, path)| path.strip_prefix(&wanted))
            .map(|rest| match rest.split_once('/') {
                Some((dir, _)) => format!("{dir}/"),
                None => rest.to_string(),
            })
            .collect();
        Ok(children.into_iter().collect())
    }

    async fn write(&self, mount: &str, path: &str, data: &SecretData) -> Result<u64, BackendError> {
        self.check_reachable()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Status {
                status: 500,
                body: "write rejected".to_string(),
            });
        }
        let mut inner = self.inner.write().await;
        Self::check_mount(&inner, mount)?;
        let versions = inner
            .entries
            .entry((mount.to_string(), path.to_string()))
            .or_default();
        versions.push(data.clone());
        Ok(versions.len() as u64)
    }
}
