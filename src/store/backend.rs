//! The contract a versioned key-value service must offer to hold secrets.
//!
//! Paths are relative to a mount and use `/` as separator. Listing returns
//! the immediate children of a prefix; children that are themselves
//! prefixes end with `/`.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::BackendError;

/// Flat string document stored at one path.
pub type SecretData = HashMap<String, String>;

#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Confirm the credentials work and the service is able to serve.
    async fn verify_access(&self) -> Result<(), BackendError>;

    /// Make sure `mount` exists as a versioned store. Must succeed when the
    /// mount already exists, including when another process created it
    /// concurrently.
    async fn ensure_mount(&self, mount: &str) -> Result<(), BackendError>;

    /// Latest version of the document at `path`, or `None` if there is none.
    async fn read(&self, mount: &str, path: &str) -> Result<Option<SecretData>, BackendError>;

    /// Immediate children of `prefix`. A prefix with nothing under it yields
    /// an empty list.
    async fn list(&self, mount: &str, prefix: &str) -> Result<Vec<String>, BackendError>;

    /// Store `data` at `path` as a new version and return its number.
    async fn write(&self, mount: &str, path: &str, data: &SecretData) -> Result<u64, BackendError>;
}
