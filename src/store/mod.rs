//! Secret storage: the backend contract, its Vault and in-memory
//! implementations, and the per-principal store built on top.

pub mod backend;
pub mod memory;
pub mod secret_store;
pub mod vault_client;

pub use backend::{SecretBackend, SecretData};
pub use memory::MemoryBackend;
pub use secret_store::{SecretStore, TotpCode, DEFAULT_MOUNT, SECRET_FIELD};
pub use vault_client::VaultClient;
