pub mod audit_log;
pub mod auth;
pub mod jwks;
pub mod principal;
pub mod token_verifier;

pub use audit_log::AuditLogger;
pub use principal::Principal;
pub use token_verifier::{TokenVerifier, VerifierSettings};
