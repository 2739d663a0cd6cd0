use tracing::{error, info, warn};

use crate::security::Principal;

/// Structured audit events, emitted under the `audit` target.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn auth_success(&self, principal: &Principal, request_id: &str) {
        info!(target: "audit", event = "auth_success", principal = principal.as_str(), request_id);
    }

    pub fn auth_failure(&self, request_id: &str, reason: &str) {
        warn!(target: "audit", event = "auth_failure", request_id, reason);
    }

    pub fn secret_written(&self, principal: &Principal, request_id: &str, name: &str) {
        info!(target: "audit", event = "secret_written", principal = principal.as_str(), request_id, name);
    }

    pub fn secret_rejected(&self, principal: &Principal, request_id: &str, reason: &str) {
        info!(target: "audit", event = "secret_rejected", principal = principal.as_str(), request_id, reason);
    }

    pub fn internal_error(&self, principal: Option<&Principal>, request_id: &str, error_msg: &str) {
        error!(
            target: "audit",
            event = "internal_error",
            principal = principal.map(Principal::as_str).unwrap_or(""),
            request_id,
            error = error_msg
        );
    }
}
