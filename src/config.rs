use std::time::Duration;

use crate::error::ConfigError;
use crate::security::VerifierSettings;
use crate::store::DEFAULT_MOUNT;

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

/// Service settings, read once at startup.
#[derive(Clone)]
pub struct Config {
    pub vault_addr: String,
    pub vault_token: String,
    pub vault_skip_verify: bool,
    pub vault_mount: String,
    /// Identity provider domain without scheme, e.g. `tenant.auth0.com`.
    pub auth_domain: String,
    pub auth_audience: String,
    pub jwks_url: Option<String>,
    pub jwks_cache_ttl: Duration,
    pub http_timeout: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("vault_addr", &self.vault_addr)
            .field("vault_token", &"<redacted>")
            .field("vault_skip_verify", &self.vault_skip_verify)
            .field("vault_mount", &self.vault_mount)
            .field("auth_domain", &self.auth_domain)
            .field("auth_audience", &self.auth_audience)
            .field("jwks_url", &self.jwks_url)
            .field("jwks_cache_ttl", &self.jwks_cache_ttl)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl Config {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Config::from_env`], but Vault settings may be absent. Used by
    /// the in-memory backend, which never contacts Vault.
    pub fn from_env_without_vault() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| {
            let value = std::env::var(key).ok();
            match key {
                "VAULT_ADDR" | "VAULT_TOKEN" => value.or_else(|| Some("unused".to_string())),
                _ => value,
            }
        })
    }

    /// Read settings through `lookup`, which maps a variable name to its
    /// value. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let auth_domain = get("AUTH0_DOMAIN")
            .or_else(|| get("VITE_AUTH0_DOMAIN"))
            .ok_or(ConfigError::Missing("AUTH0_DOMAIN"))?;
        let auth_audience = get("AUTH0_AUDIENCE")
            .or_else(|| get("VITE_AUTH0_AUDIENCE"))
            .ok_or(ConfigError::Missing("AUTH0_AUDIENCE"))?;

        Ok(Self {
            vault_addr: require("VAULT_ADDR")?,
            vault_token: require("VAULT_TOKEN")?,
            vault_skip_verify: parse_bool("VAULT_SKIP_VERIFY", get("VAULT_SKIP_VERIFY"))?,
            vault_mount: get("VAULT_MOUNT").unwrap_or_else(|| DEFAULT_MOUNT.to_string()),
            auth_domain: normalize_domain(&auth_domain),
            auth_audience,
            jwks_url: get("AUTH0_JWKS_URL"),
            jwks_cache_ttl: Duration::from_secs(parse_secs("JWKS_CACHE_TTL_SECS", get("JWKS_CACHE_TTL_SECS"), 0)?),
            http_timeout: Duration::from_secs(parse_secs(
                "HTTP_TIMEOUT_SECS",
                get("HTTP_TIMEOUT_SECS"),
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
        })
    }

    pub fn verifier_settings(&self) -> VerifierSettings {
        let mut settings = VerifierSettings::for_domain(&self.auth_domain, self.auth_audience.clone());
        if let Some(url) = &self.jwks_url {
            settings.jwks_url = url.clone();
        }
        settings.cache_ttl = self.jwks_cache_ttl;
        settings.timeout = self.http_timeout;
        settings
    }
}

/// `https://tenant.auth0.com/` and `tenant.auth0.com` name the same tenant.
fn normalize_domain(raw: &str) -> String {
    let without_scheme = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .unwrap_or(raw);
    without_scheme.trim_end_matches('/').to_string()
}

fn parse_bool(key: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            key,
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_secs(key: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid {
            key,
            reason: format!("expected whole seconds, got '{v}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("VAULT_ADDR", "https://vault.internal:8200"),
        ("VAULT_TOKEN", "s.token"),
        ("AUTH0_DOMAIN", "tenant.auth0.com"),
        ("AUTH0_AUDIENCE", "https://api.example.com"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(config.vault_mount, "prod_totp_secrets");
        assert!(!config.vault_skip_verify);
        assert!(config.jwks_cache_ttl.is_zero());
        assert_eq!(config.http_timeout, Duration::from_secs(20));
        assert!(config.jwks_url.is_none());
    }

    #[test]
    fn test_missing_required_variable() {
        for missing in ["VAULT_ADDR", "VAULT_TOKEN", "AUTH0_DOMAIN", "AUTH0_AUDIENCE"] {
            let pairs: Vec<_> = REQUIRED.iter().copied().filter(|(k, _)| *k != missing).collect();
            let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(matches!(err, ConfigError::Missing(key) if key == missing), "{missing}");
        }
    }

    #[test]
    fn test_empty_value_counts_as_missing() {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .map(|&(k, v)| if k == "VAULT_TOKEN" { (k, "  ") } else { (k, v) })
            .collect();
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("VAULT_TOKEN")));
    }

    #[test]
    fn test_vite_fallbacks() {
        let pairs = [
            ("VAULT_ADDR", "http://127.0.0.1:8200"),
            ("VAULT_TOKEN", "root"),
            ("VITE_AUTH0_DOMAIN", "https://tenant.eu.auth0.com/"),
            ("VITE_AUTH0_AUDIENCE", "totp-api"),
        ];
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.auth_domain, "tenant.eu.auth0.com");
        assert_eq!(config.auth_audience, "totp-api");
    }

    #[test]
    fn test_optional_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("VAULT_SKIP_VERIFY", "TRUE"),
            ("VAULT_MOUNT", "dev_totp"),
            ("AUTH0_JWKS_URL", "http://127.0.0.1:9999/jwks.json"),
            ("JWKS_CACHE_TTL_SECS", "300"),
            ("HTTP_TIMEOUT_SECS", "5"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert!(config.vault_skip_verify);
        assert_eq!(config.vault_mount, "dev_totp");

        let settings = config.verifier_settings();
        assert_eq!(settings.jwks_url, "http://127.0.0.1:9999/jwks.json");
        assert_eq!(settings.issuer, "https://tenant.auth0.com/");
        assert_eq!(settings.cache_ttl, Duration::from_secs(300));
        assert_eq!(settings.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("VAULT_SKIP_VERIFY", "maybe"));
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { key: "VAULT_SKIP_VERIFY", .. })
        ));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("HTTP_TIMEOUT_SECS", "soon"));
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { key: "HTTP_TIMEOUT_SECS", .. })
        ));
    }
}
