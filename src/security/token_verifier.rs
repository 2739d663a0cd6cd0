//! Bearer token verification against an identity provider's key set.
//!
//! A call runs four steps and stops at the first failure:
//!
//! 1. obtain the published key set (`KeySetUnavailable` if that fails),
//! 2. find the key named by the token header's `kid` (`UnknownSigningKey`),
//! 3. check signature, issuer, audience and expiry (no leeway),
//! 4. return the `sub` claim as the [`Principal`].
//!
//! Nothing is retried. When the key set is cached, a `kid` miss triggers
//! exactly one refetch before the token is rejected so that freshly rotated
//! keys are picked up.

use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::AuthError;
use crate::security::jwks::JwksClient;
use crate::security::principal::Principal;

/// Algorithms a token may be signed with. Symmetric algorithms are never
/// accepted since the verifier only holds public keys.
pub const ACCEPTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

#[derive(Debug, Clone)]
pub struct VerifierSettings {
    /// Exact `iss` value expected, e.g. `https://tenant.auth0.com/`.
    pub issuer: String,
    /// Value that must appear in `aud`.
    pub audience: String,
    pub jwks_url: String,
    /// Zero disables key set caching.
    pub cache_ttl: Duration,
    pub timeout: Duration,
}

impl VerifierSettings {
    /// Settings for an Auth0-style tenant domain such as `tenant.auth0.com`.
    pub fn for_domain(domain: &str, audience: impl Into<String>) -> Self {
        Self {
            issuer: format!("https://{domain}/"),
            audience: audience.into(),
            jwks_url: format!("https://{domain}/.well-known/jwks.json"),
            cache_ttl: Duration::ZERO,
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: String,
}

#[derive(Debug, Clone)]
pub struct TokenVerifier {
    jwks: JwksClient,
    issuer: String,
    audience: String,
}

impl TokenVerifier {
    pub fn new(settings: VerifierSettings) -> Result<Self, AuthError> {
        let jwks = JwksClient::new(settings.jwks_url, settings.timeout, settings.cache_ttl)?;
        Ok(Self {
            jwks,
            issuer: settings.issuer,
            audience: settings.audience,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let snapshot = self.jwks.current().await?;

        let header = decode_header(token)
            .map_err(|e| AuthError::MalformedToken(format!("failed to decode header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::MalformedToken("header missing 'kid'".to_string()))?;

        let jwk = match snapshot.keys.find(&kid) {
            Some(jwk) => jwk.clone(),
            None if snapshot.from_cache => {
                debug!(kid = %kid, "kid not in cached key set, refetching");
                let fresh = self.jwks.refresh().await?;
                fresh
                    .find(&kid)
                    .cloned()
                    .ok_or_else(|| AuthError::UnknownSigningKey(kid.clone()))?
            }
            None => return Err(AuthError::UnknownSigningKey(kid)),
        };

        check_algorithm(header.alg, &jwk)?;
        let key = DecodingKey::from_jwk(&jwk).map_err(|_| AuthError::UnusableSigningKey(kid.clone()))?;

        let mut validation = Validation::new(header.alg);
        // expiry is exact; no clock skew allowance
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let data = decode::<Claims>(token, &key, &validation)?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::MissingClaim("sub".to_string()));
        }

        debug!(kid = %kid, sub = %data.claims.sub, "token verified");
        Ok(Principal::new(data.claims.sub))
    }
}

/// Reject algorithms outside [`ACCEPTED_ALGORITHMS`] and tokens whose
/// algorithm disagrees with the one the key is published for.
fn check_algorithm(alg: Algorithm, jwk: &Jwk) -> Result<(), AuthError> {
    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!("{alg:?}")));
    }
    if let Some(key_alg) = &jwk.common.key_algorithm {
        let (token_alg, key_alg) = (format!("{alg:?}"), format!("{key_alg:?}"));
        if token_alg != key_alg {
            return Err(AuthError::UnsupportedAlgorithm(format!(
                "token signed with {token_alg} but key is for {key_alg}"
            )));
        }
    }
    Ok(())
}
