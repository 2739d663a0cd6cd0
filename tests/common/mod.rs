#![allow(dead_code)]

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::SigningKey;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use totp_manager::security::VerifierSettings;

pub const ISSUER: &str = "https://tenant.test/";
pub const AUDIENCE: &str = "totp-api";
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

// PKCS#8 v1 wrapper for a raw Ed25519 seed
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, 0x02, 0x01, 0x00, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x04, 0x22, 0x04, 0x20,
];

/// Ed25519 signing key with a fixed seed, published under `kid`.
pub struct TestKey {
    pub kid: String,
    signing: SigningKey,
}

impl TestKey {
    pub fn new(kid: &str, seed: u8) -> Self {
        Self {
            kid: kid.to_string(),
            signing: SigningKey::from_bytes(&[seed; 32]),
        }
    }

    pub fn jwk(&self) -> Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "kid": self.kid,
            "alg": "EdDSA",
            "use": "sig",
            "x": URL_SAFE_NO_PAD.encode(self.signing.verifying_key().as_bytes()),
        })
    }

    fn encoding_key(&self) -> EncodingKey {
        let mut der = ED25519_PKCS8_PREFIX.to_vec();
        der.extend_from_slice(self.signing.as_bytes());
        EncodingKey::from_ed_der(&der)
    }

    /// Sign `claims` with a header naming `kid`.
    pub fn sign_as(&self, kid: Option<&str>, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = kid.map(str::to_string);
        encode(&header, claims, &self.encoding_key()).unwrap()
    }

    pub fn sign(&self, claims: &Value) -> String {
        self.sign_as(Some(&self.kid), claims)
    }

    /// Token for `sub` valid for the next ten minutes.
    pub fn token_for(&self, sub: &str) -> String {
        self.sign(&claims_for(sub))
    }
}

pub fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

pub fn claims_for(sub: &str) -> Value {
    let now = now();
    json!({
        "iss": ISSUER,
        "aud": AUDIENCE,
        "sub": sub,
        "iat": now,
        "exp": now + 600,
    })
}

pub fn key_set(keys: &[&TestKey]) -> String {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() }).to_string()
}

/// Serve `keys` at [`JWKS_PATH`], expecting `hits` fetches.
pub async fn mock_key_set(server: &mut mockito::Server, keys: &[&TestKey], hits: usize) -> mockito::Mock {
    server
        .mock("GET", JWKS_PATH)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(key_set(keys))
        .expect(hits)
        .create_async()
        .await
}

pub fn settings(server: &mockito::Server, cache_ttl: Duration) -> VerifierSettings {
    VerifierSettings {
        issuer: ISSUER.to_string(),
        audience: AUDIENCE.to_string(),
        jwks_url: format!("{}{}", server.url(), JWKS_PATH),
        cache_ttl,
        timeout: Duration::from_secs(5),
    }
}
