//! RFC 6238 code derivation (HMAC-SHA1, 30 second step, 6 digits).

use data_encoding::{Encoding, Specification};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::error::OtpError;

type HmacSha1 = Hmac<Sha1>;

/// Length of one code window in seconds.
pub const WINDOW_SECS: u64 = 30;

/// Number of digits in a derived code.
pub const CODE_DIGITS: u32 = 6;

/// A code and how long it stays valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedCode {
    pub otp: String,
    /// Seconds until the next window, in `1..=WINDOW_SECS`.
    pub time_remaining: u64,
}

/// Derive the code for `encoded_secret` at unix time `now`.
pub fn derive(encoded_secret: &str, now: u64) -> Result<DerivedCode, OtpError> {
    let key = decode_secret(encoded_secret)?;
    let counter = now / WINDOW_SECS;

    Ok(DerivedCode {
        otp: hotp(&key, counter)?,
        time_remaining: WINDOW_SECS - (now % WINDOW_SECS),
    })
}

fn hotp(key: &[u8], counter: u64) -> Result<String, OtpError> {
    let mut mac = HmacSha1::new_from_slice(key).map_err(|_| OtpError::InvalidSecretEncoding)?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // dynamic truncation, RFC 4226 section 5.3
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);

    let code = binary % 10u32.pow(CODE_DIGITS);
    Ok(format!("{:0width$}", code, width = CODE_DIGITS as usize))
}

const BASE32_SYMBOLS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Unpadded Base32 that ignores the unused bits of the last symbol, as
/// most authenticator apps do.
fn lenient_base32() -> Result<Encoding, OtpError> {
    let mut spec = Specification::new();
    spec.symbols.push_str(BASE32_SYMBOLS);
    spec.check_trailing_bits = false;
    spec.encoding().map_err(|_| OtpError::InvalidSecretEncoding)
}

/// Case-insensitive Base32. Padding is optional, but when present it must
/// complete the last 8-symbol group exactly.
fn decode_secret(encoded_secret: &str) -> Result<Vec<u8>, OtpError> {
    let normalized = encoded_secret.trim().to_ascii_uppercase();
    let unpadded = normalized.trim_end_matches('=');

    let padded = normalized.len() != unpadded.len();
    if padded && normalized.len() != unpadded.len().div_ceil(8) * 8 {
        return Err(OtpError::InvalidSecretEncoding);
    }

    let decoded = lenient_base32()?
        .decode(unpadded.as_bytes())
        .map_err(|_| OtpError::InvalidSecretEncoding)?;

    if decoded.is_empty() {
        return Err(OtpError::InvalidSecretEncoding);
    }
    Ok(decoded)
}
