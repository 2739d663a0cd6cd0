use super::generator::derive;

/// Shortest secret accepted for storage.
pub const MIN_SECRET_LEN: usize = 16;

fn is_base32_symbol(c: char) -> bool {
    matches!(c, 'A'..='Z' | '2'..='7' | '=')
}

/// Uppercase `raw` and drop everything outside the Base32 alphabet, so
/// secrets pasted with spaces or dashes still parse.
pub fn clean_secret(raw: &str) -> String {
    raw.to_uppercase().chars().filter(|c| is_base32_symbol(*c)).collect()
}

/// Whether `candidate` can be stored as a shared secret.
pub fn is_valid_secret(candidate: &str) -> bool {
    let upper = candidate.to_uppercase();
    if upper.is_empty() || !upper.chars().all(is_base32_symbol) {
        return false;
    }
    if candidate.chars().count() < MIN_SECRET_LEN {
        return false;
    }
    // catches strings in the right alphabet that still do not decode
    derive(&upper, 0).is_ok()
}
