use tably_core::{Error, Result};

use rand::RngCore;
use sha2::{Digest, Sha256};

const MIN_LENGTH: usize = 6;
const ITERATIONS: u32 = 10_000;

/// Rejects passwords shorter than six characters or missing an upper,
/// a lower or a digit character class.
pub fn validate_strength(password: &str) -> Result<()> {
    if password.chars().count() < MIN_LENGTH {
        return Err(Error::invalid_argument(
            "password must be at least 6 characters",
        ));
    }

    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_upper && has_lower && has_digit) {
        return Err(Error::invalid_argument(
            "password must contain upper and lower case letters and a digit",
        ));
    }

    Ok(())
}

/// Salted, iterated SHA-256 in a self-describing
/// `sha256$<iterations>$<salt-hex>$<hash-hex>` envelope.
pub fn hash(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let digest = digest(password.as_bytes(), &salt, ITERATIONS);

    format!(
        "sha256${ITERATIONS}${}${}",
        hex::encode(salt),
        hex::encode(digest)
    )
}

/// Constant-shape verification against a stored envelope. Malformed
/// envelopes never verify.
pub fn verify(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some("sha256"), Some(iters), Some(salt), Some(expected)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    let Ok(iters) = iters.parse::<u32>() else {
        return false;
    };
    let Ok(salt) = hex::decode(salt) else {
        return false;
    };
    let Ok(expected) = hex::decode(expected) else {
        return false;
    };

    let actual = digest(password.as_bytes(), &salt, iters);

    // length check first so the comparison below stays fixed-width
    if actual.len() != expected.len() {
        return false;
    }
    actual
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn digest(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password);
    let mut out = hasher.finalize();

    for _ in 1..iterations.max(1) {
        let mut hasher = Sha256::new();
        hasher.update(out);
        out = hasher.finalize();
    }

    out.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strength_policy() {
        assert!(validate_strength("Ab1xyz").is_ok());
        assert!(validate_strength("Ab1").unwrap_err().is_invalid_argument());
        assert!(validate_strength("alllower1").is_err());
        assert!(validate_strength("ALLUPPER1").is_err());
        assert!(validate_strength("NoDigits").is_err());
    }

    #[test]
    fn hash_and_verify_round_trip() {
        let stored = hash("Sup3rSecret");
        assert!(stored.starts_with("sha256$"));
        assert!(verify("Sup3rSecret", &stored));
        assert!(!verify("Sup3rSecret2", &stored));
    }

    #[test]
    fn hashes_are_salted() {
        assert_ne!(hash("Sup3rSecret"), hash("Sup3rSecret"));
    }

    #[test]
    fn malformed_envelopes_never_verify() {
        assert!(!verify("x", ""));
        assert!(!verify("x", "sha256$notanumber$00$00"));
        assert!(!verify("x", "plaintext"));
    }
}
