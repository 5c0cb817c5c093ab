//! Random secret generation for service credentials.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;

/// Minimum amount of entropy drawn for every secret, in bytes.
const SECRET_ENTROPY_BYTES: usize = 32;

/// Generate a URL-safe random password of exactly `length` characters.
pub fn random_password(length: usize) -> String {
    // base64 yields 4 characters per 3 bytes
    let byte_count = SECRET_ENTROPY_BYTES.max(length * 3 / 4 + 3);
    let mut bytes = vec![0u8; byte_count];
    rand::thread_rng().fill_bytes(&mut bytes);

    let mut encoded = URL_SAFE_NO_PAD.encode(&bytes);
    encoded.truncate(length);
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_password_length() {
        for length in [6, 16, 32, 64] {
            assert_eq!(random_password(length).len(), length);
        }
    }

    #[test]
    fn test_random_password_is_url_safe() {
        let password = random_password(32);
        assert!(password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_random_passwords_differ() {
        assert_ne!(random_password(32), random_password(32));
    }
}
