use sha2::{Digest, Sha256};

pub const RESET_TOKEN_PREFIX: &str = "mbr_reset_";

/// Length of a generated PIN.
pub const PIN_LENGTH: usize = 8;

pub const PAYMENT_REF_PREFIX: &str = "HMS";

/// Characters used for payment references. Omits 0/O, 1/I and similar
/// pairs that are easy to misread on a bank statement.
const PAYMENT_REF_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const PAYMENT_REF_RANDOM_LEN: usize = 8;

/// Generate a password reset token. Returns `(raw_token, sha256_hash)`.
/// Format: `mbr_reset_` + 32 random bytes as hex (74 chars total).
pub fn generate_reset_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    let raw = format!("{RESET_TOKEN_PREFIX}{}", hex::encode(bytes));
    let hash = hash_token(&raw);
    (raw, hash)
}

/// SHA-256 hash of a token string, returned as lowercase hex.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cheap shape check before touching the store.
pub fn is_reset_token(token: &str) -> bool {
    token
        .strip_prefix(RESET_TOKEN_PREFIX)
        .is_some_and(|rest| rest.len() == 64 && rest.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// A random numeric door PIN.
pub fn generate_pin() -> String {
    // Bytes >= 250 are rejected so every digit is equally likely.
    let mut pin = String::with_capacity(PIN_LENGTH);
    while pin.len() < PIN_LENGTH {
        let mut bytes = [0u8; 16];
        rand::fill(&mut bytes);
        for b in bytes.into_iter().filter(|b| *b < 250) {
            if pin.len() == PIN_LENGTH {
                break;
            }
            pin.push(char::from(b'0' + b % 10));
        }
    }
    pin
}

/// A random standing-order payment reference, e.g. `HMSK7P2QXR4`.
pub fn generate_payment_ref() -> String {
    let mut bytes = [0u8; PAYMENT_REF_RANDOM_LEN];
    rand::fill(&mut bytes);
    // The alphabet has 32 symbols, so `% 32` is unbiased.
    let suffix: String = bytes
        .iter()
        .map(|b| char::from(PAYMENT_REF_ALPHABET[usize::from(*b) % PAYMENT_REF_ALPHABET.len()]))
        .collect();
    format!("{PAYMENT_REF_PREFIX}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_token_format() {
        let (raw, hash) = generate_reset_token();
        assert!(raw.starts_with(RESET_TOKEN_PREFIX));
        assert_eq!(raw.len(), RESET_TOKEN_PREFIX.len() + 64);
        assert_eq!(hash.len(), 64);
        assert!(is_reset_token(&raw));
        assert_eq!(hash_token(&raw), hash);
    }

    #[test]
    fn different_tokens_different_hashes() {
        let (raw1, hash1) = generate_reset_token();
        let (raw2, hash2) = generate_reset_token();
        assert_ne!(raw1, raw2);
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(!is_reset_token(""));
        assert!(!is_reset_token("mbr_reset_abc"));
        assert!(!is_reset_token(&format!("plat_{}", "a".repeat(64))));
        assert!(!is_reset_token(&format!("{RESET_TOKEN_PREFIX}{}", "z".repeat(64))));
    }

    #[test]
    fn pin_is_numeric() {
        let pin = generate_pin();
        assert_eq!(pin.len(), PIN_LENGTH);
        assert!(pin.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn payment_ref_uses_unambiguous_alphabet() {
        for _ in 0..50 {
            let reference = generate_payment_ref();
            assert_eq!(reference.len(), 11);
            let suffix = reference.strip_prefix(PAYMENT_REF_PREFIX).unwrap();
            assert!(suffix.bytes().all(|b| PAYMENT_REF_ALPHABET.contains(&b)));
            assert!(!suffix.contains(['0', 'O', '1', 'I']));
        }
    }
}
