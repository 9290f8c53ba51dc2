use std::sync::LazyLock;

use anyhow::Context;
use argon2::password_hash::{Error as HashError, SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

/// Default argon2id parameters, shared by every credential backend.
static HASHER: LazyLock<Argon2<'static>> = LazyLock::new(Argon2::default);

/// Hash checked against when the username is unknown, so a miss costs the
/// same as a wrong password.
static DUMMY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("membership-dummy-password").ok());

/// PHC-format hash of a member's password with a fresh salt.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    HASHER
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("hashing member password: {e}"))
}

/// `Ok(false)` only for a mismatch. A stored hash that does not parse, or a
/// hasher failure, is an error so a corrupt credential row is not read as a
/// wrong password.
pub fn verify_password(plain: &str, stored: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("stored credential is not a PHC hash")?;
    match HASHER.verify_password(plain.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(HashError::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("verifying member password: {e}")),
    }
}

/// Burn one verification against a throwaway hash. Always false.
pub fn verify_against_dummy(plain: &str) -> bool {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(plain, hash);
    }
    false
}
