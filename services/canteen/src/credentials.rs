//! Argon2 hashing for member PINs and staff passwords

use anyhow::Result;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};

use crate::models::{StaffAccount, User};

/// Hash a PIN or password into a PHC string
pub fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let hash = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash secret: {}", e))?
        .to_string();
    Ok(hash)
}

/// Check `secret` against a stored PHC string
pub fn verify_secret(stored_hash: &str, secret: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("Failed to parse stored hash: {}", e))?;

    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Members without a PIN never authenticate
pub fn verify_pin(user: &User, pin: &str) -> Result<bool> {
    match user.pin_hash.as_deref() {
        Some(hash) => verify_secret(hash, pin),
        None => Ok(false),
    }
}

pub fn verify_staff(account: &StaffAccount, password: &str) -> Result<bool> {
    if !account.active {
        return Ok(false);
    }
    verify_secret(&account.password_hash, password)
}
