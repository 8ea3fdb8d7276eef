use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::OsRng;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum HashingError {
    #[error("invalid hashing parameters: {0}")]
    Params(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("stored password hash is malformed: {0}")]
    Malformed(String),
}

/// Argon2id with `cost` as the time cost (passes over memory).
fn hasher(cost: u32) -> Result<Argon2<'static>, HashingError> {
    let params = Params::new(
        Params::DEFAULT_M_COST,
        cost,
        Params::DEFAULT_P_COST,
        None,
    )
    .map_err(|e| HashingError::Params(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Rejects a cost argon2 would refuse, so bad configuration fails at startup.
pub fn check_cost(cost: u32) -> Result<(), HashingError> {
    hasher(cost).map(|_| ())
}

pub fn hash_password(plain: &str, cost: u32) -> Result<String, HashingError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher(cost)?
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            HashingError::Hash(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// Parameters are read back from the PHC string, so hashes made with an
/// older cost still verify.
pub fn verify_password(plain: &str, hash: &str) -> Result<bool, HashingError> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        HashingError::Malformed(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}
