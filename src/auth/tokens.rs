use std::time::Duration;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{auth::repo_types::UserAccount, config::JwtConfig};

/// Bytes of entropy in verification and reset tokens.
const OPAQUE_TOKEN_BYTES: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("failed to sign session token: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
    #[error("invalid or expired session token")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

/// Random single-use token, lowercase hex.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A stored token with expiry `expires_at` is usable strictly before it.
pub fn is_live(expires_at: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
    matches!(expires_at, Some(exp) if exp > now)
}

/// Claims embedded in the session JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl SessionKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64) * 60),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user: &UserAccount) -> Result<String, TokenError> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = SessionClaims {
            sub: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            phone_number: user.phone_number.clone(),
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &SessionClaims) -> Result<String, TokenError> {
        let token = encode(&Header::default(), claims, &self.encoding).map_err(TokenError::Sign)?;
        debug!(user_id = %claims.sub, "session token signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)
            .map_err(TokenError::Invalid)?;
        debug!(user_id = %data.claims.sub, "session token verified");
        Ok(data.claims)
    }
}
