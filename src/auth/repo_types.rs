use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::tokens::is_live;

/// User record in the database.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserAccount {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String, // Argon2 PHC string, never leaves the store boundary
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub is_verified: bool,
    pub verification_token: Option<String>,
    pub verification_token_expires_at: Option<OffsetDateTime>,
    pub reset_password_token: Option<String>,
    pub reset_password_expires_at: Option<OffsetDateTime>,
    pub last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UserAccount {
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone_number: self.phone_number.clone(),
            is_verified: self.is_verified,
            last_login_at: self.last_login_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A stored single-use token together with its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

/// What an update does to one token/expiry pair. The pair is always written
/// together, so it can never be half set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TokenChange {
    #[default]
    Keep,
    Set(PendingToken),
    Clear,
}

impl TokenChange {
    pub fn is_keep(&self) -> bool {
        matches!(self, TokenChange::Keep)
    }

    /// New column values, meaningful only when not `Keep`.
    pub fn values(&self) -> (Option<&str>, Option<OffsetDateTime>) {
        match self {
            TokenChange::Set(p) => (Some(p.token.as_str()), Some(p.expires_at)),
            TokenChange::Keep | TokenChange::Clear => (None, None),
        }
    }

    fn apply(self, token: &mut Option<String>, expires_at: &mut Option<OffsetDateTime>) {
        match self {
            TokenChange::Keep => {}
            TokenChange::Set(p) => {
                *token = Some(p.token);
                *expires_at = Some(p.expires_at);
            }
            TokenChange::Clear => {
                *token = None;
                *expires_at = None;
            }
        }
    }
}

/// Field-level patch applied by `UserStore::update`. Untouched fields keep
/// whatever a concurrent writer stored.
#[derive(Debug, Clone, Default)]
pub struct AccountChanges {
    pub password_hash: Option<String>,
    pub is_verified: Option<bool>,
    pub verification: TokenChange,
    pub reset: TokenChange,
    pub last_login_at: Option<OffsetDateTime>,
}

impl AccountChanges {
    pub fn apply_to(self, account: &mut UserAccount) {
        if let Some(hash) = self.password_hash {
            account.password_hash = hash;
        }
        if let Some(verified) = self.is_verified {
            account.is_verified = verified;
        }
        self.verification.apply(
            &mut account.verification_token,
            &mut account.verification_token_expires_at,
        );
        self.reset.apply(
            &mut account.reset_password_token,
            &mut account.reset_password_expires_at,
        );
        if let Some(at) = self.last_login_at {
            account.last_login_at = Some(at);
        }
    }
}

/// Everything needed to insert a new, unverified account.
#[derive(Debug, Clone)]
pub struct NewUserRecord {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub verification: PendingToken,
}

/// Condition an update must still satisfy at the moment it is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateGuard {
    Unconditional,
    /// The verification token is still stored and not yet expired at `now`.
    VerificationToken { token: String, now: OffsetDateTime },
    /// The reset token is still stored and not yet expired at `now`.
    ResetToken { token: String, now: OffsetDateTime },
}

impl UpdateGuard {
    pub fn holds_for(&self, current: &UserAccount) -> bool {
        match self {
            UpdateGuard::Unconditional => true,
            UpdateGuard::VerificationToken { token, now } => {
                current.verification_token.as_deref() == Some(token.as_str())
                    && is_live(current.verification_token_expires_at, *now)
            }
            UpdateGuard::ResetToken { token, now } => {
                current.reset_password_token.as_deref() == Some(token.as_str())
                    && is_live(current.reset_password_expires_at, *now)
            }
        }
    }
}

/// Account as returned to callers: no password hash, no pending tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub is_verified: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
