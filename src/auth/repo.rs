use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{
    repo_types::{AccountChanges, NewUserRecord, UpdateGuard, UserAccount},
    tokens::is_live,
};

/// Durable keyed storage of accounts.
///
/// `create` returns `None` when the email is taken and `update` returns `None`
/// when the guard no longer holds; both decisions are made atomically by the
/// store, never by a separate read.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserAccount>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<UserAccount>>;
    async fn find_by_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<UserAccount>>;
    async fn find_by_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<UserAccount>>;
    async fn create(&self, new: NewUserRecord) -> anyhow::Result<Option<UserAccount>>;
    async fn update(
        &self,
        id: Uuid,
        changes: AccountChanges,
        guard: UpdateGuard,
    ) -> anyhow::Result<Option<UserAccount>>;
}

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, phone_number, \
     is_verified, verification_token, verification_token_expires_at, \
     reset_password_token, reset_password_expires_at, last_login_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserAccount>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let user = sqlx::query_as::<_, UserAccount>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<UserAccount>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, UserAccount>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        Ok(user)
    }

    async fn find_by_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<UserAccount>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE verification_token = $1 AND verification_token_expires_at > $2"
        );
        let user = sqlx::query_as::<_, UserAccount>(&sql)
            .bind(token)
            .bind(now)
            .fetch_optional(&self.db)
            .await
            .context("find user by verification token")?;
        Ok(user)
    }

    async fn find_by_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<UserAccount>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE reset_password_token = $1 AND reset_password_expires_at > $2"
        );
        let user = sqlx::query_as::<_, UserAccount>(&sql)
            .bind(token)
            .bind(now)
            .fetch_optional(&self.db)
            .await
            .context("find user by reset token")?;
        Ok(user)
    }

    async fn create(&self, new: NewUserRecord) -> anyhow::Result<Option<UserAccount>> {
        let sql = format!(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, phone_number,
                               verification_token, verification_token_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (email) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, UserAccount>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(&new.first_name)
            .bind(&new.last_name)
            .bind(&new.phone_number)
            .bind(&new.verification.token)
            .bind(new.verification.expires_at)
            .fetch_optional(&self.db)
            .await
            .context("insert user")?;
        Ok(user)
    }

    async fn update(
        &self,
        id: Uuid,
        changes: AccountChanges,
        guard: UpdateGuard,
    ) -> anyhow::Result<Option<UserAccount>> {
        let (verification_guard, reset_guard, now) = match guard {
            UpdateGuard::Unconditional => (None, None, None),
            UpdateGuard::VerificationToken { token, now } => (Some(token), None, Some(now)),
            UpdateGuard::ResetToken { token, now } => (None, Some(token), Some(now)),
        };
        let (verification_token, verification_expires_at) = changes.verification.values();
        let (reset_token, reset_expires_at) = changes.reset.values();

        // The guard is re-checked in the same statement that applies the
        // change, so of several racing writers only one can match.
        let sql = format!(
            r#"
            UPDATE users SET
                password_hash = COALESCE($2, password_hash),
                is_verified = COALESCE($3, is_verified),
                verification_token =
                    CASE WHEN $4 THEN $5::text ELSE verification_token END,
                verification_token_expires_at =
                    CASE WHEN $4 THEN $6::timestamptz ELSE verification_token_expires_at END,
                reset_password_token =
                    CASE WHEN $7 THEN $8::text ELSE reset_password_token END,
                reset_password_expires_at =
                    CASE WHEN $7 THEN $9::timestamptz ELSE reset_password_expires_at END,
                last_login_at = COALESCE($10, last_login_at),
                updated_at = now()
            WHERE id = $1
              AND ($11::text IS NULL
                   OR (verification_token = $11 AND verification_token_expires_at > $13))
              AND ($12::text IS NULL
                   OR (reset_password_token = $12 AND reset_password_expires_at > $13))
            RETURNING {USER_COLUMNS}
            "#
        );
        let user = sqlx::query_as::<_, UserAccount>(&sql)
            .bind(id)
            .bind(changes.password_hash.as_deref())
            .bind(changes.is_verified)
            .bind(!changes.verification.is_keep())
            .bind(verification_token)
            .bind(verification_expires_at)
            .bind(!changes.reset.is_keep())
            .bind(reset_token)
            .bind(reset_expires_at)
            .bind(changes.last_login_at)
            .bind(verification_guard)
            .bind(reset_guard)
            .bind(now)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("update user {id}"))?;
        Ok(user)
    }
}

/// In-process store for development without a database, and for tests.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, UserAccount>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserAccount>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<UserAccount>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_verification_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<UserAccount>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| {
                u.verification_token.as_deref() == Some(token)
                    && is_live(u.verification_token_expires_at, now)
            })
            .cloned())
    }

    async fn find_by_reset_token(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<UserAccount>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| {
                u.reset_password_token.as_deref() == Some(token)
                    && is_live(u.reset_password_expires_at, now)
            })
            .cloned())
    }

    async fn create(&self, new: NewUserRecord) -> anyhow::Result<Option<UserAccount>> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == new.email) {
            return Ok(None);
        }
        let now = OffsetDateTime::now_utc();
        let account = UserAccount {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            phone_number: new.phone_number,
            is_verified: false,
            verification_token: Some(new.verification.token),
            verification_token_expires_at: Some(new.verification.expires_at),
            reset_password_token: None,
            reset_password_expires_at: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(account.id, account.clone());
        Ok(Some(account))
    }

    async fn update(
        &self,
        id: Uuid,
        changes: AccountChanges,
        guard: UpdateGuard,
    ) -> anyhow::Result<Option<UserAccount>> {
        let mut users = self.users.write().await;
        let Some(current) = users.get_mut(&id) else {
            return Ok(None);
        };
        if !guard.holds_for(current) {
            return Ok(None);
        }
        changes.apply_to(current);
        current.updated_at = OffsetDateTime::now_utc();
        Ok(Some(current.clone()))
    }
}
