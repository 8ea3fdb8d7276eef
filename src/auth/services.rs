//! Account lifecycle: signup, email verification, sign-in, password reset.
//!
//! Every state change is a single guarded `UserStore::update`; tokens are
//! cleared in the same update that consumes them.

use std::sync::Arc;

use time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn, Instrument};

use crate::{
    auth::{
        clock::Clock,
        dto::{normalize_email, Credentials, NewAccount, NewPassword},
        errors::AuthError,
        notify::{DeliveryError, Notifier},
        password,
        repo::UserStore,
        repo_types::{
            AccountChanges, NewUserRecord, PendingToken, PublicUser, TokenChange, UpdateGuard,
        },
        tokens::{generate_opaque_token, SessionClaims, SessionKeys},
    },
    config::{Delivery, IdentityConfig, SessionPolicy},
};

#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub user: PublicUser,
    /// Absent under `SessionPolicy::AfterVerification`.
    pub session: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SignInOutcome {
    pub user: PublicUser,
    pub session: String,
}

/// What the transport should do with the client's session credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInstruction {
    Set(String),
    Clear,
}

enum Notification {
    Verification { email: String, token: String },
    Welcome { email: String, first_name: String },
    ResetRequest { email: String, reset_url: String },
    ResetSuccess { email: String },
}

impl Notification {
    fn kind(&self) -> &'static str {
        match self {
            Notification::Verification { .. } => "verification",
            Notification::Welcome { .. } => "welcome",
            Notification::ResetRequest { .. } => "reset_request",
            Notification::ResetSuccess { .. } => "reset_success",
        }
    }

    async fn deliver(self, notifier: &dyn Notifier) -> Result<(), DeliveryError> {
        match self {
            Notification::Verification { email, token } => {
                notifier.send_verification(&email, &token).await
            }
            Notification::Welcome { email, first_name } => {
                notifier.send_welcome(&email, &first_name).await
            }
            Notification::ResetRequest { email, reset_url } => {
                notifier.send_password_reset_request(&email, &reset_url).await
            }
            Notification::ResetSuccess { email } => {
                notifier.send_password_reset_success(&email).await
            }
        }
    }
}

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
    keys: SessionKeys,
    clock: Arc<dyn Clock>,
    config: Arc<IdentityConfig>,
    dummy_hash: Arc<OnceCell<String>>,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn UserStore>,
        notifier: Arc<dyn Notifier>,
        keys: SessionKeys,
        clock: Arc<dyn Clock>,
        config: IdentityConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            keys,
            clock,
            config: Arc::new(config),
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn sign_up(&self, input: NewAccount) -> Result<SignUpOutcome, AuthError> {
        let email = normalize_email(&input.email);
        if self.store.find_by_email(&email).await?.is_some() {
            warn!("email already registered");
            return Err(AuthError::AlreadyExists);
        }

        let password_hash = self.hash(input.password).await?;
        let verification = PendingToken {
            token: generate_opaque_token(),
            expires_at: self.clock.now() + Duration::minutes(self.config.verification_ttl_minutes),
        };
        let token = verification.token.clone();

        let account = self
            .store
            .create(NewUserRecord {
                email,
                password_hash,
                first_name: input.first_name,
                last_name: input.last_name,
                phone_number: input.phone_number,
                verification,
            })
            .await?
            .ok_or_else(|| {
                warn!("email registered concurrently");
                AuthError::AlreadyExists
            })?;

        let session = match self.config.session_policy {
            SessionPolicy::Immediate => Some(self.keys.issue(&account)?),
            SessionPolicy::AfterVerification => None,
        };

        self.dispatch(
            self.config.delivery.verification,
            Notification::Verification {
                email: account.email.clone(),
                token,
            },
        )
        .await?;

        info!(user_id = %account.id, "user signed up");
        Ok(SignUpOutcome {
            user: account.to_public(),
            session,
        })
    }

    #[instrument(skip_all)]
    pub async fn verify_email(&self, code: &str) -> Result<PublicUser, AuthError> {
        let now = self.clock.now();
        let Some(account) = self.store.find_by_verification_token(code, now).await? else {
            warn!("unknown or expired verification code");
            return Err(AuthError::InvalidOrExpiredToken);
        };

        let changes = AccountChanges {
            is_verified: Some(true),
            verification: TokenChange::Clear,
            ..Default::default()
        };
        let guard = UpdateGuard::VerificationToken {
            token: code.to_string(),
            now: self.clock.now(),
        };
        let Some(updated) = self.store.update(account.id, changes, guard).await? else {
            warn!(user_id = %account.id, "verification code consumed concurrently");
            return Err(AuthError::InvalidOrExpiredToken);
        };

        self.dispatch(
            self.config.delivery.welcome,
            Notification::Welcome {
                email: updated.email.clone(),
                first_name: updated.first_name.clone(),
            },
        )
        .await?;

        info!(user_id = %updated.id, "email verified");
        Ok(updated.to_public())
    }

    /// Unknown email, missing hash and wrong password are indistinguishable
    /// to the caller.
    #[instrument(skip(self, creds), fields(email = %creds.email))]
    pub async fn sign_in(&self, creds: Credentials) -> Result<SignInOutcome, AuthError> {
        let email = normalize_email(&creds.email);
        let Some(account) = self.store.find_by_email(&email).await? else {
            self.equalize_timing(creds.password).await;
            warn!("sign-in for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if account.password_hash.is_empty() {
            warn!(user_id = %account.id, "account has no password");
            return Err(AuthError::InvalidCredentials);
        }

        if !self
            .verify(creds.password, account.password_hash.clone())
            .await?
        {
            warn!(user_id = %account.id, "sign-in with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        if self.config.session_policy == SessionPolicy::AfterVerification && !account.is_verified
        {
            warn!(user_id = %account.id, "sign-in before verification");
            return Err(AuthError::NotVerified);
        }

        let changes = AccountChanges {
            last_login_at: Some(self.clock.now()),
            ..Default::default()
        };
        let updated = self
            .store
            .update(account.id, changes, UpdateGuard::Unconditional)
            .await?
            .ok_or(AuthError::NotFound)?;
        let session = self.keys.issue(&updated)?;

        info!(user_id = %updated.id, "user signed in");
        Ok(SignInOutcome {
            user: updated.to_public(),
            session,
        })
    }

    /// Sessions are self-contained, so there is nothing to revoke server-side.
    pub fn sign_out(&self) -> SessionInstruction {
        SessionInstruction::Clear
    }

    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let Some(account) = self.store.find_by_email(&email).await? else {
            if self.config.disclose_unknown_email {
                warn!("password reset for unknown email");
                return Err(AuthError::NotFound);
            }
            info!("password reset for unknown email ignored");
            return Ok(());
        };

        let token = generate_opaque_token();
        let changes = AccountChanges {
            reset: TokenChange::Set(PendingToken {
                token: token.clone(),
                expires_at: self.clock.now() + Duration::minutes(self.config.reset_ttl_minutes),
            }),
            ..Default::default()
        };
        self.store
            .update(account.id, changes, UpdateGuard::Unconditional)
            .await?
            .ok_or(AuthError::NotFound)?;

        self.dispatch(
            self.config.delivery.reset_request,
            Notification::ResetRequest {
                email: account.email.clone(),
                reset_url: self.reset_url(&token),
            },
        )
        .await?;

        info!(user_id = %account.id, "password reset requested");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: NewPassword,
    ) -> Result<(), AuthError> {
        let Some(account) = self.store.find_by_reset_token(token, self.clock.now()).await? else {
            warn!("unknown or expired reset token");
            return Err(AuthError::InvalidOrExpiredToken);
        };

        let password_hash = self.hash(new_password.0).await?;
        let changes = AccountChanges {
            password_hash: Some(password_hash),
            reset: TokenChange::Clear,
            ..Default::default()
        };
        // Re-read the clock: the token may have expired while hashing.
        let guard = UpdateGuard::ResetToken {
            token: token.to_string(),
            now: self.clock.now(),
        };
        let Some(updated) = self.store.update(account.id, changes, guard).await? else {
            warn!(user_id = %account.id, "reset token consumed concurrently");
            return Err(AuthError::InvalidOrExpiredToken);
        };

        self.dispatch(
            self.config.delivery.reset_success,
            Notification::ResetSuccess {
                email: updated.email.clone(),
            },
        )
        .await?;

        info!(user_id = %updated.id, "password reset");
        Ok(())
    }

    pub fn authenticate(&self, token: &str) -> Result<SessionClaims, AuthError> {
        Ok(self.keys.verify(token)?)
    }

    #[instrument(skip_all, fields(user_id = %claims.sub))]
    pub async fn check_auth(&self, claims: &SessionClaims) -> Result<PublicUser, AuthError> {
        let account = self
            .store
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::NotFound)?;
        Ok(account.to_public())
    }

    fn reset_url(&self, token: &str) -> String {
        format!(
            "{}/reset-password/{}",
            self.config.client_url.trim_end_matches('/'),
            token
        )
    }

    async fn dispatch(&self, mode: Delivery, notification: Notification) -> Result<(), AuthError> {
        let kind = notification.kind();
        match mode {
            Delivery::Background => {
                let notifier = Arc::clone(&self.notifier);
                tokio::spawn(
                    async move {
                        if let Err(e) = notification.deliver(notifier.as_ref()).await {
                            warn!(error = %e, kind, "background email delivery failed");
                        }
                    }
                    .in_current_span(),
                );
                Ok(())
            }
            Delivery::BestEffort => {
                if let Err(e) = notification.deliver(self.notifier.as_ref()).await {
                    warn!(error = %e, kind, "email delivery failed");
                }
                Ok(())
            }
            Delivery::Required => {
                notification
                    .deliver(self.notifier.as_ref())
                    .await
                    .map_err(|e| {
                        warn!(error = %e, kind, "email delivery failed");
                        AuthError::Notification(e)
                    })
            }
        }
    }

    async fn hash(&self, plain: String) -> Result<String, AuthError> {
        let cost = self.config.hash_cost;
        let hash = tokio::task::spawn_blocking(move || password::hash_password(&plain, cost))
            .await
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("hashing task failed: {e}")))??;
        Ok(hash)
    }

    async fn verify(&self, plain: String, hash: String) -> Result<bool, AuthError> {
        let ok = tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
            .await
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("verify task failed: {e}")))??;
        Ok(ok)
    }

    /// Spend one verification on a throwaway hash so unknown emails take as
    /// long as wrong passwords.
    async fn equalize_timing(&self, plain: String) {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| self.hash(generate_opaque_token()))
            .await;
        if let Ok(dummy) = dummy {
            let _ = self.verify(plain, dummy.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{
            clock::testing::FixedClock,
            notify::testing::{RecordingNotifier, Sent},
            repo::MemoryUserStore,
        },
        config::{DeliveryConfig, JwtConfig},
    };
    use time::OffsetDateTime;
    use uuid::Uuid;

    struct Harness {
        service: IdentityService,
        store: Arc<MemoryUserStore>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<FixedClock>,
    }

    fn test_config() -> IdentityConfig {
        IdentityConfig {
            hash_cost: 1,
            client_url: "http://app.test/".into(),
            delivery: DeliveryConfig {
                verification: Delivery::BestEffort,
                welcome: Delivery::BestEffort,
                reset_request: Delivery::Required,
                reset_success: Delivery::BestEffort,
            },
            ..IdentityConfig::default()
        }
    }

    fn harness_with(config: IdentityConfig, notifier: RecordingNotifier) -> Harness {
        let store = Arc::new(MemoryUserStore::new());
        let notifier = Arc::new(notifier);
        let clock = Arc::new(FixedClock::new(OffsetDateTime::now_utc()));
        let keys = SessionKeys::from_config(&JwtConfig {
            secret: "test-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            ttl_minutes: 7 * 24 * 60,
        });
        let service = IdentityService::new(
            store.clone(),
            notifier.clone(),
            keys,
            clock.clone(),
            config,
        );
        Harness {
            service,
            store,
            notifier,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with(test_config(), RecordingNotifier::default())
    }

    fn account(email: &str, password: &str) -> NewAccount {
        NewAccount {
            email: email.into(),
            password: password.into(),
            first_name: "Ann".into(),
            last_name: "Lee".into(),
            phone_number: "+15550001111".into(),
        }
    }

    fn creds(email: &str, password: &str) -> Credentials {
        Credentials {
            email: email.into(),
            password: password.into(),
        }
    }

    fn verification_token(h: &Harness) -> String {
        h.notifier
            .sent()
            .into_iter()
            .find_map(|m| match m {
                Sent::Verification { token, .. } => Some(token),
                _ => None,
            })
            .expect("verification email sent")
    }

    fn last_reset_token(h: &Harness) -> String {
        let url = h
            .notifier
            .sent()
            .into_iter()
            .rev()
            .find_map(|m| match m {
                Sent::ResetRequest { reset_url, .. } => Some(reset_url),
                _ => None,
            })
            .expect("reset email sent");
        url.rsplit('/').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn sign_up_creates_unverified_account_with_24h_token() {
        let h = harness();
        let now = h.clock.now();

        let out = h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        assert_eq!(out.user.email, "a@x.com");
        assert!(!out.user.is_verified);

        let claims = h.service.authenticate(out.session.as_deref().unwrap()).unwrap();
        assert_eq!(claims.sub, out.user.id);
        assert_eq!(claims.first_name, "Ann");

        let stored = h.store.find_by_email("a@x.com").await.unwrap().unwrap();
        let token = verification_token(&h);
        assert_eq!(stored.verification_token.as_deref(), Some(token.as_str()));
        assert_eq!(
            stored.verification_token_expires_at,
            Some(now + Duration::hours(24))
        );
        assert_ne!(stored.password_hash, "P@ss1234");
        assert!(password::verify_password("P@ss1234", &stored.password_hash).unwrap());
    }

    #[tokio::test]
    async fn sign_up_normalizes_email() {
        let h = harness();
        let out = h.service.sign_up(account(" A@X.com", "P@ss1234")).await.unwrap();
        assert_eq!(out.user.email, "a@x.com");
    }

    #[tokio::test]
    async fn duplicate_sign_up_fails_and_leaves_record_untouched() {
        let h = harness();
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        let before = h.store.find_by_email("a@x.com").await.unwrap().unwrap();

        let err = h
            .service
            .sign_up(account("a@x.com", "Other@123"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AlreadyExists));

        let after = h.store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(h.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn sign_up_survives_email_failure() {
        let h = harness_with(test_config(), RecordingNotifier::failing());
        let out = h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        assert!(h.store.find_by_id(out.user.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn strict_policy_withholds_session_until_verified() {
        let config = IdentityConfig {
            session_policy: SessionPolicy::AfterVerification,
            ..test_config()
        };
        let h = harness_with(config, RecordingNotifier::default());

        let out = h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        assert!(out.session.is_none());

        let err = h
            .service
            .sign_in(creds("a@x.com", "P@ss1234"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotVerified));

        h.service.verify_email(&verification_token(&h)).await.unwrap();
        assert!(h.service.sign_in(creds("a@x.com", "P@ss1234")).await.is_ok());
    }

    #[tokio::test]
    async fn verify_email_marks_verified_and_sends_welcome() {
        let h = harness();
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        let token = verification_token(&h);

        let user = h.service.verify_email(&token).await.unwrap();
        assert!(user.is_verified);

        let stored = h.store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.verification_token.is_none());
        assert!(stored.verification_token_expires_at.is_none());
        assert!(h.notifier.sent().contains(&Sent::Welcome {
            email: "a@x.com".into(),
            first_name: "Ann".into(),
        }));
    }

    #[tokio::test]
    async fn verification_token_cannot_be_used_twice() {
        let h = harness();
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        let token = verification_token(&h);

        h.service.verify_email(&token).await.unwrap();
        let err = h.service.verify_email(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn expired_verification_token_is_rejected() {
        let h = harness();
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        let token = verification_token(&h);

        h.clock.set(h.clock.now() + Duration::hours(24));
        let err = h.service.verify_email(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));

        let stored = h.store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert!(!stored.is_verified);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_verification_succeeds_once() {
        let h = harness();
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        let token = verification_token(&h);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = h.service.clone();
                let token = token.clone();
                tokio::spawn(async move { service.verify_email(&token).await })
            })
            .collect();

        let mut wins = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => wins += 1,
                Err(AuthError::InvalidOrExpiredToken) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(wins, 1);
        let welcomes = h
            .notifier
            .sent()
            .into_iter()
            .filter(|m| matches!(m, Sent::Welcome { .. }))
            .count();
        assert_eq!(welcomes, 1);
    }

    #[tokio::test]
    async fn sign_in_does_not_reveal_which_part_was_wrong() {
        let h = harness();
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();

        let wrong_password = h
            .service
            .sign_in(creds("a@x.com", "Wrong@123"))
            .await
            .unwrap_err();
        let unknown_email = h
            .service
            .sign_in(creds("nobody@x.com", "P@ss1234"))
            .await
            .unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_email, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert_eq!(wrong_password.status(), unknown_email.status());
    }

    #[tokio::test]
    async fn sign_in_records_last_login() {
        let h = harness();
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        let login_at = h.clock.now() + Duration::minutes(5);
        h.clock.set(login_at);

        let out = h.service.sign_in(creds("A@x.com", "P@ss1234")).await.unwrap();
        assert_eq!(out.user.last_login_at, Some(login_at));
        let claims = h.service.authenticate(&out.session).unwrap();
        assert_eq!(claims.email, "a@x.com");
    }

    #[tokio::test]
    async fn sign_out_clears_the_session() {
        let h = harness();
        assert_eq!(h.service.sign_out(), SessionInstruction::Clear);
    }

    #[tokio::test]
    async fn forgot_password_sets_one_hour_token_and_mails_link() {
        let h = harness();
        let now = h.clock.now();
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();

        h.service.forgot_password("a@x.com").await.unwrap();

        let stored = h.store.find_by_email("a@x.com").await.unwrap().unwrap();
        let token = stored.reset_password_token.clone().unwrap();
        assert_eq!(stored.reset_password_expires_at, Some(now + Duration::hours(1)));
        assert!(h.notifier.sent().contains(&Sent::ResetRequest {
            email: "a@x.com".into(),
            reset_url: format!("http://app.test/reset-password/{token}"),
        }));
    }

    #[tokio::test]
    async fn forgot_password_for_unknown_email_is_silent_by_default() {
        let h = harness();
        h.service.forgot_password("nobody@x.com").await.unwrap();
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn forgot_password_can_disclose_unknown_email() {
        let config = IdentityConfig {
            disclose_unknown_email: true,
            ..test_config()
        };
        let h = harness_with(config, RecordingNotifier::default());
        let err = h.service.forgot_password("nobody@x.com").await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }

    #[tokio::test]
    async fn forgot_password_surfaces_delivery_failure() {
        let h = harness_with(test_config(), RecordingNotifier::failing());
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();

        let err = h.service.forgot_password("a@x.com").await.unwrap_err();
        assert!(matches!(err, AuthError::Notification(_)));
    }

    #[tokio::test]
    async fn reset_token_expires_exactly_at_its_ttl() {
        let h = harness();
        let start = h.clock.now();
        let ms = Duration::milliseconds(1);
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        h.service.sign_up(account("b@x.com", "P@ss1234")).await.unwrap();

        h.service.forgot_password("a@x.com").await.unwrap();
        let token_a = last_reset_token(&h);
        h.service.forgot_password("b@x.com").await.unwrap();
        let token_b = last_reset_token(&h);
        let expires_at = start + Duration::hours(1);

        h.clock.set(expires_at - ms);
        h.service
            .reset_password(&token_a, NewPassword("NewP@ss1".into()))
            .await
            .unwrap();

        h.clock.set(expires_at + ms);
        let err = h
            .service
            .reset_password(&token_b, NewPassword("NewP@ss1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn reset_password_replaces_credentials() {
        let h = harness();
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        let before = h.store.find_by_email("a@x.com").await.unwrap().unwrap();
        h.service.forgot_password("a@x.com").await.unwrap();
        let token = last_reset_token(&h);

        h.service
            .reset_password(&token, NewPassword("NewP@ss1".into()))
            .await
            .unwrap();

        let after = h.store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_ne!(before.password_hash, after.password_hash);
        assert!(after.reset_password_token.is_none());
        assert!(after.reset_password_expires_at.is_none());
        assert!(h.notifier.sent().contains(&Sent::ResetSuccess {
            email: "a@x.com".into()
        }));

        assert!(h.service.sign_in(creds("a@x.com", "NewP@ss1")).await.is_ok());
        let err = h
            .service
            .sign_in(creds("a@x.com", "P@ss1234"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let replay = h
            .service
            .reset_password(&token, NewPassword("Again@123".into()))
            .await
            .unwrap_err();
        assert!(matches!(replay, AuthError::InvalidOrExpiredToken));
    }

    #[tokio::test]
    async fn newer_reset_request_supersedes_older() {
        let h = harness();
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        h.service.forgot_password("a@x.com").await.unwrap();
        let first = last_reset_token(&h);
        h.service.forgot_password("a@x.com").await.unwrap();
        let second = last_reset_token(&h);
        assert_ne!(first, second);

        let err = h
            .service
            .reset_password(&first, NewPassword("NewP@ss1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidOrExpiredToken));
        h.service
            .reset_password(&second, NewPassword("NewP@ss1".into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reset_does_not_disturb_pending_verification() {
        let h = harness();
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        let verification = verification_token(&h);
        h.service.forgot_password("a@x.com").await.unwrap();
        h.service
            .reset_password(&last_reset_token(&h), NewPassword("NewP@ss1".into()))
            .await
            .unwrap();

        assert!(h.service.verify_email(&verification).await.is_ok());
    }

    #[tokio::test]
    async fn check_auth_resolves_session_owner() {
        let h = harness();
        let out = h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();
        let claims = h.service.authenticate(out.session.as_deref().unwrap()).unwrap();

        let user = h.service.check_auth(&claims).await.unwrap();
        assert_eq!(user.id, out.user.id);

        let ghost = SessionClaims {
            sub: Uuid::new_v4(),
            ..claims
        };
        assert!(matches!(
            h.service.check_auth(&ghost).await.unwrap_err(),
            AuthError::NotFound
        ));
    }

    #[tokio::test]
    async fn authenticate_rejects_garbage() {
        let h = harness();
        assert!(matches!(
            h.service.authenticate("not.a.jwt").unwrap_err(),
            AuthError::InvalidSession
        ));
    }

    #[tokio::test]
    async fn background_delivery_does_not_block_and_still_sends() {
        let config = IdentityConfig {
            delivery: DeliveryConfig::default(),
            ..test_config()
        };
        let h = harness_with(config, RecordingNotifier::default());
        h.service.sign_up(account("a@x.com", "P@ss1234")).await.unwrap();

        for _ in 0..100 {
            if !h.notifier.sent().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(matches!(
            h.notifier.sent().first(),
            Some(Sent::Verification { .. })
        ));
    }
}
