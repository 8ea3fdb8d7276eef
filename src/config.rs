use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

use crate::auth::password;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// When a session token is handed out relative to email verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPolicy {
    /// Signup already yields a session; unverified accounts may sign in.
    Immediate,
    /// No session at signup; sign-in requires a verified email.
    AfterVerification,
}

impl FromStr for SessionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "after-verification" | "after_verification" => Ok(Self::AfterVerification),
            other => anyhow::bail!("unknown session policy: {other}"),
        }
    }
}

/// How an operation waits on its notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Delivery {
    /// Spawned onto its own task; failures are only logged.
    Background,
    /// Awaited, failures logged and swallowed.
    BestEffort,
    /// Awaited, failures returned to the caller.
    Required,
}

impl FromStr for Delivery {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "background" => Ok(Self::Background),
            "best-effort" | "best_effort" => Ok(Self::BestEffort),
            "required" => Ok(Self::Required),
            other => anyhow::bail!("unknown delivery mode: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DeliveryConfig {
    pub verification: Delivery,
    pub welcome: Delivery,
    pub reset_request: Delivery,
    pub reset_success: Delivery,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            verification: Delivery::Background,
            welcome: Delivery::Background,
            reset_request: Delivery::Required,
            reset_success: Delivery::Background,
        }
    }
}

impl DeliveryConfig {
    /// Defaults overridden by `DELIVERY_VERIFICATION`, `DELIVERY_WELCOME`,
    /// `DELIVERY_RESET_REQUEST` and `DELIVERY_RESET_SUCCESS`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let mode = |key: &str, default: Delivery| -> anyhow::Result<Delivery> {
            match lookup(key) {
                Some(v) => v.parse().with_context(|| format!("invalid {key}")),
                None => Ok(default),
            }
        };
        Ok(Self {
            verification: mode("DELIVERY_VERIFICATION", defaults.verification)?,
            welcome: mode("DELIVERY_WELCOME", defaults.welcome)?,
            reset_request: mode("DELIVERY_RESET_REQUEST", defaults.reset_request)?,
            reset_success: mode("DELIVERY_RESET_SUCCESS", defaults.reset_success)?,
        })
    }
}

/// Business knobs of the identity state machine.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub verification_ttl_minutes: i64,
    pub reset_ttl_minutes: i64,
    pub hash_cost: u32,
    pub session_policy: SessionPolicy,
    pub disclose_unknown_email: bool,
    pub client_url: String,
    pub delivery: DeliveryConfig,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            verification_ttl_minutes: 24 * 60,
            reset_ttl_minutes: 60,
            hash_cost: 3,
            session_policy: SessionPolicy::Immediate,
            disclose_unknown_email: false,
            client_url: "http://localhost:5173".into(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl IdentityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        password::check_cost(self.hash_cost).context("invalid PASSWORD_HASH_COST")?;
        anyhow::ensure!(
            self.verification_ttl_minutes > 0 && self.reset_ttl_minutes > 0,
            "token lifetimes must be positive"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub identity: IdentityConfig,
    pub smtp: Option<SmtpConfig>,
    pub production: bool,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok();
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "identity".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "identity-users".into()),
            ttl_minutes: env_parse("SESSION_TTL_MINUTES", 7 * 24 * 60),
        };

        let defaults = IdentityConfig::default();
        let session_policy = match std::env::var("SESSION_POLICY") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.session_policy,
        };
        let identity = IdentityConfig {
            verification_ttl_minutes: env_parse(
                "VERIFICATION_TTL_MINUTES",
                defaults.verification_ttl_minutes,
            ),
            reset_ttl_minutes: env_parse("RESET_TTL_MINUTES", defaults.reset_ttl_minutes),
            hash_cost: env_parse("PASSWORD_HASH_COST", defaults.hash_cost),
            session_policy,
            disclose_unknown_email: env_parse("AUTH_DISCLOSE_UNKNOWN_EMAIL", false),
            client_url: std::env::var("CLIENT_URL").unwrap_or(defaults.client_url),
            delivery: DeliveryConfig::from_lookup(|key| std::env::var(key).ok())?,
        };
        identity.validate()?;

        let smtp = match std::env::var("SMTP_HOST") {
            Ok(host) => Some(SmtpConfig {
                host,
                port: env_parse("SMTP_PORT", 587),
                username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
                password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
                from_address: std::env::var("MAIL_FROM")
                    .context("MAIL_FROM must be set when SMTP_HOST is")?,
            }),
            Err(_) => None,
        };

        let production = std::env::var("APP_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);

        Ok(Self {
            database_url,
            jwt,
            identity,
            smtp,
            production,
        })
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
