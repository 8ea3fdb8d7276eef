use crate::auth::{
    clock::{Clock, SystemClock},
    notify::{LogNotifier, Notifier, SmtpNotifier},
    repo::{MemoryUserStore, PgUserStore, UserStore},
    services::IdentityService,
    tokens::SessionKeys,
};
use crate::config::AppConfig;
use crate::db;
use anyhow::Context;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub identity: IdentityService,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let store: Arc<dyn UserStore> = match &config.database_url {
            Some(url) => Arc::new(PgUserStore::new(db::connect(url).await?)),
            None => {
                tracing::warn!("DATABASE_URL not set; accounts are kept in memory only");
                Arc::new(MemoryUserStore::new())
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.smtp {
            Some(smtp) => Arc::new(SmtpNotifier::new(smtp).context("configure SMTP relay")?),
            None => {
                tracing::warn!("SMTP_HOST not set; emails are logged instead of sent");
                Arc::new(LogNotifier)
            }
        };

        Ok(Self::from_parts(config, store, notifier, Arc::new(SystemClock)))
    }

    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn UserStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let keys = SessionKeys::from_config(&config.jwt);
        let identity =
            IdentityService::new(store, notifier, keys, clock, config.identity.clone());
        Self {
            config: Arc::new(config),
            identity,
        }
    }

    /// In-memory state with cheap hashing and awaited notifications.
    #[cfg(test)]
    pub fn for_tests(store: Arc<dyn UserStore>, notifier: Arc<dyn Notifier>) -> Self {
        use crate::config::{Delivery, DeliveryConfig, IdentityConfig, JwtConfig};

        let config = AppConfig {
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 60,
            },
            identity: IdentityConfig {
                hash_cost: 1,
                client_url: "http://app.test".into(),
                delivery: DeliveryConfig {
                    verification: Delivery::BestEffort,
                    welcome: Delivery::BestEffort,
                    reset_request: Delivery::Required,
                    reset_success: Delivery::BestEffort,
                },
                ..IdentityConfig::default()
            },
            smtp: None,
            production: false,
        };
        Self::from_parts(config, store, notifier, Arc::new(SystemClock))
    }
}
