//! Outbound account emails.
//!
//! The four lifecycle messages go through the `Notifier` trait so the
//! identity service never touches SMTP directly.

use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::SmtpConfig;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid email address: {0}")]
    InvalidAddress(String),
    #[error("failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),
    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("delivery failed: {0}")]
    Other(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification(&self, email: &str, token: &str) -> Result<(), DeliveryError>;
    async fn send_welcome(&self, email: &str, first_name: &str) -> Result<(), DeliveryError>;
    async fn send_password_reset_request(
        &self,
        email: &str,
        reset_url: &str,
    ) -> Result<(), DeliveryError>;
    async fn send_password_reset_success(&self, email: &str) -> Result<(), DeliveryError>;
}

/// Plain-text bodies; templating happens outside this crate.
pub(crate) mod content {
    pub const VERIFICATION_SUBJECT: &str = "Verify your email";
    pub const WELCOME_SUBJECT: &str = "Welcome aboard";
    pub const RESET_REQUEST_SUBJECT: &str = "Reset your password";
    pub const RESET_SUCCESS_SUBJECT: &str = "Your password was reset";

    pub fn verification(token: &str) -> String {
        format!(
            "Your verification code is: {token}\n\n\
             Enter it on the verification page to activate your account. \
             The code expires in 24 hours."
        )
    }

    pub fn welcome(first_name: &str) -> String {
        format!("Hi {first_name},\n\nyour email is verified. Welcome!")
    }

    pub fn reset_request(reset_url: &str) -> String {
        format!(
            "We received a request to reset your password.\n\n\
             Follow this link to choose a new one: {reset_url}\n\n\
             The link expires in 1 hour. If you did not ask for this, ignore this email."
        )
    }

    pub fn reset_success() -> String {
        "Your password has been reset. If this wasn't you, contact support immediately."
            .to_string()
    }
}

/// SMTP delivery via lettre.
#[derive(Clone)]
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpNotifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }
        Ok(Self {
            mailer: builder.build(),
            from_address: config.from_address.clone(),
        })
    }

    async fn send_text(&self, to: &str, subject: &str, body: String) -> Result<(), DeliveryError> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| DeliveryError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| DeliveryError::InvalidAddress(to.to_string()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?;

        self.mailer.send(email).await?;

        info!(to = %to, subject = %subject, "email sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_verification(&self, email: &str, token: &str) -> Result<(), DeliveryError> {
        self.send_text(email, content::VERIFICATION_SUBJECT, content::verification(token))
            .await
    }

    async fn send_welcome(&self, email: &str, first_name: &str) -> Result<(), DeliveryError> {
        self.send_text(email, content::WELCOME_SUBJECT, content::welcome(first_name))
            .await
    }

    async fn send_password_reset_request(
        &self,
        email: &str,
        reset_url: &str,
    ) -> Result<(), DeliveryError> {
        self.send_text(
            email,
            content::RESET_REQUEST_SUBJECT,
            content::reset_request(reset_url),
        )
        .await
    }

    async fn send_password_reset_success(&self, email: &str) -> Result<(), DeliveryError> {
        self.send_text(email, content::RESET_SUCCESS_SUBJECT, content::reset_success())
            .await
    }
}

/// Used when no SMTP relay is configured. Logs the event, never the secret.
#[derive(Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_verification(&self, email: &str, _token: &str) -> Result<(), DeliveryError> {
        info!(to = %email, kind = "verification", "email delivery skipped (no smtp)");
        Ok(())
    }

    async fn send_welcome(&self, email: &str, _first_name: &str) -> Result<(), DeliveryError> {
        info!(to = %email, kind = "welcome", "email delivery skipped (no smtp)");
        Ok(())
    }

    async fn send_password_reset_request(
        &self,
        email: &str,
        _reset_url: &str,
    ) -> Result<(), DeliveryError> {
        info!(to = %email, kind = "reset_request", "email delivery skipped (no smtp)");
        Ok(())
    }

    async fn send_password_reset_success(&self, email: &str) -> Result<(), DeliveryError> {
        info!(to = %email, kind = "reset_success", "email delivery skipped (no smtp)");
        Ok(())
    }
}
