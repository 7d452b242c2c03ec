use async_trait::async_trait;
use err_derive::Error;
use serde::{Deserialize, Serialize};
use serde_json::json;
use slog as log;
use std::sync::Arc;
use std::time::Duration;

const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";

fn default_sendgrid_url() -> String {
    SENDGRID_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EmailSettings {
    /// Without a key emails are only written to the log.
    #[serde(default)]
    pub sendgrid_api_key: Option<String>,
    pub from_address: String,
    #[serde(default = "default_sendgrid_url")]
    pub sendgrid_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum MailerError {
    #[error(display = "Email transport failed: {}", _0)]
    Transport(String),
    #[error(display = "Email provider answered with status {}", _0)]
    Rejected(u16),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailerError>;
}

/// Delivers mail through the SendGrid v3 HTTP API.
pub struct SendGridMailer {
    client: reqwest::Client,
    api_key: String,
    from_address: String,
    url: String,
}

impl SendGridMailer {
    pub fn new(settings: &EmailSettings, api_key: String) -> Result<Self, MailerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| MailerError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            api_key,
            from_address: settings.from_address.clone(),
            url: settings.sendgrid_url.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, email: Email) -> Result<(), MailerError> {
        let body = json!({
            "personalizations": [{"to": [{"email": email.to}]}],
            "from": {"email": self.from_address},
            "subject": email.subject,
            "content": [{"type": "text/plain", "value": email.body}],
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| MailerError::Transport(err.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(MailerError::Rejected(response.status().as_u16()))
        }
    }
}

/// Writes outgoing mail to the log instead of sending it.
pub struct LogMailer {
    logger: log::Logger,
}

impl LogMailer {
    pub fn new(logger: log::Logger) -> Self {
        Self { logger }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), MailerError> {
        log::info!(self.logger, "Email to {}: {}\n{}", email.to, email.subject, email.body);
        Ok(())
    }
}

pub fn from_settings(settings: &EmailSettings, logger: log::Logger) -> Result<Arc<dyn Mailer>, MailerError> {
    let logger = logger.new(log::o!("component" => "mailer"));
    match settings.sendgrid_api_key.as_ref().filter(|key| !key.is_empty()) {
        Some(key) => Ok(Arc::new(SendGridMailer::new(settings, key.clone())?)),
        None => {
            log::warn!(logger, "No sendgrid api key configured, emails will only be logged");
            Ok(Arc::new(LogMailer::new(logger)))
        }
    }
}

pub fn verification_email(to: &str, public_url: &str, token: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Verify your email address".to_string(),
        body: format!(
            "Confirm your email address by opening the link below.\n\n{}/verify_email?token={}\n",
            public_url.trim_end_matches('/'),
            token
        ),
    }
}

pub fn password_reset_email(to: &str, public_url: &str, token: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Reset your password".to_string(),
        body: format!(
            "Someone asked to reset the password of this account. If it was you, open the link below.\n\n{}/reset_password?token={}\n",
            public_url.trim_end_matches('/'),
            token
        ),
    }
}
