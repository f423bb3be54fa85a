//! Outbound notifications.
//!
//! Senders render nothing themselves; they hand a template name and its
//! variables to a provider. `sandbox` asks the provider to validate the
//! message without delivering it.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MailConfig;

const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailError {
    /// The provider could not be reached.
    #[error("mail transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("mail provider rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Send `template` to one recipient. Returns the provider status code.
    async fn send(
        &self,
        template: &str,
        recipient_name: &str,
        recipient_address: &str,
        vars: &Value,
        sandbox: bool,
    ) -> Result<u16, MailError>;
}

/// SendGrid v3 dynamic-template sender.
///
/// Transport errors and 5xx answers are retried with exponential backoff;
/// 4xx answers are returned immediately.
#[derive(Debug, Clone)]
pub struct SendGridSender {
    client: reqwest::Client,
    api_key: String,
    from_address: String,
    from_name: String,
    max_retries: u32,
    initial_backoff: Duration,
}

impl SendGridSender {
    pub fn new(api_key: impl Into<String>, from_address: impl Into<String>, from_name: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            from_address: from_address.into(),
            from_name: from_name.into(),
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_retries(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    fn payload(&self, template: &str, recipient_name: &str, recipient_address: &str, vars: &Value, sandbox: bool) -> Value {
        json!({
            "personalizations": [{
                "to": [{ "email": recipient_address, "name": recipient_name }],
                "dynamic_template_data": vars,
            }],
            "from": { "email": self.from_address, "name": self.from_name },
            "template_id": template,
            "mail_settings": { "sandbox_mode": { "enable": sandbox } },
        })
    }
}

#[async_trait]
impl NotificationSender for SendGridSender {
    async fn send(
        &self,
        template: &str,
        recipient_name: &str,
        recipient_address: &str,
        vars: &Value,
        sandbox: bool,
    ) -> Result<u16, MailError> {
        let body = self.payload(template, recipient_name, recipient_address, vars, sandbox);
        let mut delay = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .client
                .post(SENDGRID_ENDPOINT)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let retryable = match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(template, attempt, status = resp.status().as_u16(), "notification accepted");
                    return Ok(resp.status().as_u16());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    let err = MailError::Rejected {
                        status: status.as_u16(),
                        body: text,
                    };
                    if !status.is_server_error() {
                        return Err(err);
                    }
                    err
                }
                Err(e) => MailError::Transport(e.to_string()),
            };

            if attempt > self.max_retries {
                return Err(retryable);
            }
            warn!(template, attempt, error = %retryable, "notification failed, retrying");
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
}

/// Logs the message instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct LogSender;

impl LogSender {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(
        &self,
        template: &str,
        recipient_name: &str,
        recipient_address: &str,
        vars: &Value,
        sandbox: bool,
    ) -> Result<u16, MailError> {
        info!(
            template,
            to = %recipient_address,
            name = %recipient_name,
            sandbox,
            vars = %vars,
            "notification (not delivered)"
        );
        Ok(202)
    }
}

/// A message captured by [`ScriptedSender`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentMessage {
    pub template: String,
    pub recipient_name: String,
    pub recipient_address: String,
    pub vars: Value,
    pub sandbox: bool,
}

/// Records every message. Can be told to fail.
#[derive(Debug, Default)]
pub struct ScriptedSender {
    sent: RwLock<Vec<SentMessage>>,
    failure: RwLock<Option<MailError>>,
}

impl ScriptedSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every following send with `err`; `None` restores success.
    pub fn fail_with(&self, err: Option<MailError>) {
        if let Ok(mut failure) = self.failure.write() {
            *failure = err;
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.read().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSender for ScriptedSender {
    async fn send(
        &self,
        template: &str,
        recipient_name: &str,
        recipient_address: &str,
        vars: &Value,
        sandbox: bool,
    ) -> Result<u16, MailError> {
        let failure = self
            .failure
            .read()
            .map_err(|_| MailError::Transport("lock poisoned".to_string()))?
            .clone();
        if let Some(err) = failure {
            return Err(err);
        }

        self.sent
            .write()
            .map_err(|_| MailError::Transport("lock poisoned".to_string()))?
            .push(SentMessage {
                template: template.to_string(),
                recipient_name: recipient_name.to_string(),
                recipient_address: recipient_address.to_string(),
                vars: vars.clone(),
                sandbox,
            });
        Ok(202)
    }
}

/// SendGrid when an API key is configured, otherwise the log sender.
pub fn from_config(config: &MailConfig) -> Box<dyn NotificationSender> {
    match &config.sendgrid_api_key {
        Some(key) => Box::new(SendGridSender::new(
            key.clone(),
            config.from_address.clone(),
            config.from_name.clone(),
        )),
        None => {
            warn!("SENDGRID_API_KEY not set; notifications are logged, not delivered");
            Box::new(LogSender::new())
        }
    }
}
