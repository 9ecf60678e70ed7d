//! Outbound user email.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::crypto::{CryptoError, SecretBox};
use crate::retry::{retry_with_backoff, RetryConfig, Retryable};
use crate::state::UserRecord;

pub const INACTIVITY_SUBJECT: &str = "account inactivity notice";
pub const UPDATE_FAILED_SUBJECT: &str = "database update error notice";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("User {0} has no email address on file")]
    NoAddress(String),

    #[error("Failed to decrypt email address: {0}")]
    Crypto(#[from] CryptoError),

    #[error("HTTP error {status} from mail relay")]
    HttpStatus { status: u16 },

    #[error("HTTP error contacting mail relay: {0}")]
    Http(#[from] reqwest::Error),
}

impl Retryable for NotifyError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::HttpStatus { status } => *status == 429 || *status >= 500,
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            Self::NoAddress(_) | Self::Crypto(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError>;
}

/// Logs messages instead of sending them. Used when no relay is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError> {
        tracing::info!(
            subject = %message.subject,
            "Mail relay not configured, notice not delivered"
        );
        Ok(())
    }
}

/// POSTs each message as JSON to an HTTP mail relay.
pub struct RelayMailer {
    http: Client,
    endpoint: String,
    retry: RetryConfig,
}

impl RelayMailer {
    pub fn new(endpoint: String, timeout: Duration, retry: RetryConfig) -> Result<Self, NotifyError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            retry,
        })
    }
}

#[async_trait]
impl Mailer for RelayMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError> {
        retry_with_backoff(&self.retry, "mail relay", || async {
            let resp = self.http.post(&self.endpoint).json(message).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(NotifyError::HttpStatus {
                    status: status.as_u16(),
                });
            }
            Ok(())
        })
        .await
    }
}

/// Addresses notices to users. Failures are logged and never propagate
/// into the sync.
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    cipher: Arc<SecretBox>,
    from: String,
    site_url: String,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, cipher: Arc<SecretBox>, from: String, site_url: String) -> Self {
        Self {
            mailer,
            cipher,
            from,
            site_url,
        }
    }

    pub async fn send_notice(&self, user: &UserRecord, subject: &str, body: &str) {
        match self.deliver(user, subject, body).await {
            Ok(()) => tracing::info!(username = %user.username, subject, "Sent notice"),
            Err(e) => tracing::warn!(
                username = %user.username,
                subject,
                error = %e,
                "Failed to send notice"
            ),
        }
    }

    async fn deliver(&self, user: &UserRecord, subject: &str, body: &str) -> Result<(), NotifyError> {
        let encrypted = user
            .email_encrypted
            .as_deref()
            .ok_or_else(|| NotifyError::NoAddress(user.username.clone()))?;
        let message = MailMessage {
            from: self.from.clone(),
            to: self.cipher.decrypt(encrypted)?,
            subject: subject.to_string(),
            html: render_html(&user.username, body, &self.site_url),
        };
        self.mailer.send(&message).await
    }
}

/// Notice sent once a user has been idle for `idle_secs`.
pub fn inactivity_body(idle_secs: i64) -> String {
    format!(
        "you have not used this service for {} or more consecutive days. your account \
         has been marked inactive and new activity will not sync to your database until \
         you log in again",
        idle_secs / 86_400
    )
}

pub fn update_failed_body(reason: &str) -> String {
    format!("your database could not be updated because: {reason}. please resolve this soon")
}

fn render_html(username: &str, body: &str, site_url: &str) -> String {
    format!(
        "<span>u/{}</span><br/><br/><b>{}</b><br/><br/><a href=\"{}\" target=\"_blank\">{}</a>",
        escape_html(username),
        escape_html(body),
        escape_html(site_url),
        escape_html(site_url),
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
