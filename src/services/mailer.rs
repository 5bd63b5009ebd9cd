// src/services/mailer.rs

//! Notification sinks.
//!
//! The concrete sink is picked once at startup from `[mailer]` configuration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::Client;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{GmailConfig, MailerConfig, ResendConfig};
use crate::utils::{endpoint, http};

/// Delivers a rendered digest to a list of recipients.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &[String], subject: &str, html: &str) -> Result<()>;
}

/// Build the sink selected by configuration.
pub fn build_mailer(config: &MailerConfig, timeout: Duration) -> Result<Arc<dyn Mailer>> {
    let mailer: Arc<dyn Mailer> = match config {
        MailerConfig::Resend(resend) => Arc::new(ResendMailer::new(resend.clone(), timeout)?),
        MailerConfig::Gmail(gmail) => Arc::new(GmailMailer::new(gmail.clone(), timeout)?),
        MailerConfig::Log => {
            log::warn!(
                "Mailer provider is 'log': digests are only logged, yet queued posts are \
                 drained and cursors advance. Configure [mailer] to deliver mail."
            );
            Arc::new(LogMailer)
        }
    };
    Ok(mailer)
}

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    html: &'a str,
}

/// Resend HTTP API sink.
pub struct ResendMailer {
    config: ResendConfig,
    client: Client,
}

impl ResendMailer {
    pub fn new(config: ResendConfig, timeout: Duration) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(AppError::config("mailer.api_key is required for resend"));
        }
        let client = http::create_plain_client(timeout)?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, to: &[String], subject: &str, html: &str) -> Result<()> {
        let url = endpoint(&self.config.api_base_url, "emails")?;
        let request = SendEmailRequest {
            from: &self.config.sender,
            to,
            subject,
            html,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(AppError::notification)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::notification(format!(
                "resend returned HTTP {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        log::info!("Digest '{}' sent to {} recipients", subject, to.len());
        Ok(())
    }
}

/// Gmail SMTP sink (STARTTLS with an app password).
pub struct GmailMailer {
    sender: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl GmailMailer {
    pub fn new(config: GmailConfig, timeout: Duration) -> Result<Self> {
        if config.app_password.is_empty() {
            return Err(AppError::config("mailer.app_password is required for gmail"));
        }
        let sender: Mailbox = config
            .sender
            .parse()
            .map_err(|e| AppError::config(format!("invalid mailer.sender: {e}")))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| AppError::config(format!("invalid mailer.smtp_host: {e}")))?
            .port(config.smtp_port)
            .credentials(Credentials::new(config.sender, config.app_password))
            .timeout(Some(timeout))
            .build();
        Ok(Self { sender, transport })
    }

    fn message(&self, to: &[String], subject: &str, html: &str) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(subject)
            .header(ContentType::TEXT_HTML);
        for address in to {
            let mailbox: Mailbox = address
                .parse()
                .map_err(|e| AppError::notification(format!("invalid recipient {address}: {e}")))?;
            builder = builder.to(mailbox);
        }
        builder.body(html.to_string()).map_err(AppError::notification)
    }
}

#[async_trait]
impl Mailer for GmailMailer {
    async fn send(&self, to: &[String], subject: &str, html: &str) -> Result<()> {
        let message = self.message(to, subject, html)?;
        self.transport
            .send(message)
            .await
            .map_err(AppError::notification)?;

        log::info!("Digest '{}' sent to {} recipients", subject, to.len());
        Ok(())
    }
}

/// Development sink that only logs what would have been sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &[String], subject: &str, html: &str) -> Result<()> {
        log::info!(
            "Mail '{}' to [{}] ({} bytes of HTML)",
            subject,
            to.join(", "),
            html.len()
        );
        log::debug!("{html}");
        Ok(())
    }
}
