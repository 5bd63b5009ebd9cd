// src/models/config.rs

//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP API listener
    #[serde(default)]
    pub server: ServerConfig,

    /// Relational store connection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Content provider credentials and request behavior
    #[serde(default)]
    pub reddit: RedditConfig,

    /// Per-source pagination and rate-limit policy
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Notification retry policy and message settings
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Whole-run budgets
    #[serde(default)]
    pub run: RunConfig,

    /// Notification sink selection
    #[serde(default)]
    pub mailer: MailerConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.reddit.user_agent.trim().is_empty() {
            return Err(AppError::validation("reddit.user_agent is empty"));
        }
        if self.reddit.timeout_secs == 0 {
            return Err(AppError::validation("reddit.timeout_secs must be > 0"));
        }
        if self.reddit.requests_per_minute == 0 {
            return Err(AppError::validation(
                "reddit.requests_per_minute must be > 0",
            ));
        }
        if self.reddit.page_limit == 0 || self.reddit.page_limit > 100 {
            return Err(AppError::validation(
                "reddit.page_limit must be between 1 and 100",
            ));
        }
        if self.fetch.max_pages == 0 {
            return Err(AppError::validation("fetch.max_pages must be > 0"));
        }
        if self.fetch.max_concurrent == 0 {
            return Err(AppError::validation("fetch.max_concurrent must be > 0"));
        }
        if self.fetch.rate_limit_attempts == 0 {
            return Err(AppError::validation(
                "fetch.rate_limit_attempts must be > 0",
            ));
        }
        if self.notify.max_attempts == 0 {
            return Err(AppError::validation("notify.max_attempts must be > 0"));
        }
        if self.notify.multiplier < 1.0 {
            return Err(AppError::validation("notify.multiplier must be >= 1.0"));
        }
        if self.run.commit_attempts == 0 {
            return Err(AppError::validation("run.commit_attempts must be > 0"));
        }
        if self.database.url.trim().is_empty() {
            return Err(AppError::validation("database.url is empty"));
        }
        match &self.mailer {
            MailerConfig::Resend(resend) => {
                if resend.api_key.trim().is_empty() {
                    return Err(AppError::validation("mailer.api_key is empty"));
                }
                if resend.sender.trim().is_empty() {
                    return Err(AppError::validation("mailer.sender is empty"));
                }
            }
            MailerConfig::Gmail(gmail) => {
                if gmail.app_password.trim().is_empty() {
                    return Err(AppError::validation("mailer.app_password is empty"));
                }
                if gmail.sender.trim().is_empty() {
                    return Err(AppError::validation("mailer.sender is empty"));
                }
                if gmail.smtp_host.trim().is_empty() {
                    return Err(AppError::validation("mailer.smtp_host is empty"));
                }
            }
            MailerConfig::Log => {}
        }
        Ok(())
    }
}

/// HTTP API listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::host")]
    pub host: String,

    #[serde(default = "defaults::port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::host(),
            port: defaults::port(),
        }
    }
}

impl ServerConfig {
    /// Socket address string for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL
    #[serde(default = "defaults::database_url")]
    pub url: String,

    /// Pool size shared by all runs and API handlers
    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: defaults::database_url(),
            max_connections: defaults::max_connections(),
        }
    }
}

/// Content provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    /// OAuth2 client id
    #[serde(default)]
    pub client_id: String,

    /// OAuth2 client secret
    #[serde(default)]
    pub client_secret: String,

    /// User-Agent header for API requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Base URL for authenticated API calls
    #[serde(default = "defaults::api_base_url")]
    pub api_base_url: String,

    /// Token endpoint for the client-credentials grant
    #[serde(default = "defaults::auth_url")]
    pub auth_url: String,

    /// Posts requested per page
    #[serde(default = "defaults::page_limit")]
    pub page_limit: u32,

    /// Aggregate request ceiling shared by every fetcher
    #[serde(default = "defaults::requests_per_minute")]
    pub requests_per_minute: u32,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: defaults::user_agent(),
            api_base_url: defaults::api_base_url(),
            auth_url: defaults::auth_url(),
            page_limit: defaults::page_limit(),
            requests_per_minute: defaults::requests_per_minute(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Pagination and rate-limit behavior of a single source fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Iteration cap per source and run
    #[serde(default = "defaults::max_pages")]
    pub max_pages: u32,

    /// Sources fetched concurrently within one run
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Attempts per page while the provider keeps throttling
    #[serde(default = "defaults::rate_limit_attempts")]
    pub rate_limit_attempts: u32,

    /// Delay used when the provider gives no reset hint
    #[serde(default = "defaults::rate_limit_fallback")]
    pub rate_limit_fallback_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_pages: defaults::max_pages(),
            max_concurrent: defaults::max_concurrent(),
            rate_limit_attempts: defaults::rate_limit_attempts(),
            rate_limit_fallback_secs: defaults::rate_limit_fallback(),
        }
    }
}

/// Notification delivery policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "defaults::notify_initial_delay")]
    pub initial_delay_secs: u64,

    #[serde(default = "defaults::notify_multiplier")]
    pub multiplier: f64,

    #[serde(default = "defaults::notify_max_delay")]
    pub max_delay_secs: u64,

    #[serde(default = "defaults::notify_max_attempts")]
    pub max_attempts: u32,

    /// Budget for a single send attempt
    #[serde(default = "defaults::send_timeout")]
    pub send_timeout_secs: u64,

    /// Prepended to the keyword in the subject line
    #[serde(default = "defaults::subject_prefix")]
    pub subject_prefix: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: defaults::notify_initial_delay(),
            multiplier: defaults::notify_multiplier(),
            max_delay_secs: defaults::notify_max_delay(),
            max_attempts: defaults::notify_max_attempts(),
            send_timeout_secs: defaults::send_timeout(),
            subject_prefix: defaults::subject_prefix(),
        }
    }
}

/// Whole-run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Wall-clock budget for one run
    #[serde(default = "defaults::run_timeout")]
    pub timeout_secs: u64,

    /// Attempts for the queue-drain + cursor-advance transaction
    #[serde(default = "defaults::commit_attempts")]
    pub commit_attempts: u32,

    /// How long `serve` waits for in-flight runs on shutdown
    #[serde(default = "defaults::shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::run_timeout(),
            commit_attempts: defaults::commit_attempts(),
            shutdown_grace_secs: defaults::shutdown_grace(),
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Notification sink, selected once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum MailerConfig {
    /// Resend HTTP API
    Resend(ResendConfig),
    /// Gmail SMTP with an app password
    Gmail(GmailConfig),
    /// Render and log only
    #[default]
    Log,
}

impl MailerConfig {
    /// Whether digests actually leave the process.
    ///
    /// The log sink still counts as a successful send, so queued posts are
    /// drained and cursors advance without anyone receiving mail.
    pub fn delivers(&self) -> bool {
        !matches!(self, MailerConfig::Log)
    }
}

/// Resend credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResendConfig {
    #[serde(default)]
    pub api_key: String,

    /// From address
    pub sender: String,

    #[serde(default = "defaults::resend_base_url")]
    pub api_base_url: String,
}

/// Gmail SMTP credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    /// From address, also the SMTP login
    pub sender: String,

    #[serde(default)]
    pub app_password: String,

    #[serde(default = "defaults::smtp_host")]
    pub smtp_host: String,

    /// STARTTLS submission port
    #[serde(default = "defaults::smtp_port")]
    pub smtp_port: u16,
}

mod defaults {
    // Server defaults
    pub fn host() -> String {
        "127.0.0.1".into()
    }
    pub fn port() -> u16 {
        8080
    }

    // Database defaults
    pub fn database_url() -> String {
        "sqlite://data/digester.db?mode=rwc".into()
    }
    pub fn max_connections() -> u32 {
        5
    }

    // Provider defaults
    pub fn user_agent() -> String {
        "digester/0.1 (keyword digest mailer)".into()
    }
    pub fn api_base_url() -> String {
        "https://oauth.reddit.com".into()
    }
    pub fn auth_url() -> String {
        "https://www.reddit.com/api/v1/access_token".into()
    }
    pub fn page_limit() -> u32 {
        10
    }
    pub fn requests_per_minute() -> u32 {
        // 100 req/min published; stay just below
        96
    }
    pub fn timeout() -> u64 {
        30
    }

    // Fetch defaults
    pub fn max_pages() -> u32 {
        10
    }
    pub fn max_concurrent() -> usize {
        4
    }
    pub fn rate_limit_attempts() -> u32 {
        5
    }
    pub fn rate_limit_fallback() -> u64 {
        30
    }

    // Notify defaults
    pub fn notify_initial_delay() -> u64 {
        5
    }
    pub fn notify_multiplier() -> f64 {
        2.0
    }
    pub fn notify_max_delay() -> u64 {
        30
    }
    pub fn notify_max_attempts() -> u32 {
        3
    }
    pub fn send_timeout() -> u64 {
        60
    }
    pub fn subject_prefix() -> String {
        "[digest]".into()
    }

    // Run defaults
    pub fn run_timeout() -> u64 {
        900
    }
    pub fn commit_attempts() -> u32 {
        3
    }
    pub fn shutdown_grace() -> u64 {
        30
    }

    // Mailer defaults
    pub fn resend_base_url() -> String {
        "https://api.resend.com".into()
    }
    pub fn smtp_host() -> String {
        "smtp.gmail.com".into()
    }
    pub fn smtp_port() -> u16 {
        587
    }
}
