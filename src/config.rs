// src/config.rs

//! Configuration loading utilities.
//!
//! Settings come from a TOML file; secrets may instead be supplied through
//! environment variables, which take precedence over the file.

use std::env;
use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::{Config, MailerConfig};

pub const ENV_REDDIT_CLIENT_ID: &str = "DIGESTER_REDDIT_CLIENT_ID";
pub const ENV_REDDIT_CLIENT_SECRET: &str = "DIGESTER_REDDIT_CLIENT_SECRET";
pub const ENV_RESEND_API_KEY: &str = "DIGESTER_RESEND_API_KEY";
pub const ENV_GMAIL_APP_PASSWORD: &str = "DIGESTER_GMAIL_APP_PASSWORD";
pub const ENV_DATABASE_URL: &str = "DIGESTER_DATABASE_URL";

/// Load configuration from `path`, apply environment overrides and validate.
///
/// A missing file falls back to defaults; a malformed one is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        Config::load(path)
            .map_err(|e| AppError::config(format!("Failed to load {}: {e}", path.display())))?
    } else {
        log::warn!(
            "Config file {} not found, using defaults",
            path.display()
        );
        Config::default()
    };

    let config = apply_overrides(config, |key| env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Overlay values produced by `lookup` (normally the process environment).
pub fn apply_overrides<F>(mut config: Config, lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(client_id) = lookup(ENV_REDDIT_CLIENT_ID) {
        config.reddit.client_id = client_id;
    }
    if let Some(secret) = lookup(ENV_REDDIT_CLIENT_SECRET) {
        config.reddit.client_secret = secret;
    }
    if let Some(url) = lookup(ENV_DATABASE_URL) {
        config.database.url = url;
    }
    match &mut config.mailer {
        MailerConfig::Resend(resend) => {
            if let Some(api_key) = lookup(ENV_RESEND_API_KEY) {
                resend.api_key = api_key;
            }
        }
        MailerConfig::Gmail(gmail) => {
            if let Some(password) = lookup(ENV_GMAIL_APP_PASSWORD) {
                gmail.app_password = password;
            }
        }
        MailerConfig::Log => {}
    }
    config
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = Config::default();
        config.reddit.client_id = "from-file".into();

        let config = apply_overrides(
            config,
            lookup_from(&[
                (ENV_REDDIT_CLIENT_ID, "from-env"),
                (ENV_REDDIT_CLIENT_SECRET, "s3cret"),
                (ENV_DATABASE_URL, "sqlite::memory:"),
            ]),
        );

        assert_eq!(config.reddit.client_id, "from-env");
        assert_eq!(config.reddit.client_secret, "s3cret");
        assert_eq!(config.database.url, "sqlite::memory:");
    }

    #[test]
    fn test_blank_override_is_ignored() {
        let mut config = Config::default();
        config.reddit.client_id = "from-file".into();
        let config = apply_overrides(config, lookup_from(&[(ENV_REDDIT_CLIENT_ID, "  ")]));
        assert_eq!(config.reddit.client_id, "from-file");
    }

    #[test]
    fn test_resend_key_only_applies_to_resend_mailer() {
        let config = apply_overrides(
            Config::default(),
            lookup_from(&[(ENV_RESEND_API_KEY, "re_123")]),
        );
        assert!(matches!(config.mailer, MailerConfig::Log));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[fetch]
max_pages = 3

[mailer]
provider = "resend"
api_key = "re_test"
sender = "digest@example.com"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.fetch.max_pages, 3);
        match config.mailer {
            MailerConfig::Resend(resend) => assert_eq!(resend.sender, "digest@example.com"),
            other => panic!("expected resend mailer, got {other:?}"),
        }
    }

    #[test]
    fn test_gmail_password_from_environment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[mailer]
provider = "gmail"
sender = "digest@gmail.com"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        let config = apply_overrides(
            config,
            lookup_from(&[(ENV_GMAIL_APP_PASSWORD, "app-password")]),
        );
        assert!(config.validate().is_ok());
        match config.mailer {
            MailerConfig::Gmail(gmail) => assert_eq!(gmail.app_password, "app-password"),
            other => panic!("expected gmail mailer, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.fetch.max_pages, Config::default().fetch.max_pages);
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[fetch\nmax_pages = ").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(AppError::Config(_))
        ));
    }
}
