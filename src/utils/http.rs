// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::error::Result;
use crate::models::RedditConfig;

/// Create a configured asynchronous HTTP client for provider calls.
pub fn create_async_client(config: &RedditConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// Create a client with only a request timeout, for notification sinks.
pub fn create_plain_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Parse a numeric seconds header such as `X-Ratelimit-Reset` or `Retry-After`.
///
/// Fractional values are rounded up. Missing, malformed or zero values yield `None`.
pub fn header_seconds(headers: &HeaderMap, name: &str) -> Option<Duration> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    let seconds: f64 = value.parse().ok()?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Some(Duration::from_secs(seconds.ceil() as u64))
}
