// src/services/reddit.rs

//! Content provider client.
//!
//! Searches one subreddit per request through the OAuth API. All requests made
//! through one client share a single rate limiter, so every fetcher of every
//! concurrent run stays under the same provider-wide ceiling.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Post, RedditConfig, SourceFilter};
use crate::utils::{endpoint, http};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Header carrying the number of seconds until the rate-limit window resets.
const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

/// Refresh the access token this long before it actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostPage {
    pub posts: Vec<Post>,
    /// Identifier of the newest post on the page, if the page was not empty.
    pub next_cursor: Option<String>,
}

/// Source of posts for the fetcher.
#[async_trait]
pub trait PostProvider: Send + Sync {
    /// Wait for a request slot under any provider-wide ceiling.
    ///
    /// Callers take one slot before every `fetch_page`. The wait is kept out
    /// of the page budget because it depends on every other fetcher sharing
    /// the provider.
    async fn acquire(&self) {}

    /// Fetch the page of posts newer than `cursor` for one source.
    ///
    /// Throttling surfaces as `AppError::RateLimited`, server failures as
    /// `AppError::ProviderUnavailable`.
    async fn fetch_page(
        &self,
        keyword: &str,
        source: &SourceFilter,
        cursor: Option<&str>,
    ) -> Result<PostPage>;
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: u64,
}

fn default_token_lifetime() -> u64 {
    3600
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    refresh_at: Instant,
}

/// Reddit search client with client-credentials authentication.
pub struct RedditClient {
    config: RedditConfig,
    client: Client,
    limiter: Arc<DirectRateLimiter>,
    token: Mutex<Option<AccessToken>>,
}

impl RedditClient {
    /// Create a client from configuration.
    pub fn new(config: RedditConfig) -> Result<Self> {
        let client = http::create_async_client(&config)?;
        let limiter = Arc::new(RateLimiter::direct(Self::quota(config.requests_per_minute)?));
        Ok(Self {
            config,
            client,
            limiter,
            token: Mutex::new(None),
        })
    }

    /// Evenly spaced quota with no burst, so the ceiling holds at any instant.
    fn quota(requests_per_minute: u32) -> Result<Quota> {
        let per_minute = NonZeroU32::new(requests_per_minute)
            .ok_or_else(|| AppError::config("reddit.requests_per_minute must be > 0"))?;
        let period = Duration::from_secs(60) / per_minute.get();
        Quota::with_period(period)
            .ok_or_else(|| AppError::config("reddit.requests_per_minute is too large"))
    }

    /// Return a cached access token, fetching a new one when missing or stale.
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        log::debug!("Requesting provider access token");
        let response = self
            .client
            .post(&self.config.auth_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                truncate(&body)
            )));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in);
        let refresh_at = Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(AccessToken {
            value: token.access_token.clone(),
            refresh_at,
        });
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    fn search_query(
        &self,
        keyword: &str,
        source: &SourceFilter,
        cursor: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("q", keyword.to_string()),
            ("limit", self.config.page_limit.to_string()),
            ("sort", source.sort.as_str().to_string()),
        ];
        if source.restrict_to_source {
            query.push(("restrict_sr", "1".to_string()));
        }
        if source.include_nsfw {
            query.push(("include_over_18", "on".to_string()));
        }
        if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
            query.push(("before", cursor.to_string()));
        }
        query
    }

    /// Map a non-success response onto the error taxonomy.
    async fn status_error(&self, response: Response) -> AppError {
        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => AppError::RateLimited {
                retry_after: http::header_seconds(response.headers(), RATE_LIMIT_RESET_HEADER),
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                if status == StatusCode::UNAUTHORIZED {
                    self.invalidate_token().await;
                }
                AppError::Auth(format!("search returned HTTP {}", status.as_u16()))
            }
            s if s.is_server_error() => AppError::ProviderUnavailable {
                status: s.as_u16(),
            },
            s => {
                let body = response.text().await.unwrap_or_default();
                AppError::provider(s.as_u16(), truncate(&body))
            }
        }
    }
}

#[async_trait]
impl PostProvider for RedditClient {
    async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    async fn fetch_page(
        &self,
        keyword: &str,
        source: &SourceFilter,
        cursor: Option<&str>,
    ) -> Result<PostPage> {
        let token = self.access_token().await?;
        let url = endpoint(
            &self.config.api_base_url,
            &format!("r/{}/search", source.name),
        )?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(&self.search_query(keyword, source, cursor))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        let listing: Listing = response.json().await?;
        let posts: Vec<Post> = listing.data.children.into_iter().map(|c| c.data).collect();
        let next_cursor = posts.first().map(Post::cursor);

        log::debug!(
            "r/{}: {} posts after {:?}",
            source.name,
            posts.len(),
            cursor
        );
        Ok(PostPage { posts, next_cursor })
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(200).collect()
}
