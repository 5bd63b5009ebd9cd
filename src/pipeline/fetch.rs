// src/pipeline/fetch.rs

//! Cursor-paginated fetch loop for a single source.
//!
//! Pages are requested strictly in sequence because each request starts after
//! the newest post of the previous page. Every page is queued and its
//! provisional cursor recorded before the next request, so an interrupted
//! fetch resumes where it stopped instead of starting over.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{QueuedPost, SourceFilter};
use crate::pipeline::backoff::RateLimitPolicy;
use crate::services::{PostPage, PostProvider};
use crate::storage::Store;

/// Result of fetching one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub source_id: Uuid,
    pub source_name: String,
    /// Pages requested, including the final empty one
    pub pages: u32,
    /// Posts newly added to the queue
    pub queued: usize,
    /// Committed cursor the fetch started from
    pub previous_cursor: Option<String>,
    /// Provisional cursor reached; equals the start cursor when nothing new
    pub cursor: Option<String>,
}

impl FetchOutcome {
    /// Whether committing this outcome would move the source's cursor.
    pub fn advances(&self) -> bool {
        self.cursor.is_some() && self.cursor != self.previous_cursor
    }
}

/// Drives one source through successive provider pages.
#[derive(Clone)]
pub struct Fetcher {
    provider: Arc<dyn PostProvider>,
    store: Arc<dyn Store>,
    policy: RateLimitPolicy,
    max_pages: u32,
    page_timeout: Duration,
}

impl Fetcher {
    pub fn new(
        provider: Arc<dyn PostProvider>,
        store: Arc<dyn Store>,
        policy: RateLimitPolicy,
        max_pages: u32,
        page_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            policy,
            max_pages: max_pages.max(1),
            page_timeout,
        }
    }

    /// Page through `source` until a page comes back empty or the cap is hit.
    pub async fn fetch_source(
        &self,
        schedule_id: Uuid,
        keyword: &str,
        source: &SourceFilter,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        let previous_cursor = source.cursor.clone().filter(|c| !c.is_empty());
        let mut cursor = source.resume_cursor().map(str::to_string);
        let mut pages = 0;
        let mut queued = 0;

        if source.pending_cursor.is_some() {
            log::info!(
                "[{}] r/{}: resuming from pending cursor {:?}",
                schedule_id,
                source.name,
                cursor
            );
        }

        while pages < self.max_pages {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let current = cursor.as_deref();
            let page = self
                .policy
                .run(&source.name, cancel, || async move {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AppError::Cancelled),
                        _ = self.provider.acquire() => {}
                    }
                    self.fetch_page(keyword, source, current).await
                })
                .await?;
            pages += 1;

            if page.posts.is_empty() {
                break;
            }

            let batch: Vec<QueuedPost> = page
                .posts
                .into_iter()
                .map(|post| QueuedPost::new(schedule_id, source.id, post))
                .collect();
            queued += self.store.enqueue_posts(schedule_id, &batch).await?;

            match page.next_cursor {
                Some(next) => {
                    self.store.record_pending_cursor(source.id, &next).await?;
                    cursor = Some(next);
                }
                None => break,
            }
        }

        if pages == self.max_pages {
            log::debug!(
                "[{}] r/{}: stopped at page cap ({})",
                schedule_id,
                source.name,
                self.max_pages
            );
        }
        log::info!(
            "[{}] r/{}: {} new posts over {} pages",
            schedule_id,
            source.name,
            queued,
            pages
        );

        Ok(FetchOutcome {
            source_id: source.id,
            source_name: source.name.clone(),
            pages,
            queued,
            previous_cursor,
            cursor,
        })
    }

    /// One provider request under the page budget. Waiting for a request
    /// slot happens before this and is bounded by the run budget instead.
    async fn fetch_page(
        &self,
        keyword: &str,
        source: &SourceFilter,
        cursor: Option<&str>,
    ) -> Result<PostPage> {
        tokio::time::timeout(
            self.page_timeout,
            self.provider.fetch_page(keyword, source, cursor),
        )
        .await
        .map_err(|_| {
            AppError::timeout(format!(
                "page fetch for r/{} exceeded {:?}",
                source.name, self.page_timeout
            ))
        })?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::models::{Post, RecipientInput, Schedule, ScheduleInput, SourceInput, sample_post};
    use crate::storage::SqliteStore;

    /// Provider that replays scripted responses and records requested cursors.
    #[derive(Default)]
    pub struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<PostPage>>>,
        pub cursors: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedProvider {
        pub fn new(responses: Vec<Result<PostPage>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                cursors: Mutex::new(Vec::new()),
            }
        }
    }

    pub fn page(posts: Vec<Post>) -> Result<PostPage> {
        let next_cursor = posts.first().map(Post::cursor);
        Ok(PostPage { posts, next_cursor })
    }

    #[async_trait]
    impl PostProvider for ScriptedProvider {
        async fn fetch_page(
            &self,
            _keyword: &str,
            _source: &SourceFilter,
            cursor: Option<&str>,
        ) -> Result<PostPage> {
            self.cursors.lock().unwrap().push(cursor.map(str::to_string));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(PostPage::default()))
        }
    }

    pub async fn active_schedule(store: &SqliteStore) -> Schedule {
        let schedule = ScheduleInput {
            keyword: "rust".into(),
            cron_expression: "0 * * * *".into(),
            sources: vec![SourceInput {
                id: None,
                name: "golang".into(),
                sort: None,
                include_nsfw: false,
                restrict_to_source: false,
            }],
            recipients: vec![RecipientInput {
                id: None,
                address: "dev@example.com".into(),
            }],
        }
        .into_schedule()
        .unwrap();
        store.create_schedule(&schedule).await.unwrap();
        store.mark_active(schedule.id).await.unwrap();
        store
            .load_configuration_and_cursors(schedule.id)
            .await
            .unwrap()
    }

    fn fetcher(
        provider: Arc<ScriptedProvider>,
        store: Arc<SqliteStore>,
        max_pages: u32,
    ) -> Fetcher {
        Fetcher::new(
            provider,
            store,
            RateLimitPolicy {
                max_attempts: 3,
                fallback: Duration::from_millis(1),
            },
            max_pages,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_pages_until_empty_and_records_pending_cursor() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let schedule = active_schedule(&store).await;
        let provider = Arc::new(ScriptedProvider::new(vec![
            page(vec![sample_post("p3", 30.0), sample_post("p2", 20.0)]),
            page(vec![sample_post("p4", 40.0)]),
            page(vec![]),
        ]));

        let outcome = fetcher(provider.clone(), store.clone(), 10)
            .fetch_source(
                schedule.id,
                &schedule.keyword,
                &schedule.sources[0],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.queued, 3);
        assert_eq!(outcome.cursor.as_deref(), Some("t3_p4"));
        assert!(outcome.advances());
        assert_eq!(
            *provider.cursors.lock().unwrap(),
            vec![None, Some("t3_p3".into()), Some("t3_p4".into())]
        );

        let stored = store.get_schedule(schedule.id).await.unwrap();
        assert_eq!(stored.sources[0].cursor, None);
        assert_eq!(stored.sources[0].pending_cursor.as_deref(), Some("t3_p4"));
    }

    #[tokio::test]
    async fn test_stops_at_page_cap() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let schedule = active_schedule(&store).await;
        let provider = Arc::new(ScriptedProvider::new(vec![
            page(vec![sample_post("p1", 10.0)]),
            page(vec![sample_post("p2", 20.0)]),
            page(vec![sample_post("p3", 30.0)]),
        ]));

        let outcome = fetcher(provider.clone(), store.clone(), 2)
            .fetch_source(
                schedule.id,
                &schedule.keyword,
                &schedule.sources[0],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.pages, 2);
        assert_eq!(outcome.cursor.as_deref(), Some("t3_p2"));
        assert_eq!(provider.cursors.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resumes_from_pending_cursor() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let mut schedule = active_schedule(&store).await;
        schedule.sources[0].cursor = Some("t3_old".into());
        schedule.sources[0].pending_cursor = Some("t3_mid".into());
        let provider = Arc::new(ScriptedProvider::new(vec![page(vec![])]));

        let outcome = fetcher(provider.clone(), store.clone(), 10)
            .fetch_source(
                schedule.id,
                &schedule.keyword,
                &schedule.sources[0],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(*provider.cursors.lock().unwrap(), vec![Some("t3_mid".into())]);
        assert_eq!(outcome.cursor.as_deref(), Some("t3_mid"));
        assert!(outcome.advances());
    }

    #[tokio::test]
    async fn test_empty_first_page_keeps_cursor() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let mut schedule = active_schedule(&store).await;
        schedule.sources[0].cursor = Some("t3_p3".into());
        let provider = Arc::new(ScriptedProvider::new(vec![page(vec![])]));

        let outcome = fetcher(provider, store, 10)
            .fetch_source(
                schedule.id,
                &schedule.keyword,
                &schedule.sources[0],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.queued, 0);
        assert_eq!(outcome.cursor.as_deref(), Some("t3_p3"));
        assert!(!outcome.advances());
    }

    #[tokio::test]
    async fn test_throttling_beyond_bound_fails_source() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let schedule = active_schedule(&store).await;
        let throttled = || -> Result<PostPage> {
            Err(AppError::RateLimited { retry_after: None })
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            throttled(),
            throttled(),
            throttled(),
            page(vec![sample_post("late", 1.0)]),
        ]));

        let err = fetcher(provider.clone(), store, 10)
            .fetch_source(
                schedule.id,
                &schedule.keyword,
                &schedule.sources[0],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::RateLimitExhausted { attempts: 3, .. }
        ));
        assert_eq!(provider.cursors.lock().unwrap().len(), 3);
    }

    /// Provider whose request slots are scarce but whose answers are instant.
    struct QueuedSlotProvider {
        slot_wait: Duration,
        inner: ScriptedProvider,
    }

    #[async_trait]
    impl PostProvider for QueuedSlotProvider {
        async fn acquire(&self) {
            tokio::time::sleep(self.slot_wait).await;
        }

        async fn fetch_page(
            &self,
            keyword: &str,
            source: &SourceFilter,
            cursor: Option<&str>,
        ) -> Result<PostPage> {
            self.inner.fetch_page(keyword, source, cursor).await
        }
    }

    #[tokio::test]
    async fn test_waiting_for_a_slot_does_not_count_against_page_budget() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let schedule = active_schedule(&store).await;
        let provider = Arc::new(QueuedSlotProvider {
            slot_wait: Duration::from_millis(150),
            inner: ScriptedProvider::new(vec![page(vec![sample_post("p1", 1.0)]), page(vec![])]),
        });
        let fetcher = Fetcher::new(
            provider,
            store,
            RateLimitPolicy {
                max_attempts: 1,
                fallback: Duration::from_millis(1),
            },
            10,
            Duration::from_millis(50),
        );

        let outcome = fetcher
            .fetch_source(
                schedule.id,
                &schedule.keyword,
                &schedule.sources[0],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.queued, 1);
        assert_eq!(outcome.cursor.as_deref(), Some("t3_p1"));
    }

    #[tokio::test]
    async fn test_page_budget_still_bounds_the_request() {
        struct Hanging;

        #[async_trait]
        impl PostProvider for Hanging {
            async fn fetch_page(
                &self,
                _keyword: &str,
                _source: &SourceFilter,
                _cursor: Option<&str>,
            ) -> Result<PostPage> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(PostPage::default())
            }
        }

        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let schedule = active_schedule(&store).await;
        let fetcher = Fetcher::new(
            Arc::new(Hanging),
            store,
            RateLimitPolicy {
                max_attempts: 1,
                fallback: Duration::from_millis(1),
            },
            10,
            Duration::from_millis(50),
        );

        let err = fetcher
            .fetch_source(
                schedule.id,
                &schedule.keyword,
                &schedule.sources[0],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let schedule = active_schedule(&store).await;
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = fetcher(provider.clone(), store, 10)
            .fetch_source(schedule.id, &schedule.keyword, &schedule.sources[0], &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        assert!(provider.cursors.lock().unwrap().is_empty());
    }
}
