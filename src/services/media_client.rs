//! Cached, rate-limited access to the metadata provider.
//!
//! Every lookup goes through the same path:
//!
//! 1. Read the two-tier cache under the operation's deterministic key.
//! 2. On a miss, join or lead the single-flight for that key.
//! 3. The leader re-checks the cache, takes a rate-limiter token per attempt,
//!    calls the provider, retries transient failures with exponential backoff,
//!    validates the payload and only then writes it to the cache.
//!
//! Failures are shared with every waiter of the flight but never cached.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    db::cache::{CacheKey, TieredCache},
    error::{AppError, AppResult, FetchError},
    models::{
        Chart, MediaDetails, MediaKind, MediaRef, MediaSummary, TmdbDetails, TmdbListResponse,
        TrendingWindow,
    },
    services::{
        providers::MetadataProvider, rate_limiter::RateLimiter, single_flight::SingleFlight,
    },
};

/// Retry schedule for transient provider failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based): `base * 2^attempt`, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

pub struct ExternalMediaClient {
    provider: Arc<dyn MetadataProvider>,
    cache: TieredCache,
    limiter: Arc<RateLimiter>,
    flights: SingleFlight<Result<Value, FetchError>>,
    retry: RetryPolicy,
    ttl: Duration,
}

impl ExternalMediaClient {
    pub fn new(
        provider: Arc<dyn MetadataProvider>,
        cache: TieredCache,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        ttl: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            limiter,
            flights: SingleFlight::new(),
            retry,
            ttl,
        }
    }

    pub async fn search(
        &self,
        query: &str,
        kind: Option<MediaKind>,
    ) -> AppResult<Vec<MediaSummary>> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Search query cannot be empty".to_string(),
            ));
        }

        let key = CacheKey::Search {
            query: query.trim().to_string(),
            kind,
        };
        self.list(&key, kind).await
    }

    pub async fn details(&self, media: MediaRef) -> AppResult<MediaDetails> {
        let raw: TmdbDetails = self.fetch(&CacheKey::Details(media)).await?;
        Ok(raw.into_details(media.kind))
    }

    pub async fn trending(
        &self,
        kind: Option<MediaKind>,
        window: TrendingWindow,
    ) -> AppResult<Vec<MediaSummary>> {
        self.list(&CacheKey::Trending { kind, window }, kind).await
    }

    pub async fn similar(&self, media: MediaRef) -> AppResult<Vec<MediaSummary>> {
        self.list(&CacheKey::Similar(media), Some(media.kind)).await
    }

    pub async fn recommended(&self, media: MediaRef) -> AppResult<Vec<MediaSummary>> {
        self.list(&CacheKey::Recommended(media), Some(media.kind))
            .await
    }

    pub async fn chart(&self, kind: MediaKind, chart: Chart) -> AppResult<Vec<MediaSummary>> {
        self.list(&CacheKey::Chart { kind, chart }, Some(kind)).await
    }

    async fn list(&self, key: &CacheKey, hint: Option<MediaKind>) -> AppResult<Vec<MediaSummary>> {
        let response: TmdbListResponse = self.fetch(key).await?;
        Ok(response
            .results
            .into_iter()
            .filter_map(|item| item.into_summary(hint))
            .collect())
    }

    /// Cache, then single-flight, then provider
    async fn fetch<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<T, FetchError> {
        let cache_key = key.to_string();

        let value = match self.cache.get(&cache_key).await {
            Some(value) => value,
            None => {
                let cache_key = &cache_key;
                self.flights
                    .run(cache_key, move || async move {
                        // a flight that finished just before we joined may have filled it
                        if let Some(value) = self.cache.get(cache_key).await {
                            return Ok(value);
                        }

                        let value = self.fetch_with_retry(key).await?;
                        decode::<T>(&value)?;
                        self.cache.set(cache_key, &value, self.ttl).await;
                        Ok(value)
                    })
                    .await?
            }
        };

        decode(&value)
    }

    async fn fetch_with_retry(&self, key: &CacheKey) -> Result<Value, FetchError> {
        let mut attempt: u32 = 0;

        loop {
            self.limiter.acquire().await;

            let error = match self.call_provider(key).await {
                Ok(value) => {
                    tracing::debug!(
                        key = %key,
                        provider = self.provider.name(),
                        attempt = attempt + 1,
                        "Fetched from provider"
                    );
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_transient() {
                return Err(classify(key, error, attempt + 1));
            }

            if attempt >= self.retry.max_retries {
                tracing::warn!(
                    error = %error,
                    key = %key,
                    attempts = attempt + 1,
                    "Giving up on provider request"
                );
                return Err(FetchError::Exhausted {
                    attempts: attempt + 1,
                    message: error.to_string(),
                });
            }

            let delay = self.retry.backoff(attempt);
            tracing::warn!(
                error = %error,
                key = %key,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Transient provider failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn call_provider(&self, key: &CacheKey) -> AppResult<Value> {
        match key {
            CacheKey::Search { query, kind } => self.provider.search(query, *kind).await,
            CacheKey::Details(media) => self.provider.details(*media).await,
            CacheKey::Trending { kind, window } => self.provider.trending(*kind, *window).await,
            CacheKey::Similar(media) => self.provider.similar(*media).await,
            CacheKey::Recommended(media) => self.provider.recommended(*media).await,
            CacheKey::Chart { kind, chart } => self.provider.chart(*kind, *chart).await,
        }
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, FetchError> {
    T::deserialize(value).map_err(|e| FetchError::Malformed(e.to_string()))
}

/// Maps a terminal provider error onto the shared outcome
fn classify(key: &CacheKey, error: AppError, attempts: u32) -> FetchError {
    match error {
        AppError::NotFound(_) | AppError::Upstream { status: 404, .. } => {
            FetchError::NotFound(key.to_string())
        }
        AppError::Upstream { status, message } => FetchError::Rejected { status, message },
        AppError::InvalidInput(message) => FetchError::Rejected {
            status: 400,
            message,
        },
        AppError::HttpClient(e) if e.is_decode() => FetchError::Malformed(e.to_string()),
        other => FetchError::Exhausted {
            attempts,
            message: other.to_string(),
        },
    }
}
