//! Metadata provider abstraction
//!
//! A provider speaks the upstream wire protocol and returns raw JSON payloads.
//! Caching, rate limiting, retries and decoding into typed records all happen
//! in `ExternalMediaClient`, so a provider stays a thin transport that is easy
//! to swap or fake.
use serde_json::Value;

use crate::{
    error::AppResult,
    models::{Chart, MediaKind, MediaRef, TrendingWindow},
};

pub mod tmdb;

pub use tmdb::TmdbProvider;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Search titles by name, optionally restricted to one kind
    async fn search(&self, query: &str, kind: Option<MediaKind>) -> AppResult<Value>;

    /// Full record for one title
    async fn details(&self, media: MediaRef) -> AppResult<Value>;

    /// Trending titles; `None` means movies and series together
    async fn trending(&self, kind: Option<MediaKind>, window: TrendingWindow) -> AppResult<Value>;

    async fn similar(&self, media: MediaRef) -> AppResult<Value>;

    async fn recommended(&self, media: MediaRef) -> AppResult<Value>;

    /// Popular or top-rated titles of one kind
    async fn chart(&self, kind: MediaKind, chart: Chart) -> AppResult<Value>;

    /// Provider name for logging and debugging
    fn name(&self) -> &'static str;
}
