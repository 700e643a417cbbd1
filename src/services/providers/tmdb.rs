/// The Movie Database (TMDB) v3 provider
///
/// Endpoints used:
/// - Search: /search/multi, /search/movie, /search/tv
/// - Details: /movie/{id}, /tv/{id}
/// - Lists: /trending/{all|movie|tv}/{day|week}, /{movie|tv}/{id}/similar,
///   /{movie|tv}/{id}/recommendations, /{movie|tv}/{popular|top_rated}
///
/// Every request carries `api_key` and `language`; searches also carry `region`.
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;

use crate::{
    error::{AppError, AppResult},
    models::{Chart, MediaKind, MediaRef, TrendingWindow},
    services::providers::MetadataProvider,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct TmdbProvider {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    language: String,
    region: String,
}

fn search_path(kind: Option<MediaKind>) -> &'static str {
    match kind {
        None => "search/multi",
        Some(MediaKind::Movie) => "search/movie",
        Some(MediaKind::Series) => "search/tv",
    }
}

fn trending_path(kind: Option<MediaKind>, window: TrendingWindow) -> String {
    let segment = kind.map(|k| k.api_path()).unwrap_or("all");
    format!("trending/{}/{}", segment, window.as_str())
}

fn chart_path(kind: MediaKind, chart: Chart) -> String {
    format!("{}/{}", kind.api_path(), chart.as_str())
}

fn media_path(media: MediaRef, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{}/{}/{}", media.kind.api_path(), media.id, suffix),
        None => format!("{}/{}", media.kind.api_path(), media.id),
    }
}

impl TmdbProvider {
    pub fn new(api_key: String, api_url: String, language: String, region: String) -> Self {
        let http_client = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                HttpClient::new()
            });

        Self {
            http_client,
            api_key,
            api_url: api_url.trim_end_matches('/').to_string(),
            language,
            region,
        }
    }

    /// Issues one GET and classifies the status
    async fn get(&self, path: &str, params: &[(&str, &str)]) -> AppResult<Value> {
        let url = format!("{}/{}", self.api_url, path);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("language", self.language.as_str()),
            ])
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("TMDB resource {}", path)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(path = %path, status = %status, body = %body, "TMDB request failed");
            return Err(AppError::Upstream {
                status: status.as_u16(),
                message: body,
            });
        }

        let payload: Value = response.json().await?;
        Ok(payload)
    }
}

#[async_trait::async_trait]
impl MetadataProvider for TmdbProvider {
    async fn search(&self, query: &str, kind: Option<MediaKind>) -> AppResult<Value> {
        if query.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Search query cannot be empty".to_string(),
            ));
        }

        self.get(
            search_path(kind),
            &[
                ("query", query.trim()),
                ("include_adult", "false"),
                ("region", self.region.as_str()),
            ],
        )
        .await
    }

    async fn details(&self, media: MediaRef) -> AppResult<Value> {
        self.get(&media_path(media, None), &[]).await
    }

    async fn trending(&self, kind: Option<MediaKind>, window: TrendingWindow) -> AppResult<Value> {
        self.get(&trending_path(kind, window), &[]).await
    }

    async fn similar(&self, media: MediaRef) -> AppResult<Value> {
        self.get(&media_path(media, Some("similar")), &[]).await
    }

    async fn recommended(&self, media: MediaRef) -> AppResult<Value> {
        self.get(&media_path(media, Some("recommendations")), &[])
            .await
    }

    async fn chart(&self, kind: MediaKind, chart: Chart) -> AppResult<Value> {
        self.get(&chart_path(kind, chart), &[("region", self.region.as_str())])
            .await
    }

    fn name(&self) -> &'static str {
        "tmdb"
    }
}
