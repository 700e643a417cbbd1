#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reel_monitor::{
    db::{PersistenceStore, TieredCache},
    error::{AppError, AppResult},
    models::{
        Chart, MediaKind, MediaRef, NotificationKind, NotificationMarkers, NotificationPayload,
        RatedItem, Rating, Subscription, TrendingWindow, WatchlistItem,
    },
    services::{
        providers::MetadataProvider, ExternalMediaClient, NotificationSink, RateLimiter,
        RateLimiterConfig, RetryPolicy,
    },
};

pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn movie(id: u64) -> MediaRef {
    MediaRef {
        id,
        kind: MediaKind::Movie,
    }
}

pub fn series(id: u64) -> MediaRef {
    MediaRef {
        id,
        kind: MediaKind::Series,
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Scriptable provider: canned payloads per title, call counters, failure switches
#[derive(Default)]
pub struct FakeProvider {
    details: Mutex<HashMap<MediaRef, Value>>,
    similar: Mutex<HashMap<MediaRef, Value>>,
    recommended: Mutex<HashMap<MediaRef, Value>>,
    trending: Mutex<Option<Value>>,
    charts: Mutex<HashMap<(MediaKind, Chart), Value>>,
    failing: Mutex<Vec<MediaRef>>,
    delay: Mutex<Option<Duration>>,
    pub details_calls: AtomicUsize,
    /// Details calls that ran to completion
    pub details_finished: AtomicUsize,
    pub list_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_details(&self, media: MediaRef, payload: Value) {
        self.details.lock().unwrap().insert(media, payload);
    }

    pub fn set_similar(&self, media: MediaRef, payload: Value) {
        self.similar.lock().unwrap().insert(media, payload);
    }

    pub fn set_recommended(&self, media: MediaRef, payload: Value) {
        self.recommended.lock().unwrap().insert(media, payload);
    }

    pub fn set_trending(&self, payload: Value) {
        *self.trending.lock().unwrap() = Some(payload);
    }

    pub fn set_chart(&self, kind: MediaKind, chart: Chart, payload: Value) {
        self.charts.lock().unwrap().insert((kind, chart), payload);
    }

    /// Details for `media` answer 503 until `recover` is called
    pub fn fail(&self, media: MediaRef) {
        self.failing.lock().unwrap().push(media);
    }

    pub fn recover(&self, media: MediaRef) {
        self.failing.lock().unwrap().retain(|m| *m != media);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    fn list(map: &Mutex<HashMap<MediaRef, Value>>, media: MediaRef) -> AppResult<Value> {
        Ok(map
            .lock()
            .unwrap()
            .get(&media)
            .cloned()
            .unwrap_or_else(|| json!({"results": []})))
    }
}

#[async_trait::async_trait]
impl MetadataProvider for FakeProvider {
    async fn search(&self, _query: &str, _kind: Option<MediaKind>) -> AppResult<Value> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"results": []}))
    }

    async fn details(&self, media: MediaRef) -> AppResult<Value> {
        self.details_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.details_finished.fetch_add(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&media) {
            return Err(AppError::Upstream {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }

        self.details
            .lock()
            .unwrap()
            .get(&media)
            .cloned()
            .ok_or_else(|| AppError::NotFound(media.to_string()))
    }

    async fn trending(&self, kind: Option<MediaKind>, _window: TrendingWindow) -> AppResult<Value> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let payload = self
            .trending
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| json!({"results": []}));

        let Some(kind) = kind else {
            return Ok(payload);
        };
        // per-kind trending lists only carry that kind
        let results: Vec<Value> = payload["results"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|item| item["media_type"] == kind.api_path())
            .collect();
        Ok(json!({ "results": results }))
    }

    async fn similar(&self, media: MediaRef) -> AppResult<Value> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Self::list(&self.similar, media)
    }

    async fn recommended(&self, media: MediaRef) -> AppResult<Value> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Self::list(&self.recommended, media)
    }

    async fn chart(&self, kind: MediaKind, chart: Chart) -> AppResult<Value> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .charts
            .lock()
            .unwrap()
            .get(&(kind, chart))
            .cloned()
            .unwrap_or_else(|| json!({"results": []})))
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Media client over the fake provider, no retries
pub fn media_client(provider: Arc<FakeProvider>, ttl: Duration) -> Arc<ExternalMediaClient> {
    Arc::new(ExternalMediaClient::new(
        provider,
        TieredCache::in_memory(256),
        Arc::new(RateLimiter::new(RateLimiterConfig::default())),
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        },
        ttl,
    ))
}

pub fn movie_details(id: u64, status: &str, release: &str, genres: &[(u32, &str)]) -> Value {
    json!({
        "id": id,
        "title": format!("Movie {}", id),
        "status": status,
        "release_date": release,
        "genres": genres.iter().map(|(id, name)| json!({"id": id, "name": name})).collect::<Vec<_>>(),
        "vote_average": 7.0,
        "poster_path": "/poster.jpg"
    })
}

pub fn list_item(id: u64, kind: MediaKind, genres: &[u32], vote: f64) -> Value {
    match kind {
        MediaKind::Movie => json!({
            "id": id, "media_type": "movie", "title": format!("Movie {}", id),
            "genre_ids": genres, "vote_average": vote, "popularity": 10.0
        }),
        MediaKind::Series => json!({
            "id": id, "media_type": "tv", "name": format!("Series {}", id),
            "genre_ids": genres, "vote_average": vote, "popularity": 10.0
        }),
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    subscriptions: Mutex<Vec<Subscription>>,
    watchlist: Mutex<Vec<RatedItem>>,
    fail_writes: AtomicBool,
    pub writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_subscription(&self, sub: Subscription) {
        self.subscriptions.lock().unwrap().push(sub);
    }

    pub fn subscription(&self, id: i64) -> Subscription {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .unwrap()
    }

    pub fn add_watchlist(&self, item: RatedItem) {
        self.watchlist.lock().unwrap().push(item);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl PersistenceStore for MemoryStore {
    async fn due_subscriptions(
        &self,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> AppResult<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_due(now, interval))
            .cloned()
            .collect())
    }

    async fn record_check(
        &self,
        subscription_id: i64,
        checked_at: DateTime<Utc>,
        markers: &NotificationMarkers,
    ) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Internal("write failed".to_string()));
        }

        let mut subs = self.subscriptions.lock().unwrap();
        let sub = subs
            .iter_mut()
            .find(|s| s.id == subscription_id)
            .ok_or_else(|| AppError::NotFound(format!("subscription {}", subscription_id)))?;
        sub.last_checked = Some(checked_at);
        sub.markers = markers.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rated_watchlist(&self, tenant_id: i64, user_id: i64) -> AppResult<Vec<RatedItem>> {
        Ok(self
            .watchlist
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.item.tenant_id == tenant_id && i.item.user_id == user_id)
            .cloned()
            .collect())
    }
}

pub fn subscription(id: i64, media: MediaRef) -> Subscription {
    Subscription {
        id,
        tenant_id: 1,
        external_id: media.id,
        kind: media.kind,
        title: format!("Subscribed {}", media.id),
        poster_path: None,
        subscribed_at: at(2024, 1, 1, 0),
        last_checked: None,
        notify_on_release: true,
        notify_on_update: true,
        markers: NotificationMarkers::new(),
    }
}

pub fn watchlist_item(
    id: i64,
    tenant_id: i64,
    user_id: i64,
    media: MediaRef,
    score: Option<f64>,
) -> RatedItem {
    RatedItem {
        item: WatchlistItem {
            id,
            tenant_id,
            user_id,
            external_id: media.id,
            kind: media.kind,
            title: format!("Watchlist {}", media.id),
            priority: 0,
            watched: score.is_some(),
            added_at: at(2024, 1, 1, 0),
            watched_at: None,
        },
        rating: score.map(|score| Rating {
            watchlist_id: id,
            score,
            review: None,
        }),
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(i64, NotificationKind, NotificationPayload)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(i64, NotificationKind, NotificationPayload)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }
}

#[async_trait::async_trait]
impl NotificationSink for RecordingSink {
    async fn dispatch(
        &self,
        tenant_id: i64,
        kind: NotificationKind,
        payload: &NotificationPayload,
    ) -> AppResult<()> {
        self.sent
            .lock()
            .unwrap()
            .push((tenant_id, kind, payload.clone()));
        Ok(())
    }
}
