use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool};
use std::time::Duration;

use crate::db::cache::{CacheEntry, DurableTier};
use crate::db::store::PersistenceStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    MediaKind, NotificationMarkers, RatedItem, Rating, Subscription, WatchlistItem,
};

/// Creates a PostgreSQL connection pool
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Applies the embedded migrations
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn to_external_id(raw: i64) -> AppResult<u64> {
    u64::try_from(raw).map_err(|_| AppError::Internal(format!("negative external id {}", raw)))
}

/// Converts rows one at a time; a row that fails is logged and skipped
fn convert_rows<R, T>(rows: Vec<R>, table: &'static str, row_id: impl Fn(&R) -> i64) -> Vec<T>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter()
        .filter_map(|row| {
            let id = row_id(&row);
            match T::try_from(row) {
                Ok(converted) => Some(converted),
                Err(e) => {
                    tracing::warn!(error = %e, table, row_id = id, "Skipping unreadable row");
                    None
                }
            }
        })
        .collect()
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    id: i64,
    tenant_id: i64,
    external_id: i64,
    media_kind: String,
    title: String,
    poster_path: Option<String>,
    subscribed_at: DateTime<Utc>,
    last_checked: Option<DateTime<Utc>>,
    notify_on_release: bool,
    notify_on_update: bool,
    notification_markers: Json<Value>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = AppError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: row.id,
            tenant_id: row.tenant_id,
            external_id: to_external_id(row.external_id)?,
            kind: row.media_kind.parse::<MediaKind>().map_err(AppError::Internal)?,
            title: row.title,
            poster_path: row.poster_path,
            subscribed_at: row.subscribed_at,
            last_checked: row.last_checked,
            notify_on_release: row.notify_on_release,
            notify_on_update: row.notify_on_update,
            markers: NotificationMarkers::from_value_lenient(&row.notification_markers.0),
        })
    }
}

#[derive(Debug, FromRow)]
struct RatedItemRow {
    id: i64,
    tenant_id: i64,
    user_id: i64,
    external_id: i64,
    media_kind: String,
    title: String,
    priority: i32,
    watched: bool,
    added_at: DateTime<Utc>,
    watched_at: Option<DateTime<Utc>>,
    score: Option<f64>,
    review: Option<String>,
}

impl TryFrom<RatedItemRow> for RatedItem {
    type Error = AppError;

    fn try_from(row: RatedItemRow) -> Result<Self, Self::Error> {
        let rating = row.score.map(|score| Rating {
            watchlist_id: row.id,
            score,
            review: row.review,
        });

        Ok(RatedItem {
            item: WatchlistItem {
                id: row.id,
                tenant_id: row.tenant_id,
                user_id: row.user_id,
                external_id: to_external_id(row.external_id)?,
                kind: row.media_kind.parse::<MediaKind>().map_err(AppError::Internal)?,
                title: row.title,
                priority: row.priority,
                watched: row.watched,
                added_at: row.added_at,
                watched_at: row.watched_at,
            },
            rating,
        })
    }
}

/// Postgres-backed persistence for subscriptions and watchlists
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PersistenceStore for PgStore {
    async fn due_subscriptions(
        &self,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> AppResult<Vec<Subscription>> {
        let interval = chrono::Duration::from_std(interval)
            .map_err(|e| AppError::InvalidInput(format!("update interval out of range: {}", e)))?;
        let cutoff = now - interval;

        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"
            SELECT s.id, s.tenant_id, s.external_id, s.media_kind, s.title, s.poster_path,
                   s.subscribed_at, s.last_checked, s.notify_on_release, s.notify_on_update,
                   s.notification_markers
            FROM subscriptions s
            JOIN tenants t ON t.id = s.tenant_id
            WHERE t.auto_update_enabled
              AND (s.last_checked IS NULL OR s.last_checked <= $1)
            ORDER BY s.last_checked ASC NULLS FIRST, s.id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(convert_rows(rows, "subscriptions", |row: &SubscriptionRow| row.id))
    }

    async fn record_check(
        &self,
        subscription_id: i64,
        checked_at: DateTime<Utc>,
        markers: &NotificationMarkers,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET last_checked = $2, notification_markers = $3
            WHERE id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(checked_at)
        .bind(Json(markers))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "subscription {} no longer exists",
                subscription_id
            )));
        }
        Ok(())
    }

    async fn rated_watchlist(&self, tenant_id: i64, user_id: i64) -> AppResult<Vec<RatedItem>> {
        let rows = sqlx::query_as::<_, RatedItemRow>(
            r#"
            SELECT w.id, w.tenant_id, w.user_id, w.external_id, w.media_kind, w.title,
                   w.priority, w.watched, w.added_at, w.watched_at, r.score, r.review
            FROM watchlist_items w
            LEFT JOIN ratings r ON r.watchlist_id = w.id
            WHERE w.tenant_id = $1 AND w.user_id = $2
            ORDER BY w.added_at, w.id
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(convert_rows(rows, "watchlist_items", |row: &RatedItemRow| row.id))
    }
}

/// Durable cache tier on the `cache_entries` table
#[derive(Clone)]
pub struct PgCacheTier {
    pool: PgPool,
}

impl PgCacheTier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DurableTier for PgCacheTier {
    async fn load(&self, key: &str) -> AppResult<Option<CacheEntry>> {
        let row: Option<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT value, expires_at FROM cache_entries WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value, expires_at)| CacheEntry { value, expires_at }))
    }

    async fn store(&self, key: &str, entry: CacheEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at, created_at = now()
            "#,
        )
        .bind(key)
        .bind(entry.value)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription_row(kind: &str, external_id: i64) -> SubscriptionRow {
        SubscriptionRow {
            id: 7,
            tenant_id: 99,
            external_id,
            media_kind: kind.to_string(),
            title: "Dune: Part Two".to_string(),
            poster_path: Some("/p.jpg".to_string()),
            subscribed_at: Utc::now(),
            last_checked: None,
            notify_on_release: true,
            notify_on_update: false,
            notification_markers: Json(serde_json::json!({"release": "2024-05-01"})),
        }
    }

    #[test]
    fn test_subscription_row_conversion() {
        let sub = Subscription::try_from(subscription_row("movie", 693134)).unwrap();
        assert_eq!(sub.kind, MediaKind::Movie);
        assert_eq!(sub.external_id, 693134);
        assert!(sub
            .markers
            .already_notified(crate::models::NotificationKind::Release, "2024-05-01"));
    }

    #[test]
    fn test_subscription_row_rejects_unknown_kind() {
        assert!(Subscription::try_from(subscription_row("podcast", 1)).is_err());
    }

    #[test]
    fn test_subscription_row_rejects_negative_id() {
        assert!(Subscription::try_from(subscription_row("movie", -1)).is_err());
    }

    #[test]
    fn test_rated_item_row_without_rating() {
        let row = RatedItemRow {
            id: 3,
            tenant_id: 1,
            user_id: 2,
            external_id: 1399,
            media_kind: "series".to_string(),
            title: "Show".to_string(),
            priority: 1,
            watched: false,
            added_at: Utc::now(),
            watched_at: None,
            score: None,
            review: Some("ignored without a score".to_string()),
        };

        let item = RatedItem::try_from(row).unwrap();
        assert_eq!(item.item.kind, MediaKind::Series);
        assert!(item.rating.is_none());
    }

    #[test]
    fn test_rated_item_row_with_rating() {
        let row = RatedItemRow {
            id: 4,
            tenant_id: 1,
            user_id: 2,
            external_id: 550,
            media_kind: "movie".to_string(),
            title: "Fight Club".to_string(),
            priority: 0,
            watched: true,
            added_at: Utc::now(),
            watched_at: Some(Utc::now()),
            score: Some(9.0),
            review: None,
        };

        let item = RatedItem::try_from(row).unwrap();
        assert_eq!(item.score(), Some(9.0));
        assert_eq!(item.rating.unwrap().watchlist_id, 4);
    }

    #[test]
    fn test_unknown_marker_kind_does_not_reject_row() {
        let mut row = subscription_row("series", 1399);
        row.notification_markers = Json(serde_json::json!({"finale": "S08E06", "episode_aired": "S08E05"}));

        let sub = Subscription::try_from(row).unwrap();
        assert_eq!(
            sub.markers.get(crate::models::NotificationKind::EpisodeAired),
            Some("S08E05")
        );
    }

    #[test]
    fn test_bad_rows_are_skipped_not_fatal() {
        let rows = vec![
            subscription_row("movie", 1),
            subscription_row("podcast", 2),
            subscription_row("movie", -3),
            subscription_row("series", 4),
        ];

        let subs: Vec<Subscription> = convert_rows(rows, "subscriptions", |row| row.id);
        let ids: Vec<u64> = subs.iter().map(|s| s.external_id).collect();
        assert_eq!(ids, vec![1, 4]);
    }
}
