use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::AppResult;
use crate::models::{NotificationMarkers, RatedItem, Subscription};

/// Durable storage consumed by the scheduler and the recommendation engine.
///
/// Subscription and watchlist CRUD lives outside this crate; the core only
/// reads due work, advances `last_checked` with the notification markers, and
/// reads a user's rated watchlist. Every read is tenant-scoped.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Subscriptions of auto-update tenants whose last check is at least `interval` old
    async fn due_subscriptions(
        &self,
        now: DateTime<Utc>,
        interval: Duration,
    ) -> AppResult<Vec<Subscription>>;

    /// Commits a successful check; the markers include any notification about to be sent.
    ///
    /// Fails with `NotFound` when the subscription was deleted meanwhile.
    async fn record_check(
        &self,
        subscription_id: i64,
        checked_at: DateTime<Utc>,
        markers: &NotificationMarkers,
    ) -> AppResult<()>;

    /// A user's watchlist joined with ratings, oldest first
    async fn rated_watchlist(&self, tenant_id: i64, user_id: i64) -> AppResult<Vec<RatedItem>>;
}
