use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MediaKind, MediaRef};

/// A title on a user's watchlist within one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistItem {
    pub id: i64,
    pub tenant_id: i64,
    pub user_id: i64,
    pub external_id: u64,
    pub kind: MediaKind,
    pub title: String,
    pub priority: i32,
    pub watched: bool,
    pub added_at: DateTime<Utc>,
    pub watched_at: Option<DateTime<Utc>>,
}

impl WatchlistItem {
    pub fn media_ref(&self) -> MediaRef {
        MediaRef {
            id: self.external_id,
            kind: self.kind,
        }
    }
}

/// A user's score for one watchlist item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub watchlist_id: i64,
    /// 1.0 ..= 10.0
    pub score: f64,
    pub review: Option<String>,
}

impl Rating {
    pub const MIN_SCORE: f64 = 1.0;
    pub const MAX_SCORE: f64 = 10.0;

    pub fn is_valid_score(score: f64) -> bool {
        (Self::MIN_SCORE..=Self::MAX_SCORE).contains(&score)
    }
}

/// Watchlist item joined with its optional rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedItem {
    pub item: WatchlistItem,
    pub rating: Option<Rating>,
}

impl RatedItem {
    pub fn score(&self) -> Option<f64> {
        self.rating.as_ref().map(|r| r.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bounds() {
        assert!(Rating::is_valid_score(1.0));
        assert!(Rating::is_valid_score(10.0));
        assert!(Rating::is_valid_score(7.5));
        assert!(!Rating::is_valid_score(0.5));
        assert!(!Rating::is_valid_score(10.1));
    }
}
