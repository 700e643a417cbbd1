//! Two-tier cache shared by every provider lookup.
//!
//! The in-process tier is checked first and bounded by an LRU capacity. The
//! durable tier (Redis or the Postgres `cache_entries` table) shares the same
//! key space, is consulted on an in-process miss, and its hits are promoted
//! back into the in-process tier. Durable-tier failures are logged and the
//! cache keeps serving from memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AppResult;
use crate::models::{Chart, MediaKind, MediaRef, TrendingWindow};

/// Deterministic cache key: operation name plus normalized parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Search {
        query: String,
        kind: Option<MediaKind>,
    },
    Details(MediaRef),
    Trending {
        kind: Option<MediaKind>,
        window: TrendingWindow,
    },
    Similar(MediaRef),
    Recommended(MediaRef),
    Chart {
        kind: MediaKind,
        chart: Chart,
    },
}

impl CacheKey {
    /// Operation name, used for logging
    pub fn operation(&self) -> &'static str {
        match self {
            CacheKey::Search { .. } => "search",
            CacheKey::Details(_) => "details",
            CacheKey::Trending { .. } => "trending",
            CacheKey::Similar(_) => "similar",
            CacheKey::Recommended(_) => "recommended",
            CacheKey::Chart { chart, .. } => chart.as_str(),
        }
    }
}

fn kind_segment(kind: Option<MediaKind>) -> &'static str {
    kind.map(|k| k.as_str()).unwrap_or("all")
}

/// Lowercase, trim and collapse inner whitespace
fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Search { query, kind } => {
                write!(f, "search:{}:{}", kind_segment(*kind), normalize_query(query))
            }
            CacheKey::Details(r) => write!(f, "details:{}:{}", r.kind, r.id),
            CacheKey::Trending { kind, window } => {
                write!(f, "trending:{}:{}", kind_segment(*kind), window.as_str())
            }
            CacheKey::Similar(r) => write!(f, "similar:{}:{}", r.kind, r.id),
            CacheKey::Recommended(r) => write!(f, "recommended:{}:{}", r.kind, r.id),
            CacheKey::Chart { kind, chart } => write!(f, "{}:{}", chart.as_str(), kind),
        }
    }
}

/// A durable-tier row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Persistent, cross-process cache storage
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait DurableTier: Send + Sync {
    async fn load(&self, key: &str) -> AppResult<Option<CacheEntry>>;

    async fn store(&self, key: &str, entry: CacheEntry) -> AppResult<()>;

    async fn remove(&self, key: &str) -> AppResult<()>;

    /// Deletes expired rows, returning how many were removed
    async fn sweep_expired(&self, now: DateTime<Utc>) -> AppResult<u64>;

    fn name(&self) -> &'static str;
}

struct MemoryEntry {
    value: Value,
    expires_at: Instant,
    tick: u64,
}

/// Bounded in-process tier with LRU eviction
struct MemoryTier {
    capacity: usize,
    entries: HashMap<String, MemoryEntry>,
    /// access tick -> key, oldest first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl MemoryTier {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn get(&mut self, key: &str, now: Instant) -> Option<Value> {
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) => entry.expires_at <= now,
        };

        if expired {
            self.remove(key);
            return None;
        }

        let tick = self.bump();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, key.to_string());
        Some(entry.value.clone())
    }

    fn insert(&mut self, key: &str, value: Value, expires_at: Instant) {
        self.remove(key);
        let tick = self.bump();
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at,
                tick,
            },
        );
        self.recency.insert(tick, key.to_string());

        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            tracing::trace!(key = %oldest, "Evicted least recently used cache entry");
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.tick);
        }
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

/// CacheStore: in-process tier in front of an optional durable tier
#[derive(Clone)]
pub struct TieredCache {
    memory: Arc<Mutex<MemoryTier>>,
    durable: Option<Arc<dyn DurableTier>>,
}

impl TieredCache {
    pub fn new(capacity: usize, durable: Option<Arc<dyn DurableTier>>) -> Self {
        Self {
            memory: Arc::new(Mutex::new(MemoryTier::new(capacity))),
            durable,
        }
    }

    /// In-process tier only
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(capacity, None)
    }

    /// Returns the value for `key` if some tier holds a live entry
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.memory.lock().await.get(key, Instant::now()) {
            tracing::debug!(key = %key, tier = "memory", "Cache hit");
            return Some(value);
        }

        let durable = self.durable.as_ref()?;
        let entry = match durable.load(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    key = %key,
                    tier = durable.name(),
                    "Durable cache read failed, continuing with in-process tier"
                );
                return None;
            }
        };

        let now = Utc::now();
        if !entry.is_live(now) {
            if let Err(e) = durable.remove(key).await {
                tracing::debug!(error = %e, key = %key, "Failed to evict expired durable entry");
            }
            return None;
        }

        let value: Value = match serde_json::from_str(&entry.value) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Discarding undecodable durable cache entry");
                return None;
            }
        };

        let remaining = (entry.expires_at - now).to_std().unwrap_or_default();
        self.memory
            .lock()
            .await
            .insert(key, value.clone(), Instant::now() + remaining);

        tracing::debug!(key = %key, tier = durable.name(), "Cache hit, promoted to memory");
        Some(value)
    }

    /// Writes `value` to both tiers with the given time-to-live
    pub async fn set(&self, key: &str, value: &Value, ttl: Duration) {
        self.memory
            .lock()
            .await
            .insert(key, value.clone(), Instant::now() + ttl);

        let Some(durable) = self.durable.as_ref() else {
            return;
        };

        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at,
        };

        if let Err(e) = durable.store(key, entry).await {
            tracing::warn!(
                error = %e,
                key = %key,
                tier = durable.name(),
                "Durable cache write failed, entry kept in-process only"
            );
        }
    }

    /// Drops expired entries from both tiers
    pub async fn sweep(&self) {
        let purged = self.memory.lock().await.purge_expired(Instant::now());

        let swept = match self.durable.as_ref() {
            Some(durable) => match durable.sweep_expired(Utc::now()).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, tier = durable.name(), "Durable cache sweep failed");
                    0
                }
            },
            None => 0,
        };

        tracing::debug!(memory = purged, durable = swept, "Cache sweep completed");
    }

    /// Runs `sweep` every `interval` until the shutdown channel flips
    pub async fn run_sweeper(
        self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = shutdown.changed() => {
                    tracing::info!("Cache sweeper stopped");
                    break;
                }
            }
        }
    }

    pub async fn memory_len(&self) -> usize {
        self.memory.lock().await.entries.len()
    }
}
