use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use redis::Client;
use tokio::sync::mpsc;

use crate::db::cache::{CacheEntry, DurableTier};
use crate::error::{AppError, AppResult};

/// Key namespace so the cache can share a Redis instance
const KEY_PREFIX: &str = "reel:";

/// Creates a Redis client for caching
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

fn namespaced(key: &str) -> String {
    format!("{}{}", KEY_PREFIX, key)
}

/// Seconds until `expires_at`, at least one so `SET EX` accepts it
fn ttl_secs(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (expires_at - now).num_seconds().max(1) as u64
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
}

/// Redis-backed durable tier.
///
/// Entries are stored as JSON envelopes carrying `expires_at` and written with
/// `SET EX`, so Redis drops them on its own; reads still honour `expires_at`.
/// Writes go through a background task so the fetch path never waits on Redis.
/// Reads and the writer share one `ConnectionManager`, which reconnects on its own.
#[derive(Clone)]
pub struct RedisTier {
    conn: ConnectionManager,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl CacheWriterHandle {
    /// Signals the writer and waits for it to flush pending writes
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cache writer task panicked");
        }
    }
}

impl RedisTier {
    /// Connects, then spawns the background writer
    pub async fn new(redis_client: Client) -> AppResult<(Self, CacheWriterHandle)> {
        let conn = ConnectionManager::new(redis_client).await?;
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let writer_conn = conn.clone();
        let task = tokio::spawn(async move {
            Self::cache_writer_task(writer_conn, write_rx, shutdown_rx).await;
        });

        let tier = Self { conn, write_tx };

        Ok((tier, CacheWriterHandle { shutdown_tx, task }))
    }

    /// Drains write messages until shutdown, then flushes what is left
    async fn cache_writer_task(
        mut conn: ConnectionManager,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = Self::write_to_redis(&mut conn, msg).await {
                        tracing::warn!(error = %e, "Failed to write to Redis cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    write_rx.close();
                    let mut flushed = 0usize;
                    while let Some(msg) = write_rx.recv().await {
                        if let Err(e) = Self::write_to_redis(&mut conn, msg).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        } else {
                            flushed += 1;
                        }
                    }

                    tracing::info!(flushed, "Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn write_to_redis(conn: &mut ConnectionManager, msg: CacheWriteMessage) -> AppResult<()> {
        let _: () = conn.set_ex(msg.key, msg.value, msg.ttl).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DurableTier for RedisTier {
    async fn load(&self, key: &str) -> AppResult<Option<CacheEntry>> {
        let mut conn = self.conn.clone();
        let cached: Option<String> = conn.get(namespaced(key)).await?;

        match cached {
            Some(json) => {
                let entry = serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Queues the write; returns once the message is handed to the writer
    async fn store(&self, key: &str, entry: CacheEntry) -> AppResult<()> {
        let ttl = ttl_secs(entry.expires_at, Utc::now());
        let value = serde_json::to_string(&entry)
            .map_err(|e| AppError::Internal(format!("Cache serialization error: {}", e)))?;

        self.write_tx
            .send(CacheWriteMessage {
                key: namespaced(key),
                value,
                ttl,
            })
            .map_err(|e| AppError::Internal(format!("Cache writer unavailable: {}", e)))
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(namespaced(key)).await?;
        Ok(())
    }

    /// Redis expires keys itself
    async fn sweep_expired(&self, _now: DateTime<Utc>) -> AppResult<u64> {
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
