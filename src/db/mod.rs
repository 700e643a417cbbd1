pub mod cache;
pub mod postgres;
pub mod redis;
pub mod store;

pub use cache::{CacheEntry, CacheKey, DurableTier, TieredCache};
pub use postgres::{create_pool, run_migrations, PgCacheTier, PgStore};
pub use self::redis::{create_redis_client, CacheWriterHandle, RedisTier};
pub use store::PersistenceStore;
