use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reel_monitor::{
    api::{create_router, AppState},
    config::{CacheBackend, Config, LogFormat},
    db::{
        create_pool, create_redis_client, run_migrations, CacheWriterHandle, DurableTier,
        PgCacheTier, PgStore, RedisTier, TieredCache,
    },
    services::{
        providers::TmdbProvider, ExternalMediaClient, LogSink, NotificationSink, RateLimiter,
        RecommendationEngine, UpdateScheduler, WebhookSink,
    },
};

/// How long a running cycle gets to wind down after shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "reel_monitor=info,tower_http=info".into());

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    tracing::info!("reel-monitor v{}", env!("CARGO_PKG_VERSION"));

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;
    tracing::info!("Database ready");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (durable, cache_writer): (Option<Arc<dyn DurableTier>>, Option<CacheWriterHandle>) =
        match config.cache_backend {
            CacheBackend::Redis => {
                let client = create_redis_client(&config.redis_url)?;
                match RedisTier::new(client).await {
                    Ok((tier, writer)) => {
                        let tier: Arc<dyn DurableTier> = Arc::new(tier);
                        (Some(tier), Some(writer))
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Redis unavailable, caching in memory only");
                        (None, None)
                    }
                }
            }
            CacheBackend::Postgres => {
                let tier: Arc<dyn DurableTier> = Arc::new(PgCacheTier::new(pool.clone()));
                (Some(tier), None)
            }
            CacheBackend::Memory => (None, None),
        };
    tracing::info!(backend = ?config.cache_backend, "Cache initialized");

    let cache = TieredCache::new(config.memory_cache_capacity, durable);
    let sweeper = tokio::spawn(
        cache
            .clone()
            .run_sweeper(config.cache_sweep_interval(), shutdown_rx.clone()),
    );

    let provider = TmdbProvider::new(
        config.tmdb_api_key.clone(),
        config.tmdb_api_url.clone(),
        config.tmdb_language.clone(),
        config.tmdb_region.clone(),
    );
    let client = Arc::new(ExternalMediaClient::new(
        Arc::new(provider),
        cache,
        Arc::new(RateLimiter::new(config.rate_limiter())),
        config.retry_policy(),
        config.cache_ttl(),
    ));

    let sink: Arc<dyn NotificationSink> = match &config.notification_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Notifications go to webhook");
            Arc::new(WebhookSink::new(url.clone()))
        }
        None => Arc::new(LogSink),
    };

    let store = Arc::new(PgStore::new(pool.clone()));

    let scheduler = Arc::new(UpdateScheduler::new(
        store.clone(),
        client.clone(),
        sink,
        config.scheduler(),
        shutdown_rx.clone(),
    ));
    let scheduler_task = if config.auto_update_enabled {
        Some(tokio::spawn(scheduler.clone().run()))
    } else {
        tracing::warn!("Automatic updates disabled, cycles run only on request");
        None
    };

    let recommendations = Arc::new(RecommendationEngine::new(
        store,
        client,
        config.recommendation_weights(),
    ));

    let app = create_router(AppState::new(scheduler, recommendations));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server running on http://{}", addr);

    tokio::spawn(shutdown_signal(shutdown_tx));

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await?;

    if let Some(task) = scheduler_task {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            tracing::warn!("Update cycle did not finish within the grace period");
        }
    }
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Cache sweeper task panicked");
    }
    if let Some(writer) = cache_writer {
        writer.shutdown().await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
