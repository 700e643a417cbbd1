pub mod media_client;
pub mod notifier;
pub mod providers;
pub mod rate_limiter;
pub mod recommendations;
pub mod scheduler;
pub mod single_flight;

pub use media_client::{ExternalMediaClient, RetryPolicy};
pub use notifier::{LogSink, NotificationSink, WebhookSink};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use recommendations::{RecommendationEngine, RecommendationWeights};
pub use scheduler::{SchedulerConfig, UpdateScheduler};
