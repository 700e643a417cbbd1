use reqwest::Client as HttpClient;
use serde::Serialize;
use std::time::Duration;

use crate::{
    error::{AppError, AppResult},
    models::{NotificationKind, NotificationPayload},
};

/// Delivers notification intents to the chat layer.
///
/// Fire-and-forget from the scheduler's point of view: a failed dispatch is
/// logged and never retried by the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn dispatch(
        &self,
        tenant_id: i64,
        kind: NotificationKind,
        payload: &NotificationPayload,
    ) -> AppResult<()>;
}

/// Writes notifications to the log only
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait::async_trait]
impl NotificationSink for LogSink {
    async fn dispatch(
        &self,
        tenant_id: i64,
        kind: NotificationKind,
        payload: &NotificationPayload,
    ) -> AppResult<()> {
        tracing::info!(
            tenant_id,
            external_id = payload.external_id,
            media_kind = %payload.kind,
            notification = %kind,
            title = %payload.title,
            date = %payload.date,
            episode = ?payload.episode,
            "Notification"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    tenant_id: i64,
    kind: NotificationKind,
    payload: &'a NotificationPayload,
}

/// POSTs each notification as JSON to a configured URL
#[derive(Clone)]
pub struct WebhookSink {
    url: String,
    client: HttpClient,
    timeout: Duration,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: HttpClient::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl NotificationSink for WebhookSink {
    async fn dispatch(
        &self,
        tenant_id: i64,
        kind: NotificationKind,
        payload: &NotificationPayload,
    ) -> AppResult<()> {
        let body = WebhookBody {
            tenant_id,
            kind,
            payload,
        };

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upstream {
                status: status.as_u16(),
                message: format!("notification webhook rejected {} for tenant {}", kind, tenant_id),
            });
        }

        Ok(())
    }
}
