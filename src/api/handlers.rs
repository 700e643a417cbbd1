use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    models::{MediaKind, MediaRef},
    services::{
        recommendations::{RecommendationRequest, RecommendationSource, Recommendations},
        scheduler::{CycleReport, SchedulerStatus},
    },
};

use super::AppState;

// Request types

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasedOn {
    #[default]
    Watchlist,
    Trending,
    Popular,
    TopRated,
}

#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    pub tenant_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub kind: Option<MediaKind>,
    /// Explicit seed title; takes precedence over `based_on`
    #[serde(default)]
    pub seed: Option<MediaRef>,
    #[serde(default)]
    pub based_on: BasedOn,
}

impl RecommendRequest {
    fn into_request(self) -> AppResult<RecommendationRequest> {
        if self.tenant_id <= 0 || self.user_id <= 0 {
            return Err(AppError::InvalidInput(
                "tenant_id and user_id must be positive".to_string(),
            ));
        }

        let source = match (self.seed, self.based_on) {
            (Some(seed), _) => RecommendationSource::Seed {
                id: seed.id,
                kind: seed.kind,
            },
            (None, BasedOn::Trending) => RecommendationSource::Trending,
            (None, BasedOn::Popular) => RecommendationSource::Popular,
            (None, BasedOn::TopRated) => RecommendationSource::TopRated,
            (None, BasedOn::Watchlist) => RecommendationSource::Watchlist,
        };

        Ok(RecommendationRequest {
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            kind: self.kind,
            source,
        })
    }
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

pub async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

/// Runs one update cycle now; 409 if one is already running.
///
/// The cycle runs on its own task so a dropped connection cannot cut it short.
pub async fn run_scheduler(State(state): State<AppState>) -> AppResult<Json<CycleReport>> {
    let scheduler = state.scheduler.clone();
    let report = tokio::spawn(async move { scheduler.run_cycle().await })
        .await
        .map_err(|e| AppError::Internal(format!("Update cycle task failed: {}", e)))??;
    Ok(Json(report))
}

pub async fn recommend(
    State(state): State<AppState>,
    Json(request): Json<RecommendRequest>,
) -> AppResult<Json<Recommendations>> {
    let request = request.into_request()?;
    let recommendations = state.recommendations.recommend(&request).await?;
    Ok(Json(recommendations))
}
