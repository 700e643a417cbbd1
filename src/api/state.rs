use std::sync::Arc;

use crate::services::{RecommendationEngine, UpdateScheduler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<UpdateScheduler>,
    pub recommendations: Arc<RecommendationEngine>,
}

impl AppState {
    pub fn new(
        scheduler: Arc<UpdateScheduler>,
        recommendations: Arc<RecommendationEngine>,
    ) -> Self {
        Self {
            scheduler,
            recommendations,
        }
    }
}
