use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::{
    db::store::PersistenceStore,
    error::AppResult,
    models::{Chart, MediaKind, MediaRef, MediaSummary, RatedItem, Rating, TrendingWindow},
    services::media_client::ExternalMediaClient,
};

/// Scoring weights and list sizes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecommendationWeights {
    /// Added when a candidate shares a genre with the user's liked titles
    pub genre: f64,
    /// Added when a candidate's external rating is at least the user's average
    pub rating: f64,
    /// Added when a candidate is of the user's preferred media kind
    pub kind: f64,
    pub top_n: usize,
    pub max_seeds: usize,
    /// Scores at or above this count as liked
    pub high_rating: f64,
}

impl Default for RecommendationWeights {
    fn default() -> Self {
        Self {
            genre: 3.0,
            rating: 2.0,
            kind: 1.0,
            top_n: 10,
            max_seeds: 5,
            high_rating: 7.0,
        }
    }
}

/// What the candidate pool is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecommendationSource {
    /// Seeds are the user's top-rated watchlist items
    #[default]
    Watchlist,
    /// One explicit seed title
    Seed { id: u64, kind: MediaKind },
    /// This week's trending titles, unscored
    Trending,
    /// The provider's popular list, split evenly across the requested kinds
    Popular,
    /// The provider's top-rated list, split evenly across the requested kinds
    TopRated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationRequest {
    pub tenant_id: i64,
    pub user_id: i64,
    pub kind: Option<MediaKind>,
    pub source: RecommendationSource,
}

/// Which path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationMode {
    Watchlist,
    Seed,
    Trending,
    Popular,
    TopRated,
    /// Watchlist mode for a user with no history
    TrendingFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub media: MediaSummary,
    pub recommendation_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendations {
    pub mode: RecommendationMode,
    pub items: Vec<Candidate>,
}

/// What the user's history says about their taste
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TasteProfile {
    pub preferred_genres: BTreeSet<u32>,
    /// Mean over valid ratings; `None` when nothing is rated
    pub average_rating: Option<f64>,
    /// Majority kind in the watchlist; `None` on a tie or an empty list
    pub preferred_kind: Option<MediaKind>,
}

fn valid_score(item: &RatedItem) -> Option<f64> {
    item.score().filter(|s| Rating::is_valid_score(*s))
}

pub fn average_rating(history: &[RatedItem]) -> Option<f64> {
    let scores: Vec<f64> = history.iter().filter_map(valid_score).collect();
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

pub fn preferred_kind(history: &[RatedItem]) -> Option<MediaKind> {
    let movies = history
        .iter()
        .filter(|i| i.item.kind == MediaKind::Movie)
        .count();
    let series = history.len() - movies;

    match movies.cmp(&series) {
        Ordering::Greater => Some(MediaKind::Movie),
        Ordering::Less => Some(MediaKind::Series),
        Ordering::Equal => None,
    }
}

/// Liked items first, then any rated items, then the watchlist by priority
pub fn select_seeds(history: &[RatedItem], weights: &RecommendationWeights) -> Vec<MediaRef> {
    let mut rated: Vec<(&RatedItem, f64)> = history
        .iter()
        .filter_map(|item| valid_score(item).map(|s| (item, s)))
        .collect();
    rated.sort_by(|a, b| b.1.total_cmp(&a.1));

    let liked: Vec<MediaRef> = rated
        .iter()
        .filter(|(_, score)| *score >= weights.high_rating)
        .map(|(item, _)| item.item.media_ref())
        .take(weights.max_seeds)
        .collect();
    if !liked.is_empty() {
        return liked;
    }

    if !rated.is_empty() {
        return rated
            .iter()
            .map(|(item, _)| item.item.media_ref())
            .take(weights.max_seeds)
            .collect();
    }

    let mut unrated: Vec<&RatedItem> = history.iter().collect();
    unrated.sort_by(|a, b| b.item.priority.cmp(&a.item.priority));
    unrated
        .into_iter()
        .map(|item| item.item.media_ref())
        .take(weights.max_seeds)
        .collect()
}

pub fn score_candidate(
    profile: &TasteProfile,
    candidate: &MediaSummary,
    weights: &RecommendationWeights,
) -> f64 {
    let mut score = 0.0;

    if candidate
        .genre_ids
        .iter()
        .any(|g| profile.preferred_genres.contains(g))
    {
        score += weights.genre;
    }

    if profile
        .average_rating
        .is_some_and(|avg| candidate.vote_average >= avg)
    {
        score += weights.rating;
    }

    if profile.preferred_kind == Some(candidate.kind) {
        score += weights.kind;
    }

    score
}

/// Scores the pool and returns the top `top_n`.
///
/// Order: score descending, then external rating descending, then pool order.
pub fn rank_candidates(
    profile: &TasteProfile,
    pool: Vec<MediaSummary>,
    weights: &RecommendationWeights,
) -> Vec<Candidate> {
    let mut ranked: Vec<Candidate> = pool
        .into_iter()
        .map(|media| Candidate {
            recommendation_score: score_candidate(profile, &media, weights),
            media,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.recommendation_score
            .total_cmp(&a.recommendation_score)
            .then_with(|| b.media.vote_average.total_cmp(&a.media.vote_average))
    });
    ranked.truncate(weights.top_n);
    ranked
}

pub struct RecommendationEngine {
    store: Arc<dyn PersistenceStore>,
    client: Arc<ExternalMediaClient>,
    weights: RecommendationWeights,
}

impl RecommendationEngine {
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        client: Arc<ExternalMediaClient>,
        weights: RecommendationWeights,
    ) -> Self {
        Self {
            store,
            client,
            weights,
        }
    }

    pub async fn recommend(&self, request: &RecommendationRequest) -> AppResult<Recommendations> {
        match request.source {
            RecommendationSource::Trending => {
                return self.trending(request.kind, RecommendationMode::Trending).await;
            }
            RecommendationSource::Popular => {
                return self
                    .chart(request.kind, Chart::Popular, RecommendationMode::Popular)
                    .await;
            }
            RecommendationSource::TopRated => {
                return self
                    .chart(request.kind, Chart::TopRated, RecommendationMode::TopRated)
                    .await;
            }
            RecommendationSource::Watchlist | RecommendationSource::Seed { .. } => {}
        }

        let history = self
            .store
            .rated_watchlist(request.tenant_id, request.user_id)
            .await?;

        let (mode, seeds) = match request.source {
            RecommendationSource::Seed { id, kind } => {
                (RecommendationMode::Seed, vec![MediaRef { id, kind }])
            }
            _ => (
                RecommendationMode::Watchlist,
                select_seeds(&history, &self.weights),
            ),
        };

        if seeds.is_empty() {
            tracing::info!(
                tenant_id = request.tenant_id,
                user_id = request.user_id,
                "No watchlist history, falling back to trending"
            );
            return self
                .trending(request.kind, RecommendationMode::TrendingFallback)
                .await;
        }

        let profile = self.profile(&history).await;
        let pool = self.candidate_pool(&seeds, &history, request.kind).await;

        tracing::debug!(
            tenant_id = request.tenant_id,
            user_id = request.user_id,
            seeds = seeds.len(),
            pool = pool.len(),
            genres = profile.preferred_genres.len(),
            "Ranking recommendation candidates"
        );

        Ok(Recommendations {
            mode,
            items: rank_candidates(&profile, pool, &self.weights),
        })
    }

    /// Genres come from the details of liked items; lookups that fail are skipped
    async fn profile(&self, history: &[RatedItem]) -> TasteProfile {
        let liked: Vec<MediaRef> = history
            .iter()
            .filter(|item| valid_score(item).is_some_and(|s| s >= self.weights.high_rating))
            .map(|item| item.item.media_ref())
            .collect();

        let lookups = join_all(liked.iter().map(|media| self.client.details(*media))).await;

        let mut preferred_genres = BTreeSet::new();
        for (media, result) in liked.iter().zip(lookups) {
            match result {
                Ok(details) => preferred_genres.extend(details.genre_ids()),
                Err(e) => tracing::warn!(
                    error = %e,
                    external_id = media.id,
                    kind = %media.kind,
                    "Skipping liked item whose details could not be fetched"
                ),
            }
        }

        TasteProfile {
            preferred_genres,
            average_rating: average_rating(history),
            preferred_kind: preferred_kind(history),
        }
    }

    /// Similar and recommended titles for every seed, deduplicated, minus what the user already has
    async fn candidate_pool(
        &self,
        seeds: &[MediaRef],
        history: &[RatedItem],
        kind: Option<MediaKind>,
    ) -> Vec<MediaSummary> {
        let lookups = join_all(seeds.iter().map(|seed| async move {
            let (similar, recommended) =
                futures::join!(self.client.similar(*seed), self.client.recommended(*seed));
            (*seed, [similar, recommended])
        }))
        .await;

        let mut seen: HashSet<MediaRef> = history.iter().map(|i| i.item.media_ref()).collect();
        seen.extend(seeds.iter().copied());

        let mut pool = Vec::new();
        for (seed, results) in lookups {
            for result in results {
                let summaries = match result {
                    Ok(summaries) => summaries,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            external_id = seed.id,
                            kind = %seed.kind,
                            "Candidate lookup failed for seed"
                        );
                        continue;
                    }
                };

                for summary in summaries {
                    if kind.is_some_and(|k| k != summary.kind) {
                        continue;
                    }
                    if seen.insert(summary.media_ref()) {
                        pool.push(summary);
                    }
                }
            }
        }

        pool
    }

    async fn trending(
        &self,
        kind: Option<MediaKind>,
        mode: RecommendationMode,
    ) -> AppResult<Recommendations> {
        let items = self
            .client
            .trending(kind, TrendingWindow::Week)
            .await?
            .into_iter()
            .filter(|summary| kind.map_or(true, |k| k == summary.kind))
            .take(self.weights.top_n)
            .map(|media| Candidate {
                media,
                recommendation_score: 0.0,
            })
            .collect();

        Ok(Recommendations { mode, items })
    }

    /// Head of each requested kind's chart; `top_n` is shared evenly between kinds
    async fn chart(
        &self,
        kind: Option<MediaKind>,
        chart: Chart,
        mode: RecommendationMode,
    ) -> AppResult<Recommendations> {
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => vec![MediaKind::Movie, MediaKind::Series],
        };
        let share = (self.weights.top_n / kinds.len()).max(1);

        let lists = try_join_all(kinds.iter().map(|kind| self.client.chart(*kind, chart))).await?;

        let items = lists
            .into_iter()
            .flat_map(|list| list.into_iter().take(share))
            .map(|media| Candidate {
                media,
                recommendation_score: 0.0,
            })
            .collect();

        Ok(Recommendations { mode, items })
    }
}
