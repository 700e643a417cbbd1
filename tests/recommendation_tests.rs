mod common;

use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use reel_monitor::{
    models::{Chart, MediaKind},
    services::{
        recommendations::{RecommendationMode, RecommendationRequest, RecommendationSource},
        RecommendationEngine, RecommendationWeights,
    },
};

const SCI_FI: u32 = 878;
const DRAMA: u32 = 18;
const COMEDY: u32 = 35;

struct Harness {
    provider: Arc<FakeProvider>,
    store: Arc<MemoryStore>,
    engine: RecommendationEngine,
}

fn harness() -> Harness {
    let provider = FakeProvider::new();
    let store = MemoryStore::new();
    let client = media_client(provider.clone(), Duration::from_secs(3600));
    let engine = RecommendationEngine::new(store.clone(), client, RecommendationWeights::default());
    Harness {
        provider,
        store,
        engine,
    }
}

fn request(source: RecommendationSource, kind: Option<MediaKind>) -> RecommendationRequest {
    RecommendationRequest {
        tenant_id: 1,
        user_id: 10,
        kind,
        source,
    }
}

/// Five movies; 101-103 are liked Sci-Fi, 104 is a so-so drama, 105 unrated
fn sci_fi_fan(h: &Harness) {
    for (i, (id, score, genre)) in [
        (101, Some(9.0), SCI_FI),
        (102, Some(8.0), SCI_FI),
        (103, Some(7.0), SCI_FI),
        (104, Some(4.0), DRAMA),
        (105, None, COMEDY),
    ]
    .into_iter()
    .enumerate()
    {
        h.store
            .add_watchlist(watchlist_item(i as i64 + 1, 1, 10, movie(id), score));
        h.provider.set_details(
            movie(id),
            movie_details(id, "Released", "2020-01-01", &[(genre, "genre")]),
        );
    }

    h.provider.set_similar(
        movie(101),
        json!({"results": [
            list_item(201, MediaKind::Movie, &[SCI_FI, DRAMA], 7.5),
            list_item(202, MediaKind::Movie, &[DRAMA], 7.5),
            list_item(102, MediaKind::Movie, &[SCI_FI], 8.0),
        ]}),
    );
    h.provider.set_recommended(
        movie(101),
        json!({"results": [
            list_item(203, MediaKind::Movie, &[COMEDY], 5.0),
            list_item(201, MediaKind::Movie, &[SCI_FI, DRAMA], 7.5),
        ]}),
    );
    h.provider.set_similar(
        movie(102),
        json!({"results": [list_item(204, MediaKind::Movie, &[SCI_FI], 6.0)]}),
    );
}

#[tokio::test]
async fn test_genre_overlap_ranks_above_otherwise_equal_candidates() {
    let h = harness();
    sci_fi_fan(&h);

    let result = h
        .engine
        .recommend(&request(RecommendationSource::Watchlist, None))
        .await
        .unwrap();

    assert_eq!(result.mode, RecommendationMode::Watchlist);

    let score = |id: u64| {
        result
            .items
            .iter()
            .find(|c| c.media.id == id)
            .map(|c| c.recommendation_score)
            .unwrap()
    };

    // 201 and 202 differ only in genre
    assert_eq!(score(201) - score(202), 3.0);
    // average rating is 7.0: 201 gets genre + rating + kind
    assert_eq!(score(201), 6.0);
    assert_eq!(score(204), 4.0);
    assert_eq!(score(203), 1.0);

    let ids: Vec<u64> = result.items.iter().map(|c| c.media.id).collect();
    assert_eq!(ids, vec![201, 204, 202, 203]);
}

#[tokio::test]
async fn test_watchlist_items_and_duplicates_are_excluded() {
    let h = harness();
    sci_fi_fan(&h);

    let result = h
        .engine
        .recommend(&request(RecommendationSource::Watchlist, None))
        .await
        .unwrap();

    let ids: Vec<u64> = result.items.iter().map(|c| c.media.id).collect();
    assert!(!ids.contains(&102));
    assert_eq!(ids.iter().filter(|id| **id == 201).count(), 1);
}

#[tokio::test]
async fn test_ranking_is_deterministic_and_cached() {
    let h = harness();
    sci_fi_fan(&h);
    let req = request(RecommendationSource::Watchlist, None);

    let first = h.engine.recommend(&req).await.unwrap();
    let calls_after_first = h.provider.list_calls.load(Ordering::SeqCst);
    let second = h.engine.recommend(&req).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.provider.list_calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn test_empty_watchlist_falls_back_to_trending() {
    let h = harness();
    h.provider.set_trending(json!({"results": [
        list_item(301, MediaKind::Movie, &[DRAMA], 8.0),
        list_item(302, MediaKind::Series, &[COMEDY], 7.0),
    ]}));

    let result = h
        .engine
        .recommend(&request(RecommendationSource::Watchlist, None))
        .await
        .unwrap();

    assert_eq!(result.mode, RecommendationMode::TrendingFallback);
    assert_eq!(result.items.len(), 2);
    assert!(result.items.iter().all(|c| c.recommendation_score == 0.0));

    let series_only = h
        .engine
        .recommend(&request(RecommendationSource::Trending, Some(MediaKind::Series)))
        .await
        .unwrap();
    assert_eq!(series_only.mode, RecommendationMode::Trending);
    assert_eq!(series_only.items.len(), 1);
    assert_eq!(series_only.items[0].media.id, 302);
}

#[tokio::test]
async fn test_explicit_seed_drives_the_pool() {
    let h = harness();
    h.provider.set_similar(
        series(400),
        json!({"results": [
            {"id": 401, "name": "Series 401", "genre_ids": [SCI_FI], "vote_average": 8.1},
            {"id": 402, "name": "Series 402", "genre_ids": [DRAMA], "vote_average": 6.2},
        ]}),
    );

    let result = h
        .engine
        .recommend(&request(
            RecommendationSource::Seed {
                id: 400,
                kind: MediaKind::Series,
            },
            None,
        ))
        .await
        .unwrap();

    assert_eq!(result.mode, RecommendationMode::Seed);
    let ids: Vec<u64> = result.items.iter().map(|c| c.media.id).collect();
    // no history: every score is zero, so external rating orders them
    assert_eq!(ids, vec![401, 402]);
    assert!(result.items.iter().all(|c| c.media.kind == MediaKind::Series));
}

#[tokio::test]
async fn test_kind_filter_limits_candidates() {
    let h = harness();
    h.store
        .add_watchlist(watchlist_item(1, 1, 10, movie(500), Some(9.0)));
    h.store
        .add_watchlist(watchlist_item(2, 1, 10, series(600), Some(8.0)));
    h.provider.set_similar(
        movie(500),
        json!({"results": [list_item(501, MediaKind::Movie, &[DRAMA], 7.0)]}),
    );
    h.provider.set_similar(
        series(600),
        json!({"results": [list_item(601, MediaKind::Series, &[DRAMA], 7.0)]}),
    );

    let result = h
        .engine
        .recommend(&request(RecommendationSource::Watchlist, Some(MediaKind::Series)))
        .await
        .unwrap();

    let ids: Vec<u64> = result.items.iter().map(|c| c.media.id).collect();
    assert_eq!(ids, vec![601]);
}

#[tokio::test]
async fn test_failed_candidate_lookup_is_skipped() {
    let h = harness();
    h.store
        .add_watchlist(watchlist_item(1, 1, 10, movie(700), Some(9.0)));
    // no details for the liked item: the profile just has no genres
    h.provider.set_recommended(
        movie(700),
        json!({"results": [list_item(701, MediaKind::Movie, &[DRAMA], 9.5)]}),
    );

    let result = h
        .engine
        .recommend(&request(RecommendationSource::Watchlist, None))
        .await
        .unwrap();

    assert_eq!(result.items.len(), 1);
    // rating (9.5 >= 9.0) + kind
    assert_eq!(result.items[0].recommendation_score, 3.0);
}

#[tokio::test]
async fn test_other_users_history_is_ignored() {
    let h = harness();
    h.store
        .add_watchlist(watchlist_item(1, 2, 10, movie(800), Some(9.0)));

    let result = h
        .engine
        .recommend(&request(RecommendationSource::Watchlist, None))
        .await
        .unwrap();

    assert_eq!(result.mode, RecommendationMode::TrendingFallback);
}

fn chart_page(kind: MediaKind, first_id: u64, len: u64) -> serde_json::Value {
    let results: Vec<_> = (0..len)
        .map(|i| list_item(first_id + i, kind, &[DRAMA], 8.0 - i as f64 * 0.1))
        .collect();
    json!({ "results": results })
}

#[tokio::test]
async fn test_popular_splits_between_kinds() {
    let h = harness();
    h.provider
        .set_chart(MediaKind::Movie, Chart::Popular, chart_page(MediaKind::Movie, 900, 8));
    h.provider
        .set_chart(MediaKind::Series, Chart::Popular, chart_page(MediaKind::Series, 950, 8));

    let result = h
        .engine
        .recommend(&request(RecommendationSource::Popular, None))
        .await
        .unwrap();

    assert_eq!(result.mode, RecommendationMode::Popular);
    let ids: Vec<u64> = result.items.iter().map(|c| c.media.id).collect();
    assert_eq!(ids, vec![900, 901, 902, 903, 904, 950, 951, 952, 953, 954]);
    assert!(result.items.iter().all(|c| c.recommendation_score == 0.0));
}

#[tokio::test]
async fn test_top_rated_for_one_kind_fills_the_list() {
    let h = harness();
    h.provider
        .set_chart(MediaKind::Movie, Chart::TopRated, chart_page(MediaKind::Movie, 1000, 20));
    h.provider
        .set_chart(MediaKind::Series, Chart::TopRated, chart_page(MediaKind::Series, 2000, 20));

    let result = h
        .engine
        .recommend(&request(RecommendationSource::TopRated, Some(MediaKind::Series)))
        .await
        .unwrap();

    assert_eq!(result.mode, RecommendationMode::TopRated);
    assert_eq!(result.items.len(), 10);
    assert!(result.items.iter().all(|c| c.media.kind == MediaKind::Series));
    assert_eq!(result.items[0].media.id, 2000);
}

