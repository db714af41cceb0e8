//! Scenario: every daemon route drives the pipeline end to end over an
//! in-memory store.
//!
//! The router is composed in-process with a small seeded history and one
//! scripted constant-shortlist system, then exercised through
//! `tower::ServiceExt::oneshot`.  No DB or network required.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use http_body_util::BodyExt;
use tower::ServiceExt; // oneshot

use ddk_config::{DeskConfig, ExclusionConfig};
use ddk_daemon::{routes, state::AppState};
use ddk_registry::{PredictionSystem, SystemMeta, SystemRegistry};
use ddk_schemas::{Draw, SetGeometry};
use ddk_store::{MemStore, PerformanceStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

/// Always shortlists [1, 2, 3] regardless of history.
struct SteadyLow;

impl PredictionSystem for SteadyLow {
    fn name(&self) -> &str {
        "steady-low"
    }

    fn predict(&self, _history: &[Draw]) -> anyhow::Result<Vec<u8>> {
        Ok(vec![1, 2, 3])
    }
}

fn draw(id: i64, day: u32, primary: Vec<u8>) -> Draw {
    Draw {
        id,
        date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
        primary_set: primary,
        secondary_set: vec![1],
    }
}

/// Shared state over a MemStore seeded with three draws and one scripted
/// system.  Every value in every seeded draw is in [1, 2, 3], so the
/// scripted system scores 100% on each draw.
async fn seeded_state() -> Arc<AppState> {
    let mem = Arc::new(MemStore::new());
    mem.seed_draws(vec![
        draw(1, 1, vec![1, 2]),
        draw(2, 2, vec![2, 3]),
        draw(3, 3, vec![1, 3]),
    ])
    .await
    .expect("seeding draws");

    let mut registry = SystemRegistry::new();
    registry
        .register(
            SystemMeta::new("steady-low", "1.0.0", "constant low shortlist"),
            || Box::new(SteadyLow),
        )
        .expect("registering scripted system");

    let mut config = DeskConfig::default();
    config.primary = SetGeometry::new(10, 2);
    config.secondary = SetGeometry::new(5, 1);
    config.shortlist_size = 3;
    config.exclusion = ExclusionConfig {
        window: 10,
        excluded_count: 4,
    };

    let store: Arc<dyn PerformanceStore> = mem;
    Arc::new(AppState::new(store, Arc::new(registry), config))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_ok() {
    let st = seeded_state().await;
    let (status, body) = call(routes::build_router(st), get("/v1/health")).await;

    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "ddk-daemon");
}

// ---------------------------------------------------------------------------
// Backfill -> commit -> ranking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backfill_commit_then_ranking_shows_the_system() {
    let st = seeded_state().await;

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post("/v1/backfill/steady-low"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["processed"], 3);
    assert_eq!(json["failed"], 0);
    assert_eq!(json["skipped"], 0);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post("/v1/backfill/steady-low/commit"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["promoted"], 3);

    let (status, body) = call(routes::build_router(st), get("/v1/ranking")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["rows"][0]["system_name"], "steady-low");
    assert_eq!(json["rows"][0]["avg_accuracy"], 100.0);
    assert_eq!(json["rows"][0]["total_predictions"], 3);
    // Baseline for a 3-value shortlist over a 10-value domain.
    assert_eq!(json["baseline_accuracy"], 30.0);
}

#[tokio::test]
async fn backfill_unknown_system_is_404() {
    let st = seeded_state().await;
    let (status, body) = call(routes::build_router(st), post("/v1/backfill/nope")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let json = parse_json(body);
    assert!(json["error"].as_str().unwrap_or("").contains("nope"));
}

#[tokio::test]
async fn discard_clears_staging_without_touching_ranking() {
    let st = seeded_state().await;

    let (status, _) = call(
        routes::build_router(Arc::clone(&st)),
        post("/v1/backfill/steady-low"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post("/v1/backfill/steady-low/discard"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse_json(body)["cleared"], 3);

    let (_, body) = call(routes::build_router(st), get("/v1/ranking")).await;
    assert_eq!(parse_json(body)["rows"].as_array().unwrap().len(), 0);
}

// ---------------------------------------------------------------------------
// Unranked listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unranked_empties_after_commit() {
    let st = seeded_state().await;

    let (_, body) = call(
        routes::build_router(Arc::clone(&st)),
        get("/v1/systems/unranked"),
    )
    .await;
    let json = parse_json(body);
    assert_eq!(json["systems"][0]["name"], "steady-low");

    let (_, _) = call(
        routes::build_router(Arc::clone(&st)),
        post("/v1/backfill/steady-low"),
    )
    .await;
    let (_, _) = call(
        routes::build_router(Arc::clone(&st)),
        post("/v1/backfill/steady-low/commit"),
    )
    .await;

    let (_, body) = call(routes::build_router(st), get("/v1/systems/unranked")).await;
    assert_eq!(parse_json(body)["systems"].as_array().unwrap().len(), 0);
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[tokio::test]
async fn history_is_newest_first_and_respects_limit() {
    let st = seeded_state().await;

    for uri in ["/v1/backfill/steady-low", "/v1/backfill/steady-low/commit"] {
        let (status, _) = call(routes::build_router(Arc::clone(&st)), post(uri)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        get("/v1/systems/steady-low/history?limit=2"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    let points = json["points"].as_array().unwrap();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0]["draw_id"], 3);
    assert_eq!(points[1]["draw_id"], 2);

    let (status, _) = call(routes::build_router(st), get("/v1/systems/nope/history")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Predictions (compute-through cache)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prediction_read_computes_on_miss() {
    let st = seeded_state().await;

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        get("/v1/predictions/steady-low"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["primary_shortlist"], serde_json::json!([1, 2, 3]));
    // Complement covers the rest of the 10-value domain.
    assert_eq!(
        json["complement_shortlist"],
        serde_json::json!([4, 5, 6, 7, 8, 9, 10])
    );

    let (status, _) = call(routes::build_router(st), get("/v1/predictions/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Ensemble
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ensemble_gold_composes_from_ranked_systems() {
    let st = seeded_state().await;

    for uri in ["/v1/backfill/steady-low", "/v1/backfill/steady-low/commit"] {
        let (status, _) = call(routes::build_router(Arc::clone(&st)), post(uri)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        get("/v1/ensemble/gold"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["tier"], "GOLD");
    assert_eq!(json["contributors"], serde_json::json!(["steady-low"]));
    assert_eq!(json["shortlist"], serde_json::json!([1, 2, 3]));

    let (status, _) = call(routes::build_router(st), get("/v1/ensemble/platinum")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Exclusions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exclusion_read_is_404_until_retrained() {
    let st = seeded_state().await;

    let (status, _) = call(
        routes::build_router(Arc::clone(&st)),
        get("/v1/exclusions/primary"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post("/v1/exclusions/primary/retrain"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["kind"], "PRIMARY");
    // Values 1..=3 appear in the seeded draws; the 4 least frequent must
    // come from the never-drawn remainder.
    let excluded: Vec<u8> = serde_json::from_value(json["excluded_values"].clone()).unwrap();
    assert_eq!(excluded.len(), 4);
    assert!(excluded.iter().all(|v| (4..=10).contains(v)));

    let (status, _) = call(routes::build_router(st), get("/v1/exclusions/primary")).await;
    assert_eq!(status, StatusCode::OK);

    // Invalid kind.
    let st = seeded_state().await;
    let (status, _) = call(routes::build_router(st), get("/v1/exclusions/tertiary")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Draw ingestion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ingestion_invalidates_predictions_once_per_draw() {
    let st = seeded_state().await;

    // Populate the prediction cache.
    let (status, _) = call(
        routes::build_router(Arc::clone(&st)),
        get("/v1/predictions/steady-low"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post("/v1/draws/ingested"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["new_draw"], true);
    assert_eq!(json["latest_draw_id"], 3);
    assert_eq!(json["invalidated"], 1);

    // Same latest draw: a no-op.
    let (status, body) = call(routes::build_router(st), post("/v1/draws/ingested")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["new_draw"], false);
    assert_eq!(json["invalidated"], 0);
}
