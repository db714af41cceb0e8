//! Axum router and all HTTP handlers for ddk-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, warn};

use ddk_backfill::BackfillError;
use ddk_cache::CacheError;
use ddk_ensemble::TierKind;
use ddk_promotion::PromotionError;
use ddk_ranking::random_baseline;
use ddk_schemas::PredictionKind;

use crate::{
    api_types::{
        BackfillRequest, BackfillResponse, CommitResponse, DiscardResponse, ErrorResponse,
        HealthResponse, HistoryPointDto, HistoryQuery, HistoryResponse, IngestedResponse,
        RankingResponse, SystemSummary, TierResponse, UnrankedResponse,
    },
    state::{AppState, SERVICE_NAME, SERVICE_VERSION},
};

/// History points returned when the caller does not pass `?limit=`.
const DEFAULT_HISTORY_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/backfill/:system", post(backfill_run))
        .route("/v1/backfill/:system/commit", post(backfill_commit))
        .route("/v1/backfill/:system/discard", post(backfill_discard))
        .route("/v1/ranking", get(ranking))
        .route("/v1/systems/unranked", get(systems_unranked))
        .route("/v1/systems/:system/history", get(system_history))
        .route("/v1/predictions/:system", get(prediction))
        .route("/v1/ensemble/:tier", get(ensemble_tier))
        .route("/v1/exclusions/:kind", get(exclusion))
        .route("/v1/exclusions/:kind/retrain", post(exclusion_retrain))
        .route("/v1/draws/ingested", post(draws_ingested))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn error_body(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: msg.into() })).into_response()
}

fn backfill_error(err: BackfillError) -> Response {
    match &err {
        BackfillError::UnknownSystem { .. } => error_body(StatusCode::NOT_FOUND, err.to_string()),
        BackfillError::Storage { .. } => {
            error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn promotion_error(err: PromotionError) -> Response {
    match &err {
        PromotionError::UnknownSystem { .. } => error_body(StatusCode::NOT_FOUND, err.to_string()),
        PromotionError::ConcurrencyConflict { .. } => {
            error_body(StatusCode::CONFLICT, err.to_string())
        }
        PromotionError::Storage { .. } => {
            error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn cache_error(err: CacheError) -> Response {
    match &err {
        CacheError::UnknownSystem { .. } => error_body(StatusCode::NOT_FOUND, err.to_string()),
        CacheError::Compute { .. } | CacheError::Storage { .. } => {
            error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn internal_error(err: anyhow::Error) -> Response {
    warn!(error = %err, "request failed");
    error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: SERVICE_NAME,
            version: SERVICE_VERSION,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/backfill/:system
// ---------------------------------------------------------------------------

/// Replay history for one system into its staging area.  An empty body runs
/// the full history; `{"limit": n}` restricts targets to the last n draws.
pub(crate) async fn backfill_run(
    State(st): State<Arc<AppState>>,
    Path(system): Path<String>,
    body: Option<Json<BackfillRequest>>,
) -> Response {
    let req = body.map(|Json(b)| b).unwrap_or_default();

    match st.backfill.run(&system, req.limit).await {
        Ok(report) => {
            info!(
                system = %system,
                processed = report.processed,
                failed = report.failed,
                skipped = report.skipped,
                "backfill complete"
            );
            (
                StatusCode::OK,
                Json(BackfillResponse {
                    system,
                    processed: report.processed,
                    failed: report.failed,
                    skipped: report.skipped,
                }),
            )
                .into_response()
        }
        Err(e) => backfill_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/backfill/:system/commit
// ---------------------------------------------------------------------------

/// Promote the system's staged records (and its complement's, if paired)
/// into production.  Atomic: on any storage failure nothing moves.
pub(crate) async fn backfill_commit(
    State(st): State<Arc<AppState>>,
    Path(system): Path<String>,
) -> Response {
    match st.promotion.commit(&system).await {
        Ok(stats) => {
            info!(system = %system, promoted = stats.promoted, "staging committed");
            (
                StatusCode::OK,
                Json(CommitResponse {
                    system,
                    promoted: stats.promoted,
                    cleared: stats.cleared,
                }),
            )
                .into_response()
        }
        Err(e) => promotion_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/backfill/:system/discard
// ---------------------------------------------------------------------------

pub(crate) async fn backfill_discard(
    State(st): State<Arc<AppState>>,
    Path(system): Path<String>,
) -> Response {
    match st.promotion.discard(&system).await {
        Ok(cleared) => {
            info!(system = %system, cleared, "staging discarded");
            (StatusCode::OK, Json(DiscardResponse { system, cleared })).into_response()
        }
        Err(e) => promotion_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/ranking
// ---------------------------------------------------------------------------

pub(crate) async fn ranking(State(st): State<Arc<AppState>>) -> Response {
    match st.ranking.ranking().await {
        Ok(rows) => (
            StatusCode::OK,
            Json(RankingResponse {
                baseline_accuracy: random_baseline(st.config.primary, st.config.shortlist_size),
                rows,
            }),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/systems/unranked
// ---------------------------------------------------------------------------

/// Registered systems with no ranking row yet, i.e. never committed.
pub(crate) async fn systems_unranked(State(st): State<Arc<AppState>>) -> Response {
    let ranked: Vec<String> = match st.ranking.ranking().await {
        Ok(rows) => rows.into_iter().map(|r| r.system_name).collect(),
        Err(e) => return internal_error(e),
    };

    let systems = st
        .registry
        .list_unregistered(&ranked)
        .into_iter()
        .map(|m| SystemSummary {
            name: m.name.clone(),
            version: m.version.clone(),
            description: m.description.clone(),
            complement_of: m.complement_of.clone(),
        })
        .collect();

    (StatusCode::OK, Json(UnrankedResponse { systems })).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/systems/:system/history
// ---------------------------------------------------------------------------

pub(crate) async fn system_history(
    State(st): State<Arc<AppState>>,
    Path(system): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    if !st.registry.contains(&system) {
        return error_body(StatusCode::NOT_FOUND, format!("unknown system '{system}'"));
    }

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    match st.ranking.history(&system, limit).await {
        Ok(points) => {
            let points = points
                .into_iter()
                .map(|p| HistoryPointDto {
                    draw_id: p.draw_id,
                    date: p.date,
                    accuracy: p.accuracy,
                })
                .collect();
            (StatusCode::OK, Json(HistoryResponse { system, points })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/predictions/:system
// ---------------------------------------------------------------------------

/// Compute-through read: a cache miss computes against the full history,
/// stores the result, and returns it.  Concurrent misses for the same system
/// collapse into a single computation.
pub(crate) async fn prediction(
    State(st): State<Arc<AppState>>,
    Path(system): Path<String>,
) -> Response {
    match st.cache.get(&system).await {
        Ok(row) => (StatusCode::OK, Json(row)).into_response(),
        Err(e) => cache_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/ensemble/:tier
// ---------------------------------------------------------------------------

pub(crate) async fn ensemble_tier(
    State(st): State<Arc<AppState>>,
    Path(tier): Path<String>,
) -> Response {
    let Some(kind) = TierKind::parse(&tier.to_ascii_uppercase()) else {
        return error_body(StatusCode::BAD_REQUEST, format!("unknown tier '{tier}'"));
    };

    match st.ensemble.build(kind).await {
        Ok(pred) => (
            StatusCode::OK,
            Json(TierResponse {
                tier: pred.tier.as_str().to_string(),
                contributors: pred.contributors,
                shortlist: pred.shortlist,
            }),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/exclusions/:kind
// ---------------------------------------------------------------------------

/// Read-only: a missing entry is 404, never a recomputation.
pub(crate) async fn exclusion(
    State(st): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Response {
    let Some(k) = PredictionKind::parse(&kind.to_ascii_uppercase()) else {
        return error_body(
            StatusCode::BAD_REQUEST,
            format!("unknown prediction kind '{kind}'"),
        );
    };

    match st.exclusion.get(k).await {
        Ok(Some(entry)) => (StatusCode::OK, Json(entry)).into_response(),
        Ok(None) => error_body(
            StatusCode::NOT_FOUND,
            format!("no exclusion entry for {}", k.as_str()),
        ),
        Err(e) => cache_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/exclusions/:kind/retrain
// ---------------------------------------------------------------------------

pub(crate) async fn exclusion_retrain(
    State(st): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Response {
    let Some(k) = PredictionKind::parse(&kind.to_ascii_uppercase()) else {
        return error_body(
            StatusCode::BAD_REQUEST,
            format!("unknown prediction kind '{kind}'"),
        );
    };

    match st.exclusion.retrain(k).await {
        Ok(entry) => {
            info!(kind = k.as_str(), excluded = entry.excluded_values.len(), "retrained");
            (StatusCode::OK, Json(entry)).into_response()
        }
        Err(e) => cache_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/draws/ingested
// ---------------------------------------------------------------------------

/// Notification that the draw table changed.  Invalidates every cached
/// prediction and spawns a detached exclusion retrain; repeated calls with
/// no new draw are no-ops.
pub(crate) async fn draws_ingested(State(st): State<Arc<AppState>>) -> Response {
    let latest = match st.store.latest_draw_id().await {
        Ok(id) => id,
        Err(e) => return internal_error(e),
    };

    let mut seen = st.last_seen_draw.lock().await;
    if *seen == latest {
        return (
            StatusCode::OK,
            Json(IngestedResponse {
                new_draw: false,
                latest_draw_id: latest,
                invalidated: 0,
            }),
        )
            .into_response();
    }
    // Invalidate first: if it fails the draw id stays unrecorded, so a
    // retry runs the invalidation again instead of short-circuiting.
    let invalidated = match st.cache.invalidate_all().await {
        Ok(n) => n,
        Err(e) => return cache_error(e),
    };
    *seen = latest;
    drop(seen);

    // Retrain off the request path; failures are logged, never surfaced.
    let exclusion = Arc::clone(&st.exclusion);
    tokio::spawn(async move {
        exclusion.retrain_all_logged().await;
    });

    info!(latest_draw_id = ?latest, invalidated, "draw ingestion handled");
    (
        StatusCode::OK,
        Json(IngestedResponse {
            new_draw: true,
            latest_draw_id: latest,
            invalidated,
        }),
    )
        .into_response()
}
