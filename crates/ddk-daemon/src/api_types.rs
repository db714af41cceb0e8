//! Request and response types for all ddk-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use ddk_schemas::SystemRanking;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Error body (any non-2xx)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// /v1/backfill/:system
// ---------------------------------------------------------------------------

/// Optional request body; an empty body means a full-history backfill.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillRequest {
    /// Restrict targets to the most recent N draws.
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillResponse {
    pub system: String,
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
}

// ---------------------------------------------------------------------------
// /v1/backfill/:system/commit  /v1/backfill/:system/discard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {
    pub system: String,
    /// Records moved into production (whole promotion group).
    pub promoted: u64,
    /// Staging rows cleared.
    pub cleared: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscardResponse {
    pub system: String,
    pub cleared: u64,
}

// ---------------------------------------------------------------------------
// /v1/ranking  /v1/systems/unranked
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingResponse {
    /// Expected accuracy of a uniformly random shortlist, for comparison.
    pub baseline_accuracy: f64,
    pub rows: Vec<SystemRanking>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSummary {
    pub name: String,
    pub version: String,
    pub description: String,
    pub complement_of: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnrankedResponse {
    pub systems: Vec<SystemSummary>,
}

// ---------------------------------------------------------------------------
// /v1/systems/:system/history
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPointDto {
    pub draw_id: i64,
    pub date: NaiveDate,
    /// `None` for draws where the predictor call failed.
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub system: String,
    pub points: Vec<HistoryPointDto>,
}

// ---------------------------------------------------------------------------
// /v1/ensemble/:tier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierResponse {
    pub tier: String,
    pub contributors: Vec<String>,
    pub shortlist: Vec<u8>,
}

// ---------------------------------------------------------------------------
// /v1/draws/ingested
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedResponse {
    /// False when the latest draw id was already seen; nothing was touched.
    pub new_draw: bool,
    pub latest_draw_id: Option<i64>,
    /// Cached predictions dropped.
    pub invalidated: u64,
}
