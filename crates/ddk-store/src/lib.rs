//! Storage seam for the evaluation pipeline.
//!
//! Every component receives a `&dyn PerformanceStore` (or an `Arc` of one)
//! by constructor injection; nothing holds a module-level database handle.
//! Two implementations ship:
//!
//! - [`PgStore`] - Postgres via sqlx, embedded migrations, promotion as a
//!   single SQL transaction.
//! - [`MemStore`] - in-memory maps behind one `RwLock`, used by unit and
//!   scenario tests as a drop-in fake. Promotion runs inside one write-lock
//!   critical section, giving the same all-or-nothing visibility.
//!
//! The staging/production split is the heart of the contract: staged rows
//! are scoped per system and have no effect on rankings or caches until a
//! promotion moves them into production atomically.

use chrono::NaiveDate;
use ddk_schemas::{CachedPrediction, Draw, ExclusionEntry, PerformanceRecord, PredictionKind, SystemRanking};

mod mem;
mod pg;

pub use mem::MemStore;
pub use pg::PgStore;

pub type Result<T> = anyhow::Result<T>;

/// Outcome of an atomic promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PromotionStats {
    /// Records moved (or overwritten) into production.
    pub promoted: u64,
    /// Staging rows cleared.
    pub cleared: u64,
}

/// One point of a system's production history, joined with the draw date.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPoint {
    pub draw_id: i64,
    pub accuracy: Option<f64>,
    pub date: NaiveDate,
}

/// The pipeline's view of storage.
///
/// Area invariant: at most one record per (draw_id, system_name) pair in
/// each of staging and production - all writes are upserts on that key.
#[async_trait::async_trait]
pub trait PerformanceStore: Send + Sync {
    // --- draw history (append-only, read-mostly) ---

    /// All draws in chronological order.
    async fn all_draws(&self) -> Result<Vec<Draw>>;

    /// Highest ingested draw id, if any draws exist.
    async fn latest_draw_id(&self) -> Result<Option<i64>>;

    /// Append one draw. Used by ingestion and test seeding; the evaluation
    /// core itself never writes draws.
    async fn append_draw(&self, draw: &Draw) -> Result<()>;

    // --- staging area ---

    async fn upsert_staging(&self, rec: &PerformanceRecord) -> Result<()>;

    /// Staged records for one system, ordered by draw_id ascending.
    async fn staging_for(&self, system: &str) -> Result<Vec<PerformanceRecord>>;

    /// Drop all staged records for one system. Returns rows removed.
    async fn clear_staging(&self, system: &str) -> Result<u64>;

    // --- production area ---

    /// Production records for one system, ordered by draw_id ascending.
    async fn production_for(&self, system: &str) -> Result<Vec<PerformanceRecord>>;

    /// Most recent `limit` production records joined with draw dates,
    /// newest first. Read-only; drives trend reporting.
    async fn history_for(&self, system: &str, limit: usize) -> Result<Vec<HistoryPoint>>;

    /// Atomically: move every staged record for each named system into
    /// production (overwriting on key), clear those staging areas, and
    /// recompute each system's ranking row from post-move production.
    ///
    /// All-or-nothing: on failure staging is untouched and production and
    /// rankings are unchanged.
    async fn promote(&self, systems: &[String]) -> Result<PromotionStats>;

    // --- rankings (derived) ---

    /// Recompute one system's ranking row from its production records.
    /// Scored records only: rows whose predictor failed carry no accuracy
    /// and are excluded from both the mean and the count.
    async fn recompute_ranking(&self, system: &str) -> Result<SystemRanking>;

    /// All ranking rows ordered by avg_accuracy descending; ties broken by
    /// system name ascending for stable output.
    async fn ranking(&self) -> Result<Vec<SystemRanking>>;

    async fn ranking_for(&self, system: &str) -> Result<Option<SystemRanking>>;

    // --- prediction cache rows ---

    async fn cached_prediction(&self, system: &str) -> Result<Option<CachedPrediction>>;

    async fn put_cached_prediction(&self, row: &CachedPrediction) -> Result<()>;

    async fn invalidate_prediction(&self, system: &str) -> Result<()>;

    async fn invalidate_all_predictions(&self) -> Result<u64>;

    // --- exclusion entries ---

    async fn exclusion(&self, kind: PredictionKind) -> Result<Option<ExclusionEntry>>;

    async fn put_exclusion(&self, entry: &ExclusionEntry) -> Result<()>;
}

/// Mean/count aggregate over scored records, shared by both stores.
///
/// Returns `(avg_accuracy, total_predictions)`. Records whose predictor
/// failed (no accuracy) are excluded from both.
pub(crate) fn aggregate_accuracy(records: &[PerformanceRecord]) -> (f64, i64) {
    let scored: Vec<f64> = records.iter().filter_map(|r| r.accuracy).collect();
    if scored.is_empty() {
        return (0.0, 0);
    }
    let sum: f64 = scored.iter().sum();
    (sum / scored.len() as f64, scored.len() as i64)
}
