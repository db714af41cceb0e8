//! Ranking evaluator: per-system aggregates over production records, the
//! ordered leaderboard, and the random-guess baseline.
//!
//! Aggregates are fully derived: `recompute` rebuilds a system's row from
//! its production records and is the only way a ranking row changes.
//! Records whose predictor failed carry no accuracy and count toward
//! neither the mean nor the total.

use std::sync::Arc;

use ddk_schemas::{SetGeometry, SystemRanking};
use ddk_store::{HistoryPoint, PerformanceStore};
use tracing::debug;

/// Expected accuracy (percent) of a uniformly random shortlist.
///
/// For a shortlist of `shortlist_size` values drawn without replacement
/// from `1..=domain_size`, scored against a draw of `draw_size` winners,
/// the hit count is hypergeometric with mean
/// `shortlist_size * draw_size / domain_size`. Accuracy is hits over
/// `draw_size`, so the draw size cancels out of the expectation.
///
/// Pure combinatorics - independent of any stored data.
pub fn random_baseline(geom: SetGeometry, shortlist_size: u8) -> f64 {
    let expected_hits = shortlist_size as f64 * geom.draw_size as f64 / geom.domain_size as f64;
    expected_hits / geom.draw_size as f64 * 100.0
}

/// Read/recompute front door for rankings. Stateless; all data lives in the
/// injected store.
pub struct RankingEvaluator {
    store: Arc<dyn PerformanceStore>,
}

impl RankingEvaluator {
    pub fn new(store: Arc<dyn PerformanceStore>) -> Self {
        Self { store }
    }

    /// Rebuild one system's ranking row from its production records.
    pub async fn recompute(&self, system: &str) -> anyhow::Result<SystemRanking> {
        let row = self.store.recompute_ranking(system).await?;
        debug!(
            system,
            avg_accuracy = row.avg_accuracy,
            total = row.total_predictions,
            "ranking recomputed"
        );
        Ok(row)
    }

    /// All ranking rows, best average accuracy first.
    pub async fn ranking(&self) -> anyhow::Result<Vec<SystemRanking>> {
        self.store.ranking().await
    }

    /// Most recent production records joined with draw dates, newest first.
    /// Read-only; no side effects.
    pub async fn history(&self, system: &str, limit: usize) -> anyhow::Result<Vec<HistoryPoint>> {
        self.store.history_for(system, limit).await
    }
}
