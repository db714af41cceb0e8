//! In-memory store: the test fake.
//!
//! One `RwLock` over the whole state keeps the promotion critical section
//! trivially atomic - the write guard is held across move + clear +
//! ranking recompute, so no reader can observe a half-promoted state.

use std::collections::BTreeMap;

use anyhow::bail;
use chrono::Utc;
use ddk_schemas::{
    CachedPrediction, Draw, ExclusionEntry, PerformanceRecord, PredictionKind, SystemRanking,
};
use tokio::sync::RwLock;

use crate::{aggregate_accuracy, HistoryPoint, PerformanceStore, PromotionStats, Result};

#[derive(Default)]
struct MemInner {
    /// Chronological; append-only.
    draws: Vec<Draw>,
    /// Keyed by (system_name, draw_id) - the area uniqueness invariant.
    staging: BTreeMap<(String, i64), PerformanceRecord>,
    production: BTreeMap<(String, i64), PerformanceRecord>,
    rankings: BTreeMap<String, SystemRanking>,
    cached: BTreeMap<String, CachedPrediction>,
    exclusions: BTreeMap<&'static str, ExclusionEntry>,
}

/// In-memory `PerformanceStore`.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<MemInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a chronological draw history in one call (test convenience).
    pub async fn seed_draws(&self, draws: Vec<Draw>) -> Result<()> {
        for d in draws {
            self.append_draw(&d).await?;
        }
        Ok(())
    }

    /// Number of staged rows for a system (test assertion helper).
    pub async fn staging_count(&self, system: &str) -> usize {
        let g = self.inner.read().await;
        g.staging.keys().filter(|(s, _)| s == system).count()
    }
}

fn ranking_from_production(
    production: &BTreeMap<(String, i64), PerformanceRecord>,
    system: &str,
) -> SystemRanking {
    let records: Vec<PerformanceRecord> = production
        .iter()
        .filter(|((s, _), _)| s == system)
        .map(|(_, r)| r.clone())
        .collect();
    let (avg_accuracy, total_predictions) = aggregate_accuracy(&records);
    SystemRanking {
        system_name: system.to_string(),
        avg_accuracy,
        total_predictions,
        last_updated: Utc::now(),
    }
}

#[async_trait::async_trait]
impl PerformanceStore for MemStore {
    async fn all_draws(&self) -> Result<Vec<Draw>> {
        Ok(self.inner.read().await.draws.clone())
    }

    async fn latest_draw_id(&self) -> Result<Option<i64>> {
        Ok(self.inner.read().await.draws.last().map(|d| d.id))
    }

    async fn append_draw(&self, draw: &Draw) -> Result<()> {
        let mut g = self.inner.write().await;
        if let Some(last) = g.draws.last() {
            if draw.id <= last.id || draw.date <= last.date {
                bail!(
                    "draw id/date must be strictly increasing: got id {} date {} after id {} date {}",
                    draw.id,
                    draw.date,
                    last.id,
                    last.date
                );
            }
        }
        g.draws.push(draw.clone());
        Ok(())
    }

    async fn upsert_staging(&self, rec: &PerformanceRecord) -> Result<()> {
        let mut g = self.inner.write().await;
        g.staging
            .insert((rec.system_name.clone(), rec.draw_id), rec.clone());
        Ok(())
    }

    async fn staging_for(&self, system: &str) -> Result<Vec<PerformanceRecord>> {
        let g = self.inner.read().await;
        Ok(g.staging
            .iter()
            .filter(|((s, _), _)| s == system)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn clear_staging(&self, system: &str) -> Result<u64> {
        let mut g = self.inner.write().await;
        let before = g.staging.len();
        g.staging.retain(|(s, _), _| s != system);
        Ok((before - g.staging.len()) as u64)
    }

    async fn production_for(&self, system: &str) -> Result<Vec<PerformanceRecord>> {
        let g = self.inner.read().await;
        Ok(g.production
            .iter()
            .filter(|((s, _), _)| s == system)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn history_for(&self, system: &str, limit: usize) -> Result<Vec<HistoryPoint>> {
        let g = self.inner.read().await;
        let dates: BTreeMap<i64, chrono::NaiveDate> =
            g.draws.iter().map(|d| (d.id, d.date)).collect();
        let mut points: Vec<HistoryPoint> = g
            .production
            .iter()
            .filter(|((s, _), _)| s == system)
            .filter_map(|((_, draw_id), r)| {
                dates.get(draw_id).map(|date| HistoryPoint {
                    draw_id: *draw_id,
                    accuracy: r.accuracy,
                    date: *date,
                })
            })
            .collect();
        points.sort_by(|a, b| b.draw_id.cmp(&a.draw_id));
        points.truncate(limit);
        Ok(points)
    }

    async fn promote(&self, systems: &[String]) -> Result<PromotionStats> {
        // Single write guard held across all three steps: no reader sees a
        // half-promoted state, and nothing here can fail midway.
        let mut g = self.inner.write().await;
        let mut stats = PromotionStats::default();

        for system in systems {
            let staged: Vec<((String, i64), PerformanceRecord)> = g
                .staging
                .iter()
                .filter(|((s, _), _)| s == system)
                .map(|(k, r)| (k.clone(), r.clone()))
                .collect();

            for (key, rec) in staged {
                g.production.insert(key.clone(), rec);
                g.staging.remove(&key);
                stats.promoted += 1;
                stats.cleared += 1;
            }

            let row = ranking_from_production(&g.production, system);
            g.rankings.insert(system.clone(), row);
        }

        Ok(stats)
    }

    async fn recompute_ranking(&self, system: &str) -> Result<SystemRanking> {
        let mut g = self.inner.write().await;
        let row = ranking_from_production(&g.production, system);
        g.rankings.insert(system.to_string(), row.clone());
        Ok(row)
    }

    async fn ranking(&self) -> Result<Vec<SystemRanking>> {
        let g = self.inner.read().await;
        let mut rows: Vec<SystemRanking> = g.rankings.values().cloned().collect();
        rows.sort_by(|a, b| {
            b.avg_accuracy
                .partial_cmp(&a.avg_accuracy)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.system_name.cmp(&b.system_name))
        });
        Ok(rows)
    }

    async fn ranking_for(&self, system: &str) -> Result<Option<SystemRanking>> {
        Ok(self.inner.read().await.rankings.get(system).cloned())
    }

    async fn cached_prediction(&self, system: &str) -> Result<Option<CachedPrediction>> {
        Ok(self.inner.read().await.cached.get(system).cloned())
    }

    async fn put_cached_prediction(&self, row: &CachedPrediction) -> Result<()> {
        let mut g = self.inner.write().await;
        g.cached.insert(row.system_name.clone(), row.clone());
        Ok(())
    }

    async fn invalidate_prediction(&self, system: &str) -> Result<()> {
        self.inner.write().await.cached.remove(system);
        Ok(())
    }

    async fn invalidate_all_predictions(&self) -> Result<u64> {
        let mut g = self.inner.write().await;
        let n = g.cached.len() as u64;
        g.cached.clear();
        Ok(n)
    }

    async fn exclusion(&self, kind: PredictionKind) -> Result<Option<ExclusionEntry>> {
        Ok(self.inner.read().await.exclusions.get(kind.as_str()).cloned())
    }

    async fn put_exclusion(&self, entry: &ExclusionEntry) -> Result<()> {
        let mut g = self.inner.write().await;
        g.exclusions.insert(entry.kind.as_str(), entry.clone());
        Ok(())
    }
}
