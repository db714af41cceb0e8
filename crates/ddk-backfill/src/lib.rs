//! Backfill engine: causal replay of one system across historical draws.
//!
//! Pipeline per draw: VALIDATE -> PREDICT (history strictly before the
//! draw) -> SCORE -> UPSERT into staging. Results stay invisible to rankings
//! and caches until a promotion commits them.
//!
//! Draws are processed in fixed-size batches; evaluation within a batch runs
//! concurrently, and an explicit sleep separates batches so a long backfill
//! neither starves the rest of the service nor hammers the history store.

use std::sync::Arc;

use chrono::Utc;
use ddk_config::BackfillConfig;
use ddk_registry::{PredictionSystem, RegistryError, SystemRegistry};
use ddk_schemas::{Draw, PerformanceRecord, SetGeometry};
use ddk_store::PerformanceStore;
use futures_util::future::join_all;
use tracing::{info, warn};

/// Backfill error variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackfillError {
    /// The named system is not in the registry.
    UnknownSystem { name: String },
    /// Storage failed; the run aborts (staged rows so far remain, and a
    /// re-run is safe because staging writes are upserts).
    Storage { message: String },
}

impl std::fmt::Display for BackfillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSystem { name } => write!(f, "unknown system '{name}'"),
            Self::Storage { message } => write!(f, "storage error: {message}"),
        }
    }
}

impl std::error::Error for BackfillError {}

impl From<RegistryError> for BackfillError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownSystem { name } => BackfillError::UnknownSystem { name },
            other => BackfillError::UnknownSystem {
                name: other.to_string(),
            },
        }
    }
}

/// Summary of one backfill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackfillReport {
    /// Draws scored and staged.
    pub processed: u64,
    /// Draws whose predictor call failed; staged with no score.
    pub failed: u64,
    /// Draws skipped for malformed stored data; nothing staged.
    pub skipped: u64,
}

/// Count of predicted values present in the actual set.
pub fn count_hits(predicted: &[u8], actual: &[u8]) -> u32 {
    predicted.iter().filter(|v| actual.contains(v)).count() as u32
}

/// The backfill engine. Stateless between runs; all state lives in the
/// injected store.
pub struct BackfillEngine {
    store: Arc<dyn PerformanceStore>,
    registry: Arc<SystemRegistry>,
    primary: SetGeometry,
    secondary: SetGeometry,
    config: BackfillConfig,
}

impl BackfillEngine {
    pub fn new(
        store: Arc<dyn PerformanceStore>,
        registry: Arc<SystemRegistry>,
        primary: SetGeometry,
        secondary: SetGeometry,
        config: BackfillConfig,
    ) -> Self {
        Self {
            store,
            registry,
            primary,
            secondary,
            config,
        }
    }

    /// Replay history for `system_name` into its staging area.
    ///
    /// `limit` restricts the *target* draws to the most recent N; the
    /// history visible to the predictor always starts at the beginning, and
    /// for a target draw D contains exactly the draws strictly earlier than
    /// D (anti-lookahead).
    ///
    /// Re-running with the same inputs is idempotent: every staging write is
    /// an upsert on (draw_id, system_name).
    pub async fn run(
        &self,
        system_name: &str,
        limit: Option<usize>,
    ) -> Result<BackfillReport, BackfillError> {
        let system = self.registry.instantiate(system_name)?;

        let draws = self.store.all_draws().await.map_err(storage)?;
        let first_target = match limit {
            Some(n) => draws.len().saturating_sub(n),
            None => 0,
        };

        info!(
            system = system_name,
            targets = draws.len() - first_target,
            batch_size = self.config.batch_size,
            "backfill starting"
        );

        let mut report = BackfillReport::default();
        let system: Arc<dyn PredictionSystem> = Arc::from(system);

        let target_indices: Vec<usize> = (first_target..draws.len()).collect();
        for (batch_no, batch) in target_indices.chunks(self.config.batch_size).enumerate() {
            // Cooperative pacing: yield between batches, never before the first.
            if batch_no > 0 && self.config.inter_batch_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.inter_batch_delay_ms,
                ))
                .await;
            }

            let outcomes = join_all(batch.iter().map(|&idx| {
                let system = Arc::clone(&system);
                let draws = &draws;
                async move {
                    self.evaluate_one(system_name, system.as_ref(), &draws[..idx], &draws[idx])
                        .await
                }
            }))
            .await;

            for outcome in outcomes {
                match outcome? {
                    DrawOutcome::Scored => report.processed += 1,
                    DrawOutcome::Failed => report.failed += 1,
                    DrawOutcome::Skipped => report.skipped += 1,
                }
            }
        }

        info!(
            system = system_name,
            processed = report.processed,
            failed = report.failed,
            skipped = report.skipped,
            "backfill finished"
        );
        Ok(report)
    }

    /// Evaluate one target draw against the history strictly before it.
    async fn evaluate_one(
        &self,
        system_name: &str,
        system: &dyn ddk_registry::PredictionSystem,
        history: &[Draw],
        target: &Draw,
    ) -> Result<DrawOutcome, BackfillError> {
        // Malformed stored data: skip and log, never fatal to the run.
        if let Err(e) = target.validate(self.primary, self.secondary) {
            warn!(system = system_name, draw_id = target.id, error = %e, "skipping malformed draw");
            return Ok(DrawOutcome::Skipped);
        }

        let record = match system.predict(history) {
            Ok(predicted) => {
                let hits = count_hits(&predicted, &target.primary_set);
                let accuracy = hits as f64 / self.primary.draw_size as f64 * 100.0;
                PerformanceRecord {
                    draw_id: target.id,
                    system_name: system_name.to_string(),
                    predicted_values: predicted,
                    actual_values: target.primary_set.clone(),
                    hit_count: Some(hits),
                    accuracy: Some(accuracy),
                    created_at: Utc::now(),
                }
            }
            Err(e) => {
                // Predictor errors are per-draw: record the failure and keep going.
                warn!(system = system_name, draw_id = target.id, error = %e, "predictor failed");
                PerformanceRecord {
                    draw_id: target.id,
                    system_name: system_name.to_string(),
                    predicted_values: Vec::new(),
                    actual_values: target.primary_set.clone(),
                    hit_count: None,
                    accuracy: None,
                    created_at: Utc::now(),
                }
            }
        };

        let failed = record.hit_count.is_none();
        self.store.upsert_staging(&record).await.map_err(storage)?;
        Ok(if failed {
            DrawOutcome::Failed
        } else {
            DrawOutcome::Scored
        })
    }
}

enum DrawOutcome {
    Scored,
    Failed,
    Skipped,
}

fn storage(e: anyhow::Error) -> BackfillError {
    BackfillError::Storage {
        message: format!("{e:#}"),
    }
}
