//! The two caches at the end of the pipeline.
//!
//! [`PredictionCache`] is invalidation-driven compute-through: a miss
//! recomputes via the registered system against full current history, and
//! concurrent misses for the same key collapse into a single recomputation.
//! [`ExclusionCache`] is deliberately different: reads never compute; only
//! an explicit retrain refreshes an entry. Do not unify them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use ddk_config::ExclusionConfig;
use ddk_registry::{RegistryError, SystemRegistry};
use ddk_schemas::{CachedPrediction, Draw, ExclusionEntry, PredictionKind, SetGeometry};
use ddk_store::PerformanceStore;
use tracing::{info, warn};

/// Cache error variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheError {
    /// The named system is not in the registry.
    UnknownSystem { name: String },
    /// The predictor failed on a cache miss; nothing was stored.
    Compute { name: String, message: String },
    /// Storage failed.
    Storage { message: String },
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSystem { name } => write!(f, "unknown system '{name}'"),
            Self::Compute { name, message } => {
                write!(f, "prediction compute failed for '{name}': {message}")
            }
            Self::Storage { message } => write!(f, "storage error: {message}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<RegistryError> for CacheError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownSystem { name } => CacheError::UnknownSystem { name },
            other => CacheError::UnknownSystem {
                name: other.to_string(),
            },
        }
    }
}

fn storage(e: anyhow::Error) -> CacheError {
    CacheError::Storage {
        message: format!("{e:#}"),
    }
}

// ---------------------------------------------------------------------------
// PredictionCache
// ---------------------------------------------------------------------------

/// Memoized latest prediction per system.
///
/// No time-based expiry: entries live until a new draw is ingested and
/// `invalidate`/`invalidate_all` deletes them. A failed recomputation
/// leaves the cache empty - a poisoned or partial entry is never stored.
pub struct PredictionCache {
    store: Arc<dyn PerformanceStore>,
    registry: Arc<SystemRegistry>,
    primary: SetGeometry,
    /// Per-key single-flight locks. The outer mutex only guards the map;
    /// the inner async mutex is held for the duration of one recomputation.
    flights: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PredictionCache {
    pub fn new(
        store: Arc<dyn PerformanceStore>,
        registry: Arc<SystemRegistry>,
        primary: SetGeometry,
    ) -> Self {
        Self {
            store,
            registry,
            primary,
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Hit: return immediately. Miss: recompute against full history under
    /// the per-key flight lock, store, return.
    pub async fn get(&self, system: &str) -> Result<CachedPrediction, CacheError> {
        if let Some(hit) = self
            .store
            .cached_prediction(system)
            .await
            .map_err(storage)?
        {
            return Ok(hit);
        }

        // Validate the name before touching the flight map, or arbitrary
        // request strings would grow it without bound.
        self.registry.lookup(system)?;

        let flight = self.flight_lock(system);
        let _held = flight.lock().await;

        // A concurrent miss may have filled the entry while we waited.
        if let Some(hit) = self
            .store
            .cached_prediction(system)
            .await
            .map_err(storage)?
        {
            return Ok(hit);
        }

        let predictor = self.registry.instantiate(system)?;
        let history = self.store.all_draws().await.map_err(storage)?;
        let shortlist = predictor
            .predict(&history)
            .map_err(|e| CacheError::Compute {
                name: system.to_string(),
                message: format!("{e:#}"),
            })?;

        let row = CachedPrediction {
            system_name: system.to_string(),
            complement_shortlist: complement_of(&shortlist, self.primary),
            primary_shortlist: shortlist,
            updated_at: Utc::now(),
        };
        self.store.put_cached_prediction(&row).await.map_err(storage)?;
        info!(system, "prediction cache refilled");
        Ok(row)
    }

    /// Peek without computing. Used by reporting paths that must not pay
    /// for a recomputation.
    pub async fn peek(&self, system: &str) -> Result<Option<CachedPrediction>, CacheError> {
        self.store.cached_prediction(system).await.map_err(storage)
    }

    pub async fn invalidate(&self, system: &str) -> Result<(), CacheError> {
        self.store.invalidate_prediction(system).await.map_err(storage)
    }

    /// Called on new-draw ingestion. Returns entries removed.
    pub async fn invalidate_all(&self) -> Result<u64, CacheError> {
        self.store.invalidate_all_predictions().await.map_err(storage)
    }

    fn flight_lock(&self, system: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.flights.lock().expect("flight map lock poisoned");
        Arc::clone(
            map.entry(system.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

/// Domain values absent from the shortlist, ascending.
fn complement_of(shortlist: &[u8], geom: SetGeometry) -> Vec<u8> {
    (1..=geom.domain_size)
        .filter(|v| !shortlist.contains(v))
        .collect()
}

// ---------------------------------------------------------------------------
// ExclusionCache
// ---------------------------------------------------------------------------

/// Excluded-values cache, keyed by prediction kind.
///
/// Staleness policy differs from [`PredictionCache`] on purpose: `get`
/// never computes - a miss stays a miss until [`ExclusionCache::retrain`]
/// rebuilds the entry synchronously.
pub struct ExclusionCache {
    store: Arc<dyn PerformanceStore>,
    config: ExclusionConfig,
    primary: SetGeometry,
    secondary: SetGeometry,
}

impl ExclusionCache {
    pub fn new(
        store: Arc<dyn PerformanceStore>,
        config: ExclusionConfig,
        primary: SetGeometry,
        secondary: SetGeometry,
    ) -> Self {
        Self {
            store,
            config,
            primary,
            secondary,
        }
    }

    /// Cached entry only; never computes on miss.
    pub async fn get(&self, kind: PredictionKind) -> Result<Option<ExclusionEntry>, CacheError> {
        self.store.exclusion(kind).await.map_err(storage)
    }

    /// Synchronously retrain the exclusion model for one kind and overwrite
    /// the cache entry.
    ///
    /// Model: over the most recent `window` draws, the `excluded_count`
    /// least frequent values are excluded. Confidence is the mean absence
    /// rate of the excluded values across the window (1.0 = never appeared).
    pub async fn retrain(&self, kind: PredictionKind) -> Result<ExclusionEntry, CacheError> {
        let draws = self.store.all_draws().await.map_err(storage)?;
        let window_start = draws.len().saturating_sub(self.config.window);
        let window = &draws[window_start..];

        let geom = match kind {
            PredictionKind::Primary => self.primary,
            PredictionKind::Secondary => self.secondary,
        };

        let mut counts = vec![0u32; geom.domain_size as usize + 1];
        for draw in window {
            for &v in set_for(draw, kind) {
                if let Some(slot) = counts.get_mut(v as usize) {
                    *slot += 1;
                }
            }
        }

        let mut values: Vec<u8> = (1..=geom.domain_size).collect();
        values.sort_by_key(|&v| (counts[v as usize], v));
        values.truncate(self.config.excluded_count.min(geom.domain_size as usize));
        values.sort_unstable();

        let confidence = if window.is_empty() || values.is_empty() {
            0.0
        } else {
            let n = window.len() as f64;
            values
                .iter()
                .map(|&v| 1.0 - counts[v as usize] as f64 / n)
                .sum::<f64>()
                / values.len() as f64
        };

        let entry = ExclusionEntry {
            kind,
            excluded_values: values,
            confidence,
            last_draw_id: draws.last().map(|d| d.id).unwrap_or(0),
        };
        self.store.put_exclusion(&entry).await.map_err(storage)?;
        info!(kind = kind.as_str(), confidence, "exclusion model retrained");
        Ok(entry)
    }

    /// Retrain both kinds, logging (not propagating) per-kind failures.
    /// This is the body of the detached background retrain.
    pub async fn retrain_all_logged(&self) {
        for kind in [PredictionKind::Primary, PredictionKind::Secondary] {
            if let Err(e) = self.retrain(kind).await {
                warn!(kind = kind.as_str(), error = %e, "background retrain failed");
            }
        }
    }
}

fn set_for(draw: &Draw, kind: PredictionKind) -> &[u8] {
    match kind {
        PredictionKind::Primary => &draw.primary_set,
        PredictionKind::Secondary => &draw.secondary_set,
    }
}
