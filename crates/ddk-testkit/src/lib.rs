//! Shared fixtures for end-to-end pipeline scenarios.
//!
//! Provides scripted prediction systems with observable behavior, draw
//! builders, and [`DeskHarness`] - the full pipeline assembled over an
//! in-memory store.  Everything here is test plumbing; the scenarios
//! themselves live under `tests/`.

use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate};

use ddk_backfill::BackfillEngine;
use ddk_cache::{ExclusionCache, PredictionCache};
use ddk_config::DeskConfig;
use ddk_ensemble::EnsembleBuilder;
use ddk_promotion::PromotionProtocol;
use ddk_ranking::RankingEvaluator;
use ddk_registry::{PredictionSystem, SystemRegistry};
use ddk_schemas::Draw;
use ddk_store::{MemStore, PerformanceStore};

// ---------------------------------------------------------------------------
// Draw builders
// ---------------------------------------------------------------------------

/// A draw with an explicit date.
pub fn draw_on(id: i64, date: NaiveDate, primary: Vec<u8>, secondary: Vec<u8>) -> Draw {
    Draw {
        id,
        date,
        primary_set: primary,
        secondary_set: secondary,
    }
}

/// Consecutive daily draws starting 2024-01-01 with ids from 1, one per
/// primary set; every secondary set is `[1]`.
pub fn daily_draws(primaries: Vec<Vec<u8>>) -> Vec<Draw> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
    primaries
        .into_iter()
        .enumerate()
        .map(|(i, p)| draw_on(i as i64 + 1, start + Duration::days(i as i64), p, vec![1]))
        .collect()
}

// ---------------------------------------------------------------------------
// Scripted systems
// ---------------------------------------------------------------------------

/// Predicts the same shortlist on every call.
pub struct ConstantSystem {
    name: String,
    shortlist: Vec<u8>,
}

impl ConstantSystem {
    pub fn new(name: impl Into<String>, shortlist: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            shortlist,
        }
    }
}

impl PredictionSystem for ConstantSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, _history: &[Draw]) -> anyhow::Result<Vec<u8>> {
        Ok(self.shortlist.clone())
    }
}

/// Predicts a constant shortlist and records the length of every history
/// slice it was shown, in call order.
pub struct RecordingSystem {
    name: String,
    shortlist: Vec<u8>,
    seen: Arc<Mutex<Vec<usize>>>,
}

impl RecordingSystem {
    pub fn new(name: impl Into<String>, shortlist: Vec<u8>) -> (Self, Arc<Mutex<Vec<usize>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name: name.into(),
                shortlist,
                seen: Arc::clone(&seen),
            },
            seen,
        )
    }

    pub fn with_log(
        name: impl Into<String>,
        shortlist: Vec<u8>,
        seen: Arc<Mutex<Vec<usize>>>,
    ) -> Self {
        Self {
            name: name.into(),
            shortlist,
            seen,
        }
    }
}

impl PredictionSystem for RecordingSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, history: &[Draw]) -> anyhow::Result<Vec<u8>> {
        self.seen
            .lock()
            .expect("recording log poisoned")
            .push(history.len());
        Ok(self.shortlist.clone())
    }
}

/// Fails whenever the history slice has exactly `fail_on_len` draws;
/// otherwise behaves like [`ConstantSystem`].
pub struct FlakySystem {
    name: String,
    shortlist: Vec<u8>,
    fail_on_len: usize,
}

impl FlakySystem {
    pub fn new(name: impl Into<String>, shortlist: Vec<u8>, fail_on_len: usize) -> Self {
        Self {
            name: name.into(),
            shortlist,
            fail_on_len,
        }
    }
}

impl PredictionSystem for FlakySystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, history: &[Draw]) -> anyhow::Result<Vec<u8>> {
        if history.len() == self.fail_on_len {
            anyhow::bail!("scripted failure at history length {}", self.fail_on_len);
        }
        Ok(self.shortlist.clone())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// The whole pipeline over one [`MemStore`].
///
/// `store` keeps its concrete type so scenarios can reach the seeding and
/// inspection helpers that are not part of [`PerformanceStore`].
pub struct DeskHarness {
    pub store: Arc<MemStore>,
    pub registry: Arc<SystemRegistry>,
    pub backfill: BackfillEngine,
    pub promotion: PromotionProtocol,
    pub ranking: RankingEvaluator,
    pub ensemble: EnsembleBuilder,
    pub cache: Arc<PredictionCache>,
    pub exclusion: Arc<ExclusionCache>,
    pub config: DeskConfig,
}

impl DeskHarness {
    /// Seed `draws` and assemble every subsystem over one fresh store.
    pub async fn new(
        config: DeskConfig,
        registry: SystemRegistry,
        draws: Vec<Draw>,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(MemStore::new());
        store.seed_draws(draws).await?;

        let registry = Arc::new(registry);
        let dyn_store = Arc::clone(&store) as Arc<dyn PerformanceStore>;

        let backfill = BackfillEngine::new(
            Arc::clone(&dyn_store),
            Arc::clone(&registry),
            config.primary,
            config.secondary,
            config.backfill,
        );
        let promotion = PromotionProtocol::new(Arc::clone(&dyn_store), Arc::clone(&registry));
        let ranking = RankingEvaluator::new(Arc::clone(&dyn_store));
        let cache = Arc::new(PredictionCache::new(
            Arc::clone(&dyn_store),
            Arc::clone(&registry),
            config.primary,
        ));
        let ensemble = EnsembleBuilder::new(
            Arc::clone(&dyn_store),
            Arc::clone(&cache),
            config.tiers,
            config.shortlist_size,
        );
        let exclusion = Arc::new(ExclusionCache::new(
            Arc::clone(&dyn_store),
            config.exclusion,
            config.primary,
            config.secondary,
        ));

        Ok(Self {
            store,
            registry,
            backfill,
            promotion,
            ranking,
            ensemble,
            cache,
            exclusion,
            config,
        })
    }
}
