//! Shared daemon state: one `AppState` wires every pipeline subsystem to a
//! single storage backend and is handed to the router behind an `Arc`.

use std::sync::Arc;

use tokio::sync::Mutex;

use ddk_backfill::BackfillEngine;
use ddk_cache::{ExclusionCache, PredictionCache};
use ddk_config::DeskConfig;
use ddk_ensemble::EnsembleBuilder;
use ddk_promotion::PromotionProtocol;
use ddk_ranking::RankingEvaluator;
use ddk_registry::SystemRegistry;
use ddk_store::PerformanceStore;

pub const SERVICE_NAME: &str = "ddk-daemon";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
    pub store: Arc<dyn PerformanceStore>,
    pub registry: Arc<SystemRegistry>,
    pub backfill: BackfillEngine,
    pub promotion: PromotionProtocol,
    pub ranking: RankingEvaluator,
    pub ensemble: EnsembleBuilder,
    pub cache: Arc<PredictionCache>,
    pub exclusion: Arc<ExclusionCache>,
    pub config: DeskConfig,
    /// Highest draw id seen by `/v1/draws/ingested`; makes re-notification
    /// of the same draw a no-op.
    pub last_seen_draw: Mutex<Option<i64>>,
}

impl AppState {
    /// Assemble every subsystem over one store and one registry.
    pub fn new(
        store: Arc<dyn PerformanceStore>,
        registry: Arc<SystemRegistry>,
        config: DeskConfig,
    ) -> Self {
        let backfill = BackfillEngine::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.primary,
            config.secondary,
            config.backfill,
        );
        let promotion = PromotionProtocol::new(Arc::clone(&store), Arc::clone(&registry));
        let ranking = RankingEvaluator::new(Arc::clone(&store));
        let cache = Arc::new(PredictionCache::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.primary,
        ));
        let ensemble = EnsembleBuilder::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            config.tiers,
            config.shortlist_size,
        );
        let exclusion = Arc::new(ExclusionCache::new(
            Arc::clone(&store),
            config.exclusion,
            config.primary,
            config.secondary,
        ));

        Self {
            store,
            registry,
            backfill,
            promotion,
            ranking,
            ensemble,
            cache,
            exclusion,
            config,
            last_seen_draw: Mutex::new(None),
        }
    }
}
