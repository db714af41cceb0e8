//! Promotion protocol: atomic transfer of staged backfill results into the
//! globally visible production set.
//!
//! Production drives the public leaderboard and ensemble membership, so an
//! unvalidated backfill must never touch it. `commit` moves every staged
//! record for a system - and its registered complement pair - into
//! production, clears those staging areas, and recomputes the affected
//! ranking rows, all as one atomic unit delegated to
//! [`PerformanceStore::promote`]. On any failure the store rolls back:
//! staging is untouched, production unchanged.
//!
//! A per-system in-flight guard rejects a second commit for the same system
//! (or its pair) while one is running; the caller retries.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use ddk_registry::{RegistryError, SystemRegistry};
use ddk_store::{PerformanceStore, PromotionStats};
use tracing::info;

/// Promotion error variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromotionError {
    /// The named system is not in the registry.
    UnknownSystem { name: String },
    /// A commit for this system (or its pair) is already in flight.
    ConcurrencyConflict { name: String },
    /// The store transaction failed and rolled back.
    Storage { message: String },
}

impl std::fmt::Display for PromotionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSystem { name } => write!(f, "unknown system '{name}'"),
            Self::ConcurrencyConflict { name } => {
                write!(f, "commit already in flight for '{name}'; retry")
            }
            Self::Storage { message } => write!(f, "promotion rolled back: {message}"),
        }
    }
}

impl std::error::Error for PromotionError {}

impl From<RegistryError> for PromotionError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownSystem { name } => PromotionError::UnknownSystem { name },
            other => PromotionError::UnknownSystem {
                name: other.to_string(),
            },
        }
    }
}

/// Commit/discard front door. One instance is shared by all request
/// handlers; the in-flight set is the whole of its own state.
pub struct PromotionProtocol {
    store: Arc<dyn PerformanceStore>,
    registry: Arc<SystemRegistry>,
    in_flight: Mutex<HashSet<String>>,
}

impl PromotionProtocol {
    pub fn new(store: Arc<dyn PerformanceStore>, registry: Arc<SystemRegistry>) -> Self {
        Self {
            store,
            registry,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Atomically promote `system` and its complement pair.
    ///
    /// Committing an empty staging area is a no-op that still refreshes the
    /// ranking rows (zero rows moved).
    pub async fn commit(&self, system: &str) -> Result<PromotionStats, PromotionError> {
        let group = self.registry.promotion_group(system)?;
        let _guard = self.claim(&group)?;

        let stats = self
            .store
            .promote(&group)
            .await
            .map_err(|e| PromotionError::Storage {
                message: format!("{e:#}"),
            })?;

        info!(
            system,
            group = ?group,
            promoted = stats.promoted,
            "promotion committed"
        );
        Ok(stats)
    }

    /// Clear staging for `system` and its pair without touching production.
    pub async fn discard(&self, system: &str) -> Result<u64, PromotionError> {
        let group = self.registry.promotion_group(system)?;
        let _guard = self.claim(&group)?;

        let mut cleared = 0;
        for name in &group {
            cleared += self
                .store
                .clear_staging(name)
                .await
                .map_err(|e| PromotionError::Storage {
                    message: format!("{e:#}"),
                })?;
        }

        info!(system, cleared, "staging discarded");
        Ok(cleared)
    }

    /// Reserve the whole group or reject with a conflict. The returned guard
    /// releases the reservation on drop, including on the error paths.
    fn claim(&self, group: &[String]) -> Result<InFlightGuard<'_>, PromotionError> {
        let mut slots = self.in_flight.lock().expect("in-flight lock poisoned");
        if let Some(busy) = group.iter().find(|name| slots.contains(*name)) {
            return Err(PromotionError::ConcurrencyConflict { name: busy.clone() });
        }
        for name in group {
            slots.insert(name.clone());
        }
        Ok(InFlightGuard {
            slots: &self.in_flight,
            names: group.to_vec(),
        })
    }
}

struct InFlightGuard<'a> {
    slots: &'a Mutex<HashSet<String>>,
    names: Vec<String>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut slots) = self.slots.lock() {
            for name in &self.names {
                slots.remove(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use ddk_registry::{PredictionSystem, SystemMeta};
    use ddk_schemas::{Draw, PerformanceRecord};
    use ddk_store::MemStore;

    struct Stub;
    impl PredictionSystem for Stub {
        fn name(&self) -> &str {
            "stub"
        }
        fn predict(&self, _history: &[Draw]) -> anyhow::Result<Vec<u8>> {
            Ok(vec![1])
        }
    }

    fn registry_with_pair() -> SystemRegistry {
        let mut reg = SystemRegistry::new();
        reg.register(SystemMeta::new("alpha", "1.0.0", ""), || Box::new(Stub))
            .unwrap();
        reg.register(
            SystemMeta::new("alpha-inverse", "1.0.0", "").complement_of("alpha"),
            || Box::new(Stub),
        )
        .unwrap();
        reg
    }

    fn rec(system: &str, draw_id: i64, accuracy: f64) -> PerformanceRecord {
        PerformanceRecord {
            draw_id,
            system_name: system.to_string(),
            predicted_values: vec![1],
            actual_values: vec![1, 2, 3, 4, 5],
            hit_count: Some(1),
            accuracy: Some(accuracy),
            created_at: Utc::now(),
        }
    }

    async fn seeded_store() -> Arc<MemStore> {
        let store = Arc::new(MemStore::new());
        store
            .seed_draws(vec![Draw {
                id: 1,
                date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                primary_set: vec![1, 2, 3, 4, 5],
                secondary_set: vec![1],
            }])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn commit_carries_the_complement_pair() {
        let store = seeded_store().await;
        store.upsert_staging(&rec("alpha", 1, 20.0)).await.unwrap();
        store
            .upsert_staging(&rec("alpha-inverse", 1, 80.0))
            .await
            .unwrap();

        let protocol = PromotionProtocol::new(store.clone(), Arc::new(registry_with_pair()));
        let stats = protocol.commit("alpha").await.unwrap();
        assert_eq!(stats.promoted, 2);

        assert!(store.staging_for("alpha").await.unwrap().is_empty());
        assert!(store.staging_for("alpha-inverse").await.unwrap().is_empty());
        assert_eq!(store.production_for("alpha").await.unwrap().len(), 1);
        assert_eq!(store.production_for("alpha-inverse").await.unwrap().len(), 1);
        assert!(store.ranking_for("alpha-inverse").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn discard_clears_staging_only() {
        let store = seeded_store().await;
        store.upsert_staging(&rec("alpha", 1, 20.0)).await.unwrap();

        let protocol = PromotionProtocol::new(store.clone(), Arc::new(registry_with_pair()));
        let cleared = protocol.discard("alpha").await.unwrap();
        assert_eq!(cleared, 1);
        assert!(store.staging_for("alpha").await.unwrap().is_empty());
        assert!(store.production_for("alpha").await.unwrap().is_empty());
        assert!(store.ranking_for("alpha").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_system_is_rejected() {
        let protocol =
            PromotionProtocol::new(seeded_store().await, Arc::new(registry_with_pair()));
        assert_eq!(
            protocol.commit("ghost").await.unwrap_err(),
            PromotionError::UnknownSystem {
                name: "ghost".to_string()
            }
        );
    }

    #[tokio::test]
    async fn concurrent_commit_for_same_group_conflicts() {
        let store = seeded_store().await;
        let protocol = PromotionProtocol::new(store, Arc::new(registry_with_pair()));

        // Hold the group reservation as a live guard, then try to commit the
        // paired system: both directions must conflict.
        let group = vec!["alpha".to_string(), "alpha-inverse".to_string()];
        let guard = protocol.claim(&group).unwrap();

        let err = protocol.commit("alpha-inverse").await.unwrap_err();
        assert!(matches!(err, PromotionError::ConcurrencyConflict { .. }));

        drop(guard);
        // Released: commit proceeds (empty staging, zero stats).
        let stats = protocol.commit("alpha-inverse").await.unwrap();
        assert_eq!(stats.promoted, 0);
    }

    #[tokio::test]
    async fn commit_of_empty_staging_is_a_noop_with_fresh_ranking() {
        let store = seeded_store().await;
        let protocol = PromotionProtocol::new(store.clone(), Arc::new(registry_with_pair()));
        let stats = protocol.commit("alpha").await.unwrap();
        assert_eq!(stats, PromotionStats::default());
        let row = store.ranking_for("alpha").await.unwrap().unwrap();
        assert_eq!(row.total_predictions, 0);
    }
}
