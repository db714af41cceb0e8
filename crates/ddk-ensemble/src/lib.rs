//! Ensemble tier builder: Gold/Silver/Bronze composite predictions derived
//! from the current ranking.
//!
//! A tier of size K reads the top-K ranking rows, fetches each
//! contributor's current cached shortlist (compute-through on miss), and
//! accumulates a weighted vote: every appearance of a value adds the
//! contributing system's average accuracy to that value's score. The tier
//! shortlist is the top values by score, ties broken by ascending value.
//!
//! Tiers are recomputed from the *current* ranking snapshot per request and
//! are never persisted or backfilled. When evaluating tiers against
//! historical draws, note that the ranking itself already incorporates
//! those draws - a point-in-time ranking variant would be needed for an
//! unbiased historical evaluation.

use std::collections::BTreeMap;
use std::sync::Arc;

use ddk_cache::{CacheError, PredictionCache};
use ddk_config::TierSizes;
use ddk_store::PerformanceStore;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The three configured ensemble tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TierKind {
    Gold,
    Silver,
    Bronze,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Gold => "GOLD",
            TierKind::Silver => "SILVER",
            TierKind::Bronze => "BRONZE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GOLD" => Some(TierKind::Gold),
            "SILVER" => Some(TierKind::Silver),
            "BRONZE" => Some(TierKind::Bronze),
            _ => None,
        }
    }
}

/// One composed tier prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPrediction {
    pub tier: TierKind,
    /// Systems that contributed, best-ranked first.
    pub contributors: Vec<String>,
    pub shortlist: Vec<u8>,
}

/// Weighted vote over `(weight, shortlist)` contributions.
///
/// Pure and deterministic: same inputs, same output. Ties between equal
/// scores resolve to the ascending value.
pub fn weighted_vote(contributions: &[(f64, Vec<u8>)], shortlist_size: usize) -> Vec<u8> {
    let mut scores: BTreeMap<u8, f64> = BTreeMap::new();
    for (weight, shortlist) in contributions {
        for &value in shortlist {
            *scores.entry(value).or_insert(0.0) += *weight;
        }
    }

    let mut ranked: Vec<(u8, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.into_iter().take(shortlist_size).map(|(v, _)| v).collect()
}

/// Builds tier predictions from the live ranking and prediction cache.
pub struct EnsembleBuilder {
    store: Arc<dyn PerformanceStore>,
    cache: Arc<PredictionCache>,
    tiers: TierSizes,
    shortlist_size: u8,
}

impl EnsembleBuilder {
    pub fn new(
        store: Arc<dyn PerformanceStore>,
        cache: Arc<PredictionCache>,
        tiers: TierSizes,
        shortlist_size: u8,
    ) -> Self {
        Self {
            store,
            cache,
            tiers,
            shortlist_size,
        }
    }

    fn size_of(&self, tier: TierKind) -> usize {
        match tier {
            TierKind::Gold => self.tiers.gold,
            TierKind::Silver => self.tiers.silver,
            TierKind::Bronze => self.tiers.bronze,
        }
    }

    /// Compose one tier from the current ranking snapshot.
    ///
    /// A ranked system that is no longer in the registry cannot produce a
    /// shortlist; it is dropped from the composition with a warning rather
    /// than failing the whole tier.
    pub async fn build(&self, tier: TierKind) -> anyhow::Result<TierPrediction> {
        let ranking = self.store.ranking().await?;
        let top = ranking.into_iter().take(self.size_of(tier));

        let mut contributors = Vec::new();
        let mut contributions = Vec::new();
        for row in top {
            match self.cache.get(&row.system_name).await {
                Ok(prediction) => {
                    contributors.push(row.system_name);
                    contributions.push((row.avg_accuracy, prediction.primary_shortlist));
                }
                Err(CacheError::UnknownSystem { name }) => {
                    warn!(system = name, "ranked system missing from registry; dropped from tier");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(TierPrediction {
            tier,
            contributors,
            shortlist: weighted_vote(&contributions, self.shortlist_size as usize),
        })
    }
}
