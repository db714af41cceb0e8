//! Effective configuration for the evaluation service.
//!
//! Loaded once at startup from an optional JSON file, then overridden by
//! environment variables. Components receive the parts they need by value;
//! nothing reads the environment after startup.

use anyhow::{bail, Context, Result};
use ddk_schemas::SetGeometry;
use serde::{Deserialize, Serialize};
use std::fs;

pub const ENV_CONFIG_PATH: &str = "DDK_CONFIG_PATH";
pub const ENV_BIND_ADDR: &str = "DDK_BIND_ADDR";
pub const ENV_DB_URL: &str = "DDK_DATABASE_URL";

/// Batching knobs for the backfill engine.
///
/// Draws are evaluated concurrently within a batch of `batch_size`, with a
/// `inter_batch_delay_ms` sleep between batches so a long backfill does not
/// starve the rest of the service or hammer the history store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillConfig {
    pub batch_size: usize,
    pub inter_batch_delay_ms: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            inter_batch_delay_ms: 100,
        }
    }
}

/// Ensemble tier sizes: how many top-ranked systems contribute per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSizes {
    pub gold: usize,
    pub silver: usize,
    pub bronze: usize,
}

impl Default for TierSizes {
    fn default() -> Self {
        Self {
            gold: 3,
            silver: 6,
            bronze: 9,
        }
    }
}

/// Exclusion-model knobs: how many recent draws the retrain looks at and how
/// many values it excludes per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionConfig {
    pub window: usize,
    pub excluded_count: usize,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            window: 50,
            excluded_count: 10,
        }
    }
}

/// The complete effective configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    /// Primary set geometry (draw_size values from 1..=domain_size).
    pub primary: SetGeometry,
    /// Secondary set geometry.
    pub secondary: SetGeometry,
    /// Length of the ranked shortlist every prediction system returns.
    pub shortlist_size: u8,
    pub backfill: BackfillConfig,
    pub tiers: TierSizes,
    pub exclusion: ExclusionConfig,
    /// Daemon bind address, overridable via DDK_BIND_ADDR.
    pub bind_addr: String,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            primary: SetGeometry {
                domain_size: 49,
                draw_size: 5,
            },
            secondary: SetGeometry {
                domain_size: 10,
                draw_size: 1,
            },
            shortlist_size: 25,
            backfill: BackfillConfig::default(),
            tiers: TierSizes::default(),
            exclusion: ExclusionConfig::default(),
            bind_addr: "127.0.0.1:8790".to_string(),
        }
    }
}

impl DeskConfig {
    /// Load from the file named by `DDK_CONFIG_PATH` (defaults when unset),
    /// then apply env overrides and validate.
    pub fn load_from_env() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) => Self::load_file(&path)?,
            Err(_) => Self::default(),
        };
        if let Ok(addr) = std::env::var(ENV_BIND_ADDR) {
            cfg.bind_addr = addr;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load and validate a JSON config file.
    pub fn load_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read config: {path}"))?;
        let cfg: DeskConfig =
            serde_json::from_str(&raw).with_context(|| format!("parse config: {path}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject geometries and knobs the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (label, geom) in [("primary", self.primary), ("secondary", self.secondary)] {
            if geom.draw_size == 0 {
                bail!("{label}.draw_size must be > 0");
            }
            if geom.draw_size > geom.domain_size {
                bail!(
                    "{label}.draw_size {} exceeds domain_size {}",
                    geom.draw_size,
                    geom.domain_size
                );
            }
        }
        if self.shortlist_size == 0 || self.shortlist_size > self.primary.domain_size {
            bail!(
                "shortlist_size {} must be in 1..={}",
                self.shortlist_size,
                self.primary.domain_size
            );
        }
        if self.backfill.batch_size == 0 {
            bail!("backfill.batch_size must be > 0");
        }
        if !(self.tiers.gold <= self.tiers.silver && self.tiers.silver <= self.tiers.bronze) {
            bail!(
                "tier sizes must be non-decreasing: gold {} silver {} bronze {}",
                self.tiers.gold,
                self.tiers.silver,
                self.tiers.bronze
            );
        }
        if self.exclusion.excluded_count >= self.primary.domain_size as usize {
            bail!("exclusion.excluded_count must leave at least one playable value");
        }
        Ok(())
    }
}
