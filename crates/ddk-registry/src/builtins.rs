//! Built-in reference systems.
//!
//! These are deliberately simple statistical baselines; real systems plug in
//! through the same [`PredictionSystem`](crate::PredictionSystem) contract.
//! No claim of predictive validity - they exist so the pipeline always has
//! rankable systems, a paired complement, and a deterministic floor.

use ddk_schemas::{Draw, SetGeometry};

use crate::{PredictionSystem, SystemMeta, SystemRegistry};

/// Rank all domain values by `score` descending (or ascending when
/// `invert`), ties broken by ascending value, and keep the first
/// `shortlist_size`.
fn rank_domain(
    geom: SetGeometry,
    shortlist_size: u8,
    invert: bool,
    score: impl Fn(u8) -> i64,
) -> Vec<u8> {
    let mut values: Vec<u8> = (1..=geom.domain_size).collect();
    values.sort_by_key(|&v| {
        let s = score(v);
        (if invert { s } else { -s }, v)
    });
    values.truncate(shortlist_size as usize);
    values
}

// ---------------------------------------------------------------------------
// HotFrequency
// ---------------------------------------------------------------------------

/// Ranks values by how often they appeared in the primary sets of the
/// visible history. The inverted variant ranks least-frequent first and is
/// registered as the complement pair.
pub struct HotFrequency {
    geom: SetGeometry,
    shortlist_size: u8,
    invert: bool,
}

impl HotFrequency {
    pub fn new(geom: SetGeometry, shortlist_size: u8, invert: bool) -> Self {
        Self {
            geom,
            shortlist_size,
            invert,
        }
    }
}

impl PredictionSystem for HotFrequency {
    fn name(&self) -> &str {
        if self.invert {
            "hot-frequency-inverse"
        } else {
            "hot-frequency"
        }
    }

    fn predict(&self, history: &[Draw]) -> anyhow::Result<Vec<u8>> {
        let mut counts = vec![0i64; self.geom.domain_size as usize + 1];
        for draw in history {
            for &v in &draw.primary_set {
                if let Some(slot) = counts.get_mut(v as usize) {
                    *slot += 1;
                }
            }
        }
        Ok(rank_domain(self.geom, self.shortlist_size, self.invert, |v| {
            counts[v as usize]
        }))
    }
}

// ---------------------------------------------------------------------------
// ColdGap
// ---------------------------------------------------------------------------

/// Ranks values by how many draws ago they last appeared (never-seen values
/// rank as the longest gap). The inverted variant prefers the most recently
/// seen values.
pub struct ColdGap {
    geom: SetGeometry,
    shortlist_size: u8,
    invert: bool,
}

impl ColdGap {
    pub fn new(geom: SetGeometry, shortlist_size: u8, invert: bool) -> Self {
        Self {
            geom,
            shortlist_size,
            invert,
        }
    }
}

impl PredictionSystem for ColdGap {
    fn name(&self) -> &str {
        if self.invert {
            "cold-gap-inverse"
        } else {
            "cold-gap"
        }
    }

    fn predict(&self, history: &[Draw]) -> anyhow::Result<Vec<u8>> {
        // gap = draws since last appearance; i64::MAX for never-seen.
        let mut last_seen = vec![None::<usize>; self.geom.domain_size as usize + 1];
        for (idx, draw) in history.iter().enumerate() {
            for &v in &draw.primary_set {
                if let Some(slot) = last_seen.get_mut(v as usize) {
                    *slot = Some(idx);
                }
            }
        }
        let n = history.len();
        Ok(rank_domain(self.geom, self.shortlist_size, self.invert, |v| {
            match last_seen[v as usize] {
                Some(idx) => (n - 1 - idx) as i64,
                None => i64::MAX,
            }
        }))
    }
}

// ---------------------------------------------------------------------------
// UniformFloor
// ---------------------------------------------------------------------------

/// Constant shortlist `1..=shortlist_size`, regardless of history. Its
/// measured accuracy should converge on the random baseline; anything
/// ranking below it over a meaningful sample is suspect.
pub struct UniformFloor {
    shortlist_size: u8,
}

impl UniformFloor {
    pub fn new(shortlist_size: u8) -> Self {
        Self { shortlist_size }
    }
}

impl PredictionSystem for UniformFloor {
    fn name(&self) -> &str {
        "uniform-floor"
    }

    fn predict(&self, _history: &[Draw]) -> anyhow::Result<Vec<u8>> {
        Ok((1..=self.shortlist_size).collect())
    }
}

// ---------------------------------------------------------------------------
// Default registry
// ---------------------------------------------------------------------------

/// The statically-registered factory map the daemon boots with.
pub fn default_registry(primary: SetGeometry, shortlist_size: u8) -> SystemRegistry {
    let mut reg = SystemRegistry::new();

    // Registration of the built-ins cannot fail: names are distinct and
    // every complement is registered after its base.
    reg.register(
        SystemMeta::new("hot-frequency", "1.0.0", "most frequent primary values"),
        move || Box::new(HotFrequency::new(primary, shortlist_size, false)),
    )
    .expect("register hot-frequency");
    reg.register(
        SystemMeta::new(
            "hot-frequency-inverse",
            "1.0.0",
            "least frequent primary values",
        )
        .complement_of("hot-frequency"),
        move || Box::new(HotFrequency::new(primary, shortlist_size, true)),
    )
    .expect("register hot-frequency-inverse");

    reg.register(
        SystemMeta::new("cold-gap", "1.0.0", "longest-absent primary values"),
        move || Box::new(ColdGap::new(primary, shortlist_size, false)),
    )
    .expect("register cold-gap");
    reg.register(
        SystemMeta::new("cold-gap-inverse", "1.0.0", "most recently seen primary values")
            .complement_of("cold-gap"),
        move || Box::new(ColdGap::new(primary, shortlist_size, true)),
    )
    .expect("register cold-gap-inverse");

    reg.register(
        SystemMeta::new("uniform-floor", "1.0.0", "constant 1..=shortlist baseline"),
        move || Box::new(UniformFloor::new(shortlist_size)),
    )
    .expect("register uniform-floor");

    reg
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const GEOM: SetGeometry = SetGeometry {
        domain_size: 10,
        draw_size: 3,
    };

    fn draw(id: i64, primary: Vec<u8>) -> Draw {
        Draw {
            id,
            date: NaiveDate::from_ymd_opt(2026, 1, 1)
                .unwrap()
                .checked_add_days(chrono::Days::new(id as u64))
                .unwrap(),
            primary_set: primary,
            secondary_set: vec![1],
        }
    }

    #[test]
    fn hot_frequency_ranks_by_count_then_value() {
        let history = vec![
            draw(1, vec![5, 6, 7]),
            draw(2, vec![5, 6, 8]),
            draw(3, vec![5, 9, 10]),
        ];
        let s = HotFrequency::new(GEOM, 4, false);
        // 5 appears 3x, 6 2x, then 7/8/9/10 tie at 1 - ascending tie-break.
        assert_eq!(s.predict(&history).unwrap(), vec![5, 6, 7, 8]);
    }

    #[test]
    fn hot_frequency_inverse_prefers_unseen_values() {
        let history = vec![draw(1, vec![5, 6, 7])];
        let s = HotFrequency::new(GEOM, 3, true);
        assert_eq!(s.predict(&history).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn hot_frequency_on_empty_history_is_ascending_domain() {
        let s = HotFrequency::new(GEOM, 3, false);
        assert_eq!(s.predict(&[]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn cold_gap_prefers_longest_absent() {
        let history = vec![
            draw(1, vec![1, 2, 3]),
            draw(2, vec![4, 5, 6]),
            draw(3, vec![7, 8, 9]),
        ];
        let s = ColdGap::new(GEOM, 4, false);
        // 10 never seen, then 1/2/3 (gap 2), ascending tie-break.
        assert_eq!(s.predict(&history).unwrap(), vec![10, 1, 2, 3]);
    }

    #[test]
    fn cold_gap_inverse_prefers_most_recent() {
        let history = vec![draw(1, vec![1, 2, 3]), draw(2, vec![7, 8, 9])];
        let s = ColdGap::new(GEOM, 3, true);
        assert_eq!(s.predict(&history).unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn uniform_floor_is_constant() {
        let s = UniformFloor::new(5);
        assert_eq!(s.predict(&[]).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(
            s.predict(&[draw(1, vec![9, 10, 8])]).unwrap(),
            vec![1, 2, 3, 4, 5]
        );
    }

    #[test]
    fn default_registry_pairs_complements() {
        let reg = default_registry(GEOM, 5);
        assert_eq!(reg.len(), 5);
        let group = reg.promotion_group("hot-frequency").unwrap();
        assert_eq!(group, vec!["hot-frequency".to_string(), "hot-frequency-inverse".to_string()]);
    }
}
