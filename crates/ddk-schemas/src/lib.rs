use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Geometry of one value set inside a draw: `draw_size` values are drawn
/// from the domain `1..=domain_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetGeometry {
    pub domain_size: u8,
    pub draw_size: u8,
}

impl SetGeometry {
    pub fn new(domain_size: u8, draw_size: u8) -> Self {
        debug_assert!(draw_size > 0 && draw_size <= domain_size);
        Self {
            domain_size,
            draw_size,
        }
    }
}

/// One immutable occurrence of the scored event. Append-only: draws are
/// never updated or deleted once ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draw {
    /// Sequential id assigned at ingestion.
    pub id: i64,
    /// Unique, monotonically increasing as ingested.
    pub date: NaiveDate,
    /// Ascending, `primary.draw_size` values in `1..=primary.domain_size`.
    pub primary_set: Vec<u8>,
    /// Ascending, `secondary.draw_size` values in `1..=secondary.domain_size`.
    pub secondary_set: Vec<u8>,
}

/// Why a stored draw failed structural validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawValidationError {
    WrongSetSize {
        kind: PredictionKind,
        expected: u8,
        got: usize,
    },
    ValueOutOfDomain {
        kind: PredictionKind,
        value: u8,
        domain_size: u8,
    },
    DuplicateValue {
        kind: PredictionKind,
        value: u8,
    },
}

impl std::fmt::Display for DrawValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongSetSize {
                kind,
                expected,
                got,
            } => write!(f, "{} set has {} values, expected {}", kind.as_str(), got, expected),
            Self::ValueOutOfDomain {
                kind,
                value,
                domain_size,
            } => write!(
                f,
                "{} value {} outside domain 1..={}",
                kind.as_str(),
                value,
                domain_size
            ),
            Self::DuplicateValue { kind, value } => {
                write!(f, "{} value {} appears more than once", kind.as_str(), value)
            }
        }
    }
}

impl std::error::Error for DrawValidationError {}

impl Draw {
    /// Structural validation against the configured geometry.
    ///
    /// Backfill calls this per draw; a failing draw is skipped and logged,
    /// never fatal to the run.
    pub fn validate(
        &self,
        primary: SetGeometry,
        secondary: SetGeometry,
    ) -> Result<(), DrawValidationError> {
        validate_set(&self.primary_set, primary, PredictionKind::Primary)?;
        validate_set(&self.secondary_set, secondary, PredictionKind::Secondary)?;
        Ok(())
    }
}

fn validate_set(
    values: &[u8],
    geom: SetGeometry,
    kind: PredictionKind,
) -> Result<(), DrawValidationError> {
    if values.len() != geom.draw_size as usize {
        return Err(DrawValidationError::WrongSetSize {
            kind,
            expected: geom.draw_size,
            got: values.len(),
        });
    }
    let mut seen = [false; 256];
    for &v in values {
        if v == 0 || v > geom.domain_size {
            return Err(DrawValidationError::ValueOutOfDomain {
                kind,
                value: v,
                domain_size: geom.domain_size,
            });
        }
        if seen[v as usize] {
            return Err(DrawValidationError::DuplicateValue { kind, value: v });
        }
        seen[v as usize] = true;
    }
    Ok(())
}

/// Which value set a prediction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionKind {
    Primary,
    Secondary,
}

impl PredictionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionKind::Primary => "PRIMARY",
            PredictionKind::Secondary => "SECONDARY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PRIMARY" => Some(PredictionKind::Primary),
            "SECONDARY" => Some(PredictionKind::Secondary),
            _ => None,
        }
    }
}

/// One scored prediction for one (draw, system) pair.
///
/// `hit_count`/`accuracy` are `None` when the predictor call itself failed;
/// such records count as *failed*, not skipped, and still occupy the
/// (draw_id, system_name) slot so re-runs stay idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub draw_id: i64,
    pub system_name: String,
    pub predicted_values: Vec<u8>,
    pub actual_values: Vec<u8>,
    pub hit_count: Option<u32>,
    /// `hit_count / draw_size * 100`.
    pub accuracy: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Per-system aggregate derived from production records. Recomputed, never
/// hand-edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemRanking {
    pub system_name: String,
    pub avg_accuracy: f64,
    pub total_predictions: i64,
    pub last_updated: DateTime<Utc>,
}

/// Memoized latest prediction for one system. Owned exclusively by the
/// prediction cache; invalidated whenever a new draw is ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPrediction {
    pub system_name: String,
    pub primary_shortlist: Vec<u8>,
    pub complement_shortlist: Vec<u8>,
    pub updated_at: DateTime<Utc>,
}

/// Excluded-values entry, keyed by prediction kind. Refreshed only by an
/// explicit retrain, never on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusionEntry {
    pub kind: PredictionKind,
    pub excluded_values: Vec<u8>,
    pub confidence: f64,
    pub last_draw_id: i64,
}
