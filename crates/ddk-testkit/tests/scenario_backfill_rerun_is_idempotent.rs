//! Scenario: re-running a backfill leaves the staging area unchanged.
//!
//! Every staging write is an upsert on (draw_id, system_name), so a second
//! identical run produces the same record set, including for a flaky
//! predictor whose unscored rows occupy their slot.

use ddk_config::DeskConfig;
use ddk_registry::{SystemMeta, SystemRegistry};
use ddk_schemas::PerformanceRecord;
use ddk_store::PerformanceStore;
use ddk_testkit::{daily_draws, DeskHarness, FlakySystem};

/// The comparable part of a staged record (`created_at` moves on rewrite).
fn key_fields(r: &PerformanceRecord) -> (i64, Vec<u8>, Vec<u8>, Option<u32>, Option<f64>) {
    (
        r.draw_id,
        r.predicted_values.clone(),
        r.actual_values.clone(),
        r.hit_count,
        r.accuracy,
    )
}

#[tokio::test]
async fn second_run_produces_an_identical_staging_set() -> anyhow::Result<()> {
    let mut registry = SystemRegistry::new();
    registry.register(
        SystemMeta::new("flaky", "1.0.0", "fails on the third target"),
        || Box::new(FlakySystem::new("flaky", vec![1, 2, 3], 2)),
    )?;

    let desk = DeskHarness::new(
        DeskConfig::default(),
        registry,
        daily_draws(vec![
            vec![1, 2, 9, 10, 11],
            vec![3, 4, 12, 13, 14],
            vec![5, 6, 15, 16, 17],
            vec![7, 8, 18, 19, 20],
        ]),
    )
    .await?;

    let first = desk.backfill.run("flaky", None).await?;
    assert_eq!(first.processed, 3);
    assert_eq!(first.failed, 1);
    let snapshot_a: Vec<_> = desk
        .store
        .staging_for("flaky")
        .await?
        .iter()
        .map(key_fields)
        .collect();
    assert_eq!(snapshot_a.len(), 4);

    let second = desk.backfill.run("flaky", None).await?;
    assert_eq!(second.processed, first.processed);
    assert_eq!(second.failed, first.failed);
    let snapshot_b: Vec<_> = desk
        .store
        .staging_for("flaky")
        .await?
        .iter()
        .map(key_fields)
        .collect();

    assert_eq!(snapshot_a, snapshot_b);

    Ok(())
}
