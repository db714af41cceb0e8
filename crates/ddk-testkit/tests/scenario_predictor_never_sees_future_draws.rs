//! Scenario: the history shown to a predictor is strictly causal.
//!
//! For target draw at index i the predictor must see exactly the i earlier
//! draws, never the target itself or anything after it - including when the
//! run is limited to the most recent targets.

use std::sync::{Arc, Mutex};

use ddk_config::DeskConfig;
use ddk_registry::{SystemMeta, SystemRegistry};
use ddk_testkit::{daily_draws, DeskHarness, RecordingSystem};

fn five_draws() -> Vec<Vec<u8>> {
    vec![
        vec![1, 2, 3, 4, 5],
        vec![6, 7, 8, 9, 10],
        vec![11, 12, 13, 14, 15],
        vec![16, 17, 18, 19, 20],
        vec![21, 22, 23, 24, 25],
    ]
}

fn recording_registry(seen: &Arc<Mutex<Vec<usize>>>) -> anyhow::Result<SystemRegistry> {
    let mut registry = SystemRegistry::new();
    let log = Arc::clone(seen);
    registry.register(
        SystemMeta::new("probe", "1.0.0", "records the history it is shown"),
        move || {
            Box::new(RecordingSystem::with_log(
                "probe",
                vec![1, 2, 3, 4, 5],
                Arc::clone(&log),
            ))
        },
    )?;
    Ok(registry)
}

#[tokio::test]
async fn full_run_shows_each_target_only_its_past() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let desk = DeskHarness::new(
        DeskConfig::default(),
        recording_registry(&seen)?,
        daily_draws(five_draws()),
    )
    .await?;

    desk.backfill.run("probe", None).await?;

    let mut lens = seen.lock().unwrap().clone();
    lens.sort_unstable();
    assert_eq!(lens, vec![0, 1, 2, 3, 4]);

    Ok(())
}

#[tokio::test]
async fn limited_run_still_sees_the_full_past() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let desk = DeskHarness::new(
        DeskConfig::default(),
        recording_registry(&seen)?,
        daily_draws(five_draws()),
    )
    .await?;

    // Only the last two draws are targets, but their history still starts
    // at the beginning.
    desk.backfill.run("probe", Some(2)).await?;

    let mut lens = seen.lock().unwrap().clone();
    lens.sort_unstable();
    assert_eq!(lens, vec![3, 4]);

    Ok(())
}
