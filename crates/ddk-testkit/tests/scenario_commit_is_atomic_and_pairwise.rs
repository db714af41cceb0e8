//! Scenario: commit empties staging, never duplicates production keys, and
//! carries a declared complement along with its base system.

use ddk_config::DeskConfig;
use ddk_registry::{SystemMeta, SystemRegistry};
use ddk_store::PerformanceStore;
use ddk_testkit::{daily_draws, ConstantSystem, DeskHarness};

fn three_draws() -> Vec<Vec<u8>> {
    vec![
        vec![1, 2, 3, 4, 5],
        vec![6, 7, 8, 9, 10],
        vec![11, 12, 13, 14, 15],
    ]
}

#[tokio::test]
async fn commit_moves_staging_and_a_recommit_cycle_adds_nothing() -> anyhow::Result<()> {
    let mut registry = SystemRegistry::new();
    registry.register(
        SystemMeta::new("steady", "1.0.0", "constant shortlist"),
        || Box::new(ConstantSystem::new("steady", vec![1, 2, 3, 4, 5])),
    )?;

    let desk = DeskHarness::new(DeskConfig::default(), registry, daily_draws(three_draws())).await?;

    desk.backfill.run("steady", None).await?;
    let stats = desk.promotion.commit("steady").await?;
    assert_eq!(stats.promoted, 3);

    assert_eq!(desk.store.staging_count("steady").await, 0);
    let production = desk.store.production_for("steady").await?;
    assert_eq!(production.len(), 3);

    // Same backfill again, committed again: upserts on the same keys, so
    // production cannot grow or duplicate.
    desk.backfill.run("steady", None).await?;
    desk.promotion.commit("steady").await?;

    let production = desk.store.production_for("steady").await?;
    assert_eq!(production.len(), 3);
    let mut ids: Vec<i64> = production.iter().map(|r| r.draw_id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids, vec![1, 2, 3]);

    let rows = desk.ranking.ranking().await?;
    assert_eq!(rows[0].total_predictions, 3);

    Ok(())
}

#[tokio::test]
async fn committing_either_member_promotes_the_whole_pair() -> anyhow::Result<()> {
    let mut registry = SystemRegistry::new();
    registry.register(
        SystemMeta::new("base", "1.0.0", "most frequent"),
        || Box::new(ConstantSystem::new("base", vec![1, 2, 3, 4, 5])),
    )?;
    registry.register(
        SystemMeta::new("mirror", "1.0.0", "least frequent").complement_of("base"),
        || Box::new(ConstantSystem::new("mirror", vec![6, 7, 8, 9, 10])),
    )?;

    let desk = DeskHarness::new(DeskConfig::default(), registry, daily_draws(three_draws())).await?;

    desk.backfill.run("base", None).await?;
    desk.backfill.run("mirror", None).await?;

    // Committing the complement carries the base as well.
    desk.promotion.commit("mirror").await?;

    assert_eq!(desk.store.staging_count("base").await, 0);
    assert_eq!(desk.store.staging_count("mirror").await, 0);
    assert_eq!(desk.store.production_for("base").await?.len(), 3);
    assert_eq!(desk.store.production_for("mirror").await?.len(), 3);

    let mut ranked: Vec<String> = desk
        .ranking
        .ranking()
        .await?
        .into_iter()
        .map(|r| r.system_name)
        .collect();
    ranked.sort();
    assert_eq!(ranked, vec!["base".to_string(), "mirror".to_string()]);

    Ok(())
}

#[tokio::test]
async fn discard_drops_the_pair_without_touching_production() -> anyhow::Result<()> {
    let mut registry = SystemRegistry::new();
    registry.register(
        SystemMeta::new("base", "1.0.0", "most frequent"),
        || Box::new(ConstantSystem::new("base", vec![1, 2, 3, 4, 5])),
    )?;
    registry.register(
        SystemMeta::new("mirror", "1.0.0", "least frequent").complement_of("base"),
        || Box::new(ConstantSystem::new("mirror", vec![6, 7, 8, 9, 10])),
    )?;

    let desk = DeskHarness::new(DeskConfig::default(), registry, daily_draws(three_draws())).await?;

    desk.backfill.run("base", None).await?;
    desk.backfill.run("mirror", None).await?;
    let cleared = desk.promotion.discard("base").await?;
    assert_eq!(cleared, 6);

    assert_eq!(desk.store.staging_count("base").await, 0);
    assert_eq!(desk.store.staging_count("mirror").await, 0);
    assert!(desk.store.production_for("base").await?.is_empty());
    assert!(desk.store.production_for("mirror").await?.is_empty());
    assert!(desk.ranking.ranking().await?.is_empty());

    Ok(())
}
