//! Postgres-backed store.
//!
//! Promotion runs as one SQL transaction: the staged-row move, the staging
//! clear, and the ranking recompute either all commit or all roll back.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use ddk_schemas::{
    CachedPrediction, Draw, ExclusionEntry, PerformanceRecord, PredictionKind, SystemRanking,
};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::{HistoryPoint, PerformanceStore, PromotionStats, Result};

pub const ENV_DB_URL: &str = "DDK_DATABASE_URL";

/// Postgres `PerformanceStore`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using DDK_DATABASE_URL.
    pub async fn connect_from_env() -> Result<Self> {
        let url =
            std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&url)
            .await
            .context("failed to connect to Postgres")?;
        Ok(Self::new(pool))
    }

    /// Run embedded SQLx migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("db migrate failed")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn values_to_json(values: &[u8]) -> Value {
    Value::Array(values.iter().map(|&v| Value::from(v)).collect())
}

fn json_to_values(v: Value) -> Result<Vec<u8>> {
    let arr = v
        .as_array()
        .ok_or_else(|| anyhow!("expected json array of values"))?;
    arr.iter()
        .map(|x| {
            x.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| anyhow!("value out of u8 range: {x}"))
        })
        .collect()
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<PerformanceRecord> {
    let hit_count: Option<i32> = row.try_get("hit_count")?;
    Ok(PerformanceRecord {
        draw_id: row.try_get("draw_id")?,
        system_name: row.try_get("system_name")?,
        predicted_values: json_to_values(row.try_get::<Value, _>("predicted_values")?)?,
        actual_values: json_to_values(row.try_get::<Value, _>("actual_values")?)?,
        hit_count: hit_count.map(|n| n as u32),
        accuracy: row.try_get("accuracy")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

/// Upsert the ranking row for one system from post-move production, inside
/// the given transaction. `avg`/`count` run over scored rows only (SQL
/// aggregates skip NULL accuracy).
async fn recompute_ranking_tx(
    tx: &mut Transaction<'_, Postgres>,
    system: &str,
) -> Result<SystemRanking> {
    let row = sqlx::query(
        r#"
        insert into system_rankings (system_name, avg_accuracy, total_predictions, last_updated)
        select $1, coalesce(avg(accuracy), 0), count(accuracy), now()
        from production_performance
        where system_name = $1
        on conflict (system_name) do update
          set avg_accuracy = excluded.avg_accuracy,
              total_predictions = excluded.total_predictions,
              last_updated = excluded.last_updated
        returning system_name, avg_accuracy, total_predictions, last_updated
        "#,
    )
    .bind(system)
    .fetch_one(&mut **tx)
    .await
    .context("ranking recompute failed")?;

    Ok(SystemRanking {
        system_name: row.try_get("system_name")?,
        avg_accuracy: row.try_get("avg_accuracy")?,
        total_predictions: row.try_get("total_predictions")?,
        last_updated: row.try_get("last_updated")?,
    })
}

#[async_trait::async_trait]
impl PerformanceStore for PgStore {
    async fn all_draws(&self) -> Result<Vec<Draw>> {
        let rows = sqlx::query(
            "select id, draw_date, primary_set, secondary_set from draws order by id",
        )
        .fetch_all(&self.pool)
        .await
        .context("all_draws failed")?;

        rows.iter()
            .map(|row| {
                Ok(Draw {
                    id: row.try_get("id")?,
                    date: row.try_get("draw_date")?,
                    primary_set: json_to_values(row.try_get::<Value, _>("primary_set")?)?,
                    secondary_set: json_to_values(row.try_get::<Value, _>("secondary_set")?)?,
                })
            })
            .collect()
    }

    async fn latest_draw_id(&self) -> Result<Option<i64>> {
        let row = sqlx::query("select max(id) as max_id from draws")
            .fetch_one(&self.pool)
            .await
            .context("latest_draw_id failed")?;
        Ok(row.try_get("max_id")?)
    }

    async fn append_draw(&self, draw: &Draw) -> Result<()> {
        sqlx::query(
            r#"
            insert into draws (id, draw_date, primary_set, secondary_set)
            values ($1, $2, $3, $4)
            "#,
        )
        .bind(draw.id)
        .bind(draw.date)
        .bind(values_to_json(&draw.primary_set))
        .bind(values_to_json(&draw.secondary_set))
        .execute(&self.pool)
        .await
        .context("append_draw failed")?;
        Ok(())
    }

    async fn upsert_staging(&self, rec: &PerformanceRecord) -> Result<()> {
        sqlx::query(
            r#"
            insert into staging_performance (
              draw_id, system_name, predicted_values, actual_values, hit_count, accuracy, created_at
            ) values ($1, $2, $3, $4, $5, $6, $7)
            on conflict (draw_id, system_name) do update
              set predicted_values = excluded.predicted_values,
                  actual_values = excluded.actual_values,
                  hit_count = excluded.hit_count,
                  accuracy = excluded.accuracy,
                  created_at = excluded.created_at
            "#,
        )
        .bind(rec.draw_id)
        .bind(&rec.system_name)
        .bind(values_to_json(&rec.predicted_values))
        .bind(values_to_json(&rec.actual_values))
        .bind(rec.hit_count.map(|n| n as i32))
        .bind(rec.accuracy)
        .bind(rec.created_at)
        .execute(&self.pool)
        .await
        .context("upsert_staging failed")?;
        Ok(())
    }

    async fn staging_for(&self, system: &str) -> Result<Vec<PerformanceRecord>> {
        let rows = sqlx::query(
            r#"
            select draw_id, system_name, predicted_values, actual_values, hit_count, accuracy, created_at
            from staging_performance
            where system_name = $1
            order by draw_id
            "#,
        )
        .bind(system)
        .fetch_all(&self.pool)
        .await
        .context("staging_for failed")?;

        rows.iter().map(record_from_row).collect()
    }

    async fn clear_staging(&self, system: &str) -> Result<u64> {
        let res = sqlx::query("delete from staging_performance where system_name = $1")
            .bind(system)
            .execute(&self.pool)
            .await
            .context("clear_staging failed")?;
        Ok(res.rows_affected())
    }

    async fn production_for(&self, system: &str) -> Result<Vec<PerformanceRecord>> {
        let rows = sqlx::query(
            r#"
            select draw_id, system_name, predicted_values, actual_values, hit_count, accuracy, created_at
            from production_performance
            where system_name = $1
            order by draw_id
            "#,
        )
        .bind(system)
        .fetch_all(&self.pool)
        .await
        .context("production_for failed")?;

        rows.iter().map(record_from_row).collect()
    }

    async fn history_for(&self, system: &str, limit: usize) -> Result<Vec<HistoryPoint>> {
        let rows = sqlx::query(
            r#"
            select p.draw_id, p.accuracy, d.draw_date
            from production_performance p
            join draws d on d.id = p.draw_id
            where p.system_name = $1
            order by p.draw_id desc
            limit $2
            "#,
        )
        .bind(system)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("history_for failed")?;

        rows.iter()
            .map(|row| {
                Ok(HistoryPoint {
                    draw_id: row.try_get("draw_id")?,
                    accuracy: row.try_get("accuracy")?,
                    date: row.try_get("draw_date")?,
                })
            })
            .collect()
    }

    async fn promote(&self, systems: &[String]) -> Result<PromotionStats> {
        let mut tx = self.pool.begin().await.context("promotion begin failed")?;
        let mut stats = PromotionStats::default();

        for system in systems {
            let moved = sqlx::query(
                r#"
                insert into production_performance (
                  draw_id, system_name, predicted_values, actual_values, hit_count, accuracy, created_at
                )
                select draw_id, system_name, predicted_values, actual_values, hit_count, accuracy, created_at
                from staging_performance
                where system_name = $1
                on conflict (draw_id, system_name) do update
                  set predicted_values = excluded.predicted_values,
                      actual_values = excluded.actual_values,
                      hit_count = excluded.hit_count,
                      accuracy = excluded.accuracy,
                      created_at = excluded.created_at
                "#,
            )
            .bind(system)
            .execute(&mut *tx)
            .await
            .context("promotion move failed")?;
            stats.promoted += moved.rows_affected();

            let cleared = sqlx::query("delete from staging_performance where system_name = $1")
                .bind(system)
                .execute(&mut *tx)
                .await
                .context("promotion staging clear failed")?;
            stats.cleared += cleared.rows_affected();

            recompute_ranking_tx(&mut tx, system).await?;
        }

        tx.commit().await.context("promotion commit failed")?;
        Ok(stats)
    }

    async fn recompute_ranking(&self, system: &str) -> Result<SystemRanking> {
        let mut tx = self.pool.begin().await?;
        let row = recompute_ranking_tx(&mut tx, system).await?;
        tx.commit().await.context("ranking commit failed")?;
        Ok(row)
    }

    async fn ranking(&self) -> Result<Vec<SystemRanking>> {
        let rows = sqlx::query(
            r#"
            select system_name, avg_accuracy, total_predictions, last_updated
            from system_rankings
            order by avg_accuracy desc, system_name asc
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("ranking failed")?;

        rows.iter()
            .map(|row| {
                Ok(SystemRanking {
                    system_name: row.try_get("system_name")?,
                    avg_accuracy: row.try_get("avg_accuracy")?,
                    total_predictions: row.try_get("total_predictions")?,
                    last_updated: row.try_get("last_updated")?,
                })
            })
            .collect()
    }

    async fn ranking_for(&self, system: &str) -> Result<Option<SystemRanking>> {
        let row = sqlx::query(
            r#"
            select system_name, avg_accuracy, total_predictions, last_updated
            from system_rankings
            where system_name = $1
            "#,
        )
        .bind(system)
        .fetch_optional(&self.pool)
        .await
        .context("ranking_for failed")?;

        row.map(|row| {
            Ok(SystemRanking {
                system_name: row.try_get("system_name")?,
                avg_accuracy: row.try_get("avg_accuracy")?,
                total_predictions: row.try_get("total_predictions")?,
                last_updated: row.try_get("last_updated")?,
            })
        })
        .transpose()
    }

    async fn cached_prediction(&self, system: &str) -> Result<Option<CachedPrediction>> {
        let row = sqlx::query(
            r#"
            select system_name, primary_shortlist, complement_shortlist, updated_at
            from cached_predictions
            where system_name = $1
            "#,
        )
        .bind(system)
        .fetch_optional(&self.pool)
        .await
        .context("cached_prediction failed")?;

        row.map(|row| {
            Ok(CachedPrediction {
                system_name: row.try_get("system_name")?,
                primary_shortlist: json_to_values(row.try_get::<Value, _>("primary_shortlist")?)?,
                complement_shortlist: json_to_values(
                    row.try_get::<Value, _>("complement_shortlist")?,
                )?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn put_cached_prediction(&self, row: &CachedPrediction) -> Result<()> {
        sqlx::query(
            r#"
            insert into cached_predictions (system_name, primary_shortlist, complement_shortlist, updated_at)
            values ($1, $2, $3, $4)
            on conflict (system_name) do update
              set primary_shortlist = excluded.primary_shortlist,
                  complement_shortlist = excluded.complement_shortlist,
                  updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.system_name)
        .bind(values_to_json(&row.primary_shortlist))
        .bind(values_to_json(&row.complement_shortlist))
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .context("put_cached_prediction failed")?;
        Ok(())
    }

    async fn invalidate_prediction(&self, system: &str) -> Result<()> {
        sqlx::query("delete from cached_predictions where system_name = $1")
            .bind(system)
            .execute(&self.pool)
            .await
            .context("invalidate_prediction failed")?;
        Ok(())
    }

    async fn invalidate_all_predictions(&self) -> Result<u64> {
        let res = sqlx::query("delete from cached_predictions")
            .execute(&self.pool)
            .await
            .context("invalidate_all_predictions failed")?;
        Ok(res.rows_affected())
    }

    async fn exclusion(&self, kind: PredictionKind) -> Result<Option<ExclusionEntry>> {
        let row = sqlx::query(
            r#"
            select kind, excluded_values, confidence, last_draw_id
            from exclusion_entries
            where kind = $1
            "#,
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("exclusion failed")?;

        row.map(|row| {
            let kind_str: String = row.try_get("kind")?;
            Ok(ExclusionEntry {
                kind: PredictionKind::parse(&kind_str)
                    .ok_or_else(|| anyhow!("invalid prediction kind: {kind_str}"))?,
                excluded_values: json_to_values(row.try_get::<Value, _>("excluded_values")?)?,
                confidence: row.try_get("confidence")?,
                last_draw_id: row.try_get("last_draw_id")?,
            })
        })
        .transpose()
    }

    async fn put_exclusion(&self, entry: &ExclusionEntry) -> Result<()> {
        sqlx::query(
            r#"
            insert into exclusion_entries (kind, excluded_values, confidence, last_draw_id)
            values ($1, $2, $3, $4)
            on conflict (kind) do update
              set excluded_values = excluded.excluded_values,
                  confidence = excluded.confidence,
                  last_draw_id = excluded.last_draw_id
            "#,
        )
        .bind(entry.kind.as_str())
        .bind(values_to_json(&entry.excluded_values))
        .bind(entry.confidence)
        .bind(entry.last_draw_id)
        .execute(&self.pool)
        .await
        .context("put_exclusion failed")?;
        Ok(())
    }
}
