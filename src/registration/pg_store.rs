use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

use super::model::{BuilderScope, BuilderSnapshot, PeriodRow, PricingRow, TierRow};
use super::store::{BuilderStore, LocalWrites};
use crate::util::db::Db;

/// Postgres-backed builder store. Rows are soft-deleted via `deleted = true`.
#[derive(Clone)]
pub struct PgBuilderStore {
    db: Db,
}

impl PgBuilderStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BuilderStore for PgBuilderStore {
    #[instrument(skip(self), fields(event_id = %scope.event_id))]
    async fn load_snapshot(&self, scope: &BuilderScope) -> Result<Option<BuilderSnapshot>> {
        let account: Option<Option<String>> =
            sqlx::query_scalar("SELECT stripe_account_id FROM events WHERE id = $1")
                .bind(&scope.event_id)
                .fetch_optional(&self.db.pool)
                .await
                .context("loading event")?;
        let Some(provider_account) = account else {
            return Ok(None);
        };

        let tiers: Vec<TierRow> = sqlx::query_as(
            r#"SELECT id, event_id, instance_id, name, description, "order"
               FROM registration_tiers
               WHERE event_id = $1 AND instance_id IS NOT DISTINCT FROM $2 AND NOT deleted
               ORDER BY "order", created_at"#,
        )
        .bind(&scope.event_id)
        .bind(&scope.instance_id)
        .fetch_all(&self.db.pool)
        .await
        .context("loading tiers")?;

        let periods: Vec<PeriodRow> = sqlx::query_as(
            "SELECT id, event_id, instance_id, name, start_time, end_time, start_time_tz, end_time_tz
             FROM registration_periods
             WHERE event_id = $1 AND instance_id IS NOT DISTINCT FROM $2 AND NOT deleted
             ORDER BY start_time, created_at",
        )
        .bind(&scope.event_id)
        .bind(&scope.instance_id)
        .fetch_all(&self.db.pool)
        .await
        .context("loading periods")?;

        let pricing: Vec<PricingRow> = sqlx::query_as(
            "SELECT c.id, c.period_id, c.tier_id, c.price, c.available,
                    c.provider_product_id, c.provider_price_id
             FROM registration_period_pricing c
             JOIN registration_periods p ON p.id = c.period_id
             WHERE p.event_id = $1 AND p.instance_id IS NOT DISTINCT FROM $2
               AND NOT c.deleted AND NOT p.deleted
             ORDER BY c.created_at",
        )
        .bind(&scope.event_id)
        .bind(&scope.instance_id)
        .fetch_all(&self.db.pool)
        .await
        .context("loading pricing")?;

        debug!(
            tiers = tiers.len(),
            periods = periods.len(),
            cells = pricing.len(),
            "snapshot loaded"
        );
        Ok(Some(BuilderSnapshot {
            provider_account,
            tiers,
            periods,
            pricing,
        }))
    }

    #[instrument(skip(self, writes), fields(event_id = %scope.event_id, statements = writes.statement_count()))]
    async fn commit(&self, scope: &BuilderScope, writes: &LocalWrites, timeout: Duration) -> Result<()> {
        let mut tx = self.db.pool.begin().await?;
        // SET LOCAL does not take bind parameters.
        let set_timeout = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&set_timeout)).await?;

        for id in &writes.pricing_deleted {
            sqlx::query(
                "UPDATE registration_period_pricing SET deleted = true, updated_at = now() WHERE id = $1",
            )
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("deleting price cell")?;
        }
        for id in &writes.tiers_deleted {
            sqlx::query(
                "UPDATE registration_tiers SET deleted = true, updated_at = now()
                 WHERE id = $1 AND event_id = $2",
            )
            .bind(id)
            .bind(&scope.event_id)
            .execute(&mut *tx)
            .await
            .context("deleting tier")?;
        }
        for id in &writes.periods_deleted {
            sqlx::query(
                "UPDATE registration_periods SET deleted = true, updated_at = now()
                 WHERE id = $1 AND event_id = $2",
            )
            .bind(id)
            .bind(&scope.event_id)
            .execute(&mut *tx)
            .await
            .context("deleting period")?;
        }

        for t in &writes.tiers_created {
            sqlx::query(
                r#"INSERT INTO registration_tiers (id, event_id, instance_id, name, description, "order")
                   VALUES ($1, $2, $3, $4, $5, $6)"#,
            )
            .bind(&t.id)
            .bind(&t.event_id)
            .bind(&t.instance_id)
            .bind(&t.name)
            .bind(&t.description)
            .bind(t.order)
            .execute(&mut *tx)
            .await
            .context("inserting tier")?;
        }
        for t in &writes.tiers_updated {
            sqlx::query(
                r#"UPDATE registration_tiers
                   SET name = $2, description = $3, "order" = $4, updated_at = now()
                   WHERE id = $1 AND event_id = $5"#,
            )
            .bind(&t.id)
            .bind(&t.name)
            .bind(&t.description)
            .bind(t.order)
            .bind(&scope.event_id)
            .execute(&mut *tx)
            .await
            .context("updating tier")?;
        }

        for p in &writes.periods_created {
            sqlx::query(
                "INSERT INTO registration_periods
                   (id, event_id, instance_id, name, start_time, end_time, start_time_tz, end_time_tz)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&p.id)
            .bind(&p.event_id)
            .bind(&p.instance_id)
            .bind(&p.name)
            .bind(p.start_time)
            .bind(p.end_time)
            .bind(&p.start_time_tz)
            .bind(&p.end_time_tz)
            .execute(&mut *tx)
            .await
            .context("inserting period")?;
        }
        for p in &writes.periods_updated {
            sqlx::query(
                "UPDATE registration_periods
                 SET name = $2, start_time = $3, end_time = $4, start_time_tz = $5, end_time_tz = $6,
                     updated_at = now()
                 WHERE id = $1 AND event_id = $7",
            )
            .bind(&p.id)
            .bind(&p.name)
            .bind(p.start_time)
            .bind(p.end_time)
            .bind(&p.start_time_tz)
            .bind(&p.end_time_tz)
            .bind(&scope.event_id)
            .execute(&mut *tx)
            .await
            .context("updating period")?;
        }

        for c in &writes.pricing_created {
            sqlx::query(
                "INSERT INTO registration_period_pricing
                   (id, period_id, tier_id, price, available, provider_product_id, provider_price_id)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(&c.id)
            .bind(&c.period_id)
            .bind(&c.tier_id)
            .bind(&c.price)
            .bind(c.available)
            .bind(&c.provider_product_id)
            .bind(&c.provider_price_id)
            .execute(&mut *tx)
            .await
            .context("inserting price cell")?;
        }
        for c in &writes.pricing_updated {
            sqlx::query(
                "UPDATE registration_period_pricing
                 SET price = $2, available = $3, provider_product_id = $4, provider_price_id = $5,
                     updated_at = now()
                 WHERE id = $1",
            )
            .bind(&c.id)
            .bind(&c.price)
            .bind(c.available)
            .bind(&c.provider_product_id)
            .bind(&c.provider_price_id)
            .execute(&mut *tx)
            .await
            .context("updating price cell")?;
        }

        tx.commit().await?;
        Ok(())
    }
}
