//! Builder orchestration.
//!
//! A PUT is staged: validate, load the active snapshot, plan every local
//! write and provider operation, run the provider operations while recording
//! their inverses, then commit all local writes in one transaction. When the
//! provider sync or the commit fails, the recorded inverses are replayed so
//! provider state matches the (unchanged) local state again.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::compensation::CompensationLog;
use super::config::BuilderConfig;
use super::error::BuilderError;
use super::model::{BuilderScope, BuilderSnapshot, PeriodRow, TierRow};
use super::payload::{BuilderInput, RawBuilderPayload};
use super::pricing::{plan_pricing, requires_provider, sync_pricing_for_periods, CellAction, SyncStats};
use super::store::{BuilderStore, LocalWrites};
use super::upsert::{upsert_periods, upsert_tiers, Staged};
use super::view::BuilderView;
use crate::payments::{PaymentProvider, ProviderAccount};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl<R> From<&Staged<R>> for RowCounts {
    fn from(staged: &Staged<R>) -> Self {
        Self {
            created: staged.created.len(),
            updated: staged.changed,
            unchanged: staged.updated.len() - staged.changed,
            deleted: staged.deleted.len(),
        }
    }
}

/// Outcome of a dry run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReport {
    pub tiers: RowCounts,
    pub periods: RowCounts,
    pub cells: Vec<CellAction>,
    pub requires_provider: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PutSummary {
    pub tiers: RowCounts,
    pub periods: RowCounts,
    pub pricing: SyncStats,
}

struct BuilderPlan {
    tiers: Staged<TierRow>,
    periods: Staged<PeriodRow>,
    cells: Vec<CellAction>,
}

fn stage(input: &BuilderInput, snapshot: &BuilderSnapshot, scope: &BuilderScope) -> Result<BuilderPlan, BuilderError> {
    let tiers = upsert_tiers(&input.tiers, &snapshot.tiers, scope)?;
    let periods = upsert_periods(&input.periods, &snapshot.periods, scope)?;
    let cells = plan_pricing(&input.periods, &tiers, &periods, snapshot)?;
    Ok(BuilderPlan { tiers, periods, cells })
}

async fn load_snapshot(store: &dyn BuilderStore, scope: &BuilderScope) -> Result<BuilderSnapshot, BuilderError> {
    store
        .load_snapshot(scope)
        .await
        .map_err(BuilderError::Store)?
        .ok_or_else(|| BuilderError::NotFound {
            event_id: scope.event_id.clone(),
        })
}

/// Validate and plan `payload` against the stored state. Nothing is written
/// and the payment provider is not contacted.
#[instrument(skip(store, payload), fields(event_id = %scope.event_id, instance_id = ?scope.instance_id))]
pub async fn plan_builder(
    store: &dyn BuilderStore,
    scope: &BuilderScope,
    payload: &RawBuilderPayload,
) -> Result<PlanReport, BuilderError> {
    let input = payload.validate()?;
    let snapshot = load_snapshot(store, scope).await?;
    let plan = stage(&input, &snapshot, scope)?;
    Ok(PlanReport {
        tiers: RowCounts::from(&plan.tiers),
        periods: RowCounts::from(&plan.periods),
        requires_provider: requires_provider(&plan.cells),
        cells: plan.cells,
    })
}

#[derive(Clone)]
pub struct BuilderEngine {
    store: Arc<dyn BuilderStore>,
    provider: Arc<dyn PaymentProvider>,
    config: BuilderConfig,
}

impl BuilderEngine {
    pub fn new(store: Arc<dyn BuilderStore>, provider: Arc<dyn PaymentProvider>, config: BuilderConfig) -> Self {
        Self { store, provider, config }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    async fn snapshot(&self, scope: &BuilderScope) -> Result<BuilderSnapshot, BuilderError> {
        load_snapshot(self.store.as_ref(), scope).await
    }

    #[instrument(skip(self), fields(event_id = %scope.event_id, instance_id = ?scope.instance_id))]
    pub async fn get(&self, scope: &BuilderScope) -> Result<BuilderView, BuilderError> {
        let snapshot = self.snapshot(scope).await?;
        Ok(BuilderView::from_snapshot(&snapshot))
    }

    pub async fn plan(&self, scope: &BuilderScope, payload: &RawBuilderPayload) -> Result<PlanReport, BuilderError> {
        plan_builder(self.store.as_ref(), scope, payload).await
    }

    #[instrument(skip(self, payload), fields(event_id = %scope.event_id, instance_id = ?scope.instance_id))]
    pub async fn put(&self, scope: &BuilderScope, payload: &RawBuilderPayload) -> Result<PutSummary, BuilderError> {
        let input = payload.validate()?;
        let snapshot = self.snapshot(scope).await?;
        let plan = stage(&input, &snapshot, scope)?;

        let account = if requires_provider(&plan.cells) {
            let id = snapshot
                .provider_account
                .clone()
                .ok_or_else(|| BuilderError::NoProviderAccount {
                    event_id: scope.event_id.clone(),
                })?;
            ProviderAccount(id)
        } else {
            // Nothing will be sent to the provider.
            ProviderAccount(snapshot.provider_account.clone().unwrap_or_default())
        };

        let mut log = CompensationLog::default();
        let synced = sync_pricing_for_periods(
            self.provider.as_ref(),
            &account,
            &self.config.currency,
            &plan.cells,
            &mut log,
        )
        .await;
        let (pricing, stats) = match synced {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, operation = e.operation(), "provider sync failed");
                log.unwind(self.provider.as_ref(), &account).await;
                return Err(e.into());
            }
        };

        let summary = PutSummary {
            tiers: RowCounts::from(&plan.tiers),
            periods: RowCounts::from(&plan.periods),
            pricing: stats,
        };
        let writes = LocalWrites {
            tiers_created: plan.tiers.created,
            tiers_updated: plan.tiers.updated,
            tiers_deleted: plan.tiers.deleted,
            periods_created: plan.periods.created,
            periods_updated: plan.periods.updated,
            periods_deleted: plan.periods.deleted,
            pricing_deleted: pricing.deleted,
            pricing_created: pricing.created,
            pricing_updated: pricing.updated,
        };

        let timeout = self.config.tx_timeout;
        let committed = tokio::time::timeout(timeout, self.store.commit(scope, &writes, timeout)).await;
        let failure = match committed {
            Ok(Ok(())) => {
                info!(
                    statements = writes.statement_count(),
                    provider_calls = stats.provider_calls,
                    "builder saved"
                );
                return Ok(summary);
            }
            Ok(Err(e)) => {
                error!(error = %format!("{e:#}"), "local commit failed");
                BuilderError::Store(e)
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs_f64(), "local commit timed out");
                BuilderError::Timeout(timeout)
            }
        };
        log.unwind(self.provider.as_ref(), &account).await;
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::testing::{MemoryStore, RecordingProvider};
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Harness {
        store: Arc<MemoryStore>,
        provider: Arc<RecordingProvider>,
        engine: BuilderEngine,
        scope: BuilderScope,
    }

    fn harness_with(account: Option<&str>, config: BuilderConfig) -> Harness {
        let store = Arc::new(MemoryStore::with_event("evt_1", account));
        let provider = Arc::new(RecordingProvider::default());
        let engine = BuilderEngine::new(store.clone(), provider.clone(), config);
        Harness {
            store,
            provider,
            engine,
            scope: BuilderScope::new("evt_1", Some("inst_1".into())),
        }
    }

    fn harness() -> Harness {
        harness_with(Some("acct_1"), BuilderConfig::default())
    }

    fn payload(v: Value) -> RawBuilderPayload {
        serde_json::from_value(v).unwrap()
    }

    fn early_bird(prices: Value) -> Value {
        json!({
            "name": "Early Bird",
            "startTime": "2026-03-01T09:00:00Z",
            "endTime": "2026-04-01T09:00:00Z",
            "startTimeTz": "America/Chicago",
            "endTimeTz": "America/Chicago",
            "prices": prices
        })
    }

    fn scenario() -> RawBuilderPayload {
        payload(json!({
            "tiers": [{"name": "General"}],
            "periods": [early_bird(json!([{"tierId": 0, "price": "25.00", "isAvailable": true}]))]
        }))
    }

    impl Harness {
        /// Current state in PUT-body form, ready to be edited and resubmitted.
        async fn current(&self) -> Value {
            serde_json::to_value(self.engine.get(&self.scope).await.unwrap()).unwrap()
        }
    }

    #[tokio::test]
    async fn first_save_creates_tier_period_and_priced_cell() {
        let h = harness();
        let summary = h.engine.put(&h.scope, &scenario()).await.unwrap();
        assert_eq!(summary.tiers.created, 1);
        assert_eq!(summary.periods.created, 1);
        assert_eq!(summary.pricing.created, 1);
        assert_eq!(summary.pricing.provider_calls, 2);

        let cells = h.store.active_pricing();
        assert_eq!(cells.len(), 1);
        let cell = &cells[0];
        assert_eq!(cell.price.to_string(), "25.00");
        assert!(cell.available);

        let product_id = cell.provider_product_id.as_deref().unwrap();
        let price = h.provider.price(cell.provider_price_id.as_deref().unwrap()).unwrap();
        assert_eq!(price.amount_minor, 2500);
        assert_eq!(price.currency, "usd");
        assert_eq!(price.product_id, product_id);
        assert_eq!(h.provider.product(product_id).unwrap().name, "General: Early Bird");

        let view = h.current().await;
        assert_eq!(view["tiers"][0]["name"], "General");
        assert_eq!(view["periods"][0]["prices"][0]["tierId"], view["tiers"][0]["id"]);
    }

    #[tokio::test]
    async fn resubmitting_saved_state_makes_no_provider_calls() {
        let h = harness();
        h.engine.put(&h.scope, &scenario()).await.unwrap();
        let before = h.store.active_pricing();
        h.provider.clear_calls();

        let summary = h.engine.put(&h.scope, &payload(h.current().await)).await.unwrap();
        assert!(h.provider.calls().is_empty());
        assert_eq!(summary.pricing.unchanged, 1);
        assert_eq!(summary.tiers.unchanged, 1);
        assert_eq!(summary.periods.unchanged, 1);
        assert_eq!(h.store.active_pricing(), before);
    }

    #[tokio::test]
    async fn cell_without_id_reuses_the_active_cell_of_its_pair() {
        let h = harness();
        h.engine.put(&h.scope, &scenario()).await.unwrap();
        let mut body = h.current().await;
        body["periods"][0]["prices"][0]
            .as_object_mut()
            .unwrap()
            .remove("id");
        h.provider.clear_calls();

        h.engine.put(&h.scope, &payload(body)).await.unwrap();
        assert!(h.provider.calls().is_empty());
        assert_eq!(h.store.active_pricing().len(), 1);
        assert!(h.store.deleted_pricing().is_empty());
    }

    #[tokio::test]
    async fn amount_change_replaces_the_provider_price() {
        let h = harness();
        h.engine.put(&h.scope, &scenario()).await.unwrap();
        let old = h.store.active_pricing().remove(0);
        let old_price_id = old.provider_price_id.clone().unwrap();

        let mut body = h.current().await;
        body["periods"][0]["prices"][0]["price"] = json!("30.00");
        h.provider.clear_calls();
        let summary = h.engine.put(&h.scope, &payload(body)).await.unwrap();
        assert_eq!(summary.pricing.repriced, 1);

        let new = h.store.active_pricing().remove(0);
        assert_eq!(new.id, old.id);
        assert_eq!(new.provider_product_id, old.provider_product_id);
        let new_price_id = new.provider_price_id.unwrap();
        assert_ne!(new_price_id, old_price_id);

        assert!(!h.provider.price(&old_price_id).unwrap().active);
        let minted = h.provider.price(&new_price_id).unwrap();
        assert!(minted.active);
        assert_eq!(minted.amount_minor, 3000);
        assert_eq!(h.provider.active_prices(), 1);

        let calls = h.provider.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("set_price_active"));
        assert!(calls[1].starts_with("create_price"));
    }

    #[tokio::test]
    async fn availability_toggle_and_rename_skip_price_minting() {
        let h = harness();
        h.engine.put(&h.scope, &scenario()).await.unwrap();
        let mut body = h.current().await;
        body["periods"][0]["prices"][0]["isAvailable"] = json!(false);
        body["tiers"][0]["name"] = json!("Standard");
        h.provider.clear_calls();

        let summary = h.engine.put(&h.scope, &payload(body)).await.unwrap();
        assert_eq!(summary.pricing.toggled, 1);
        assert_eq!(summary.pricing.renamed, 1);
        assert_eq!(summary.pricing.repriced, 0);

        let cell = h.store.active_pricing().remove(0);
        assert!(!cell.available);
        let product = h.provider.product(cell.provider_product_id.as_deref().unwrap()).unwrap();
        assert_eq!(product.name, "Standard: Early Bird");
        assert_eq!(h.provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn removing_a_tier_deletes_it_and_its_cells_only() {
        let h = harness();
        let two_tiers = payload(json!({
            "tiers": [{"name": "General"}, {"name": "VIP"}],
            "periods": [early_bird(json!([
                {"tierId": 0, "price": "25.00", "isAvailable": true},
                {"tierId": 1, "price": "80.00", "isAvailable": true}
            ]))]
        }));
        h.engine.put(&h.scope, &two_tiers).await.unwrap();

        let mut body = h.current().await;
        let vip_id = body["tiers"][1]["id"].as_str().unwrap().to_string();
        let vip_cell = h
            .store
            .active_pricing()
            .into_iter()
            .find(|c| c.tier_id == vip_id)
            .unwrap();
        body["tiers"].as_array_mut().unwrap().remove(1);
        body["periods"][0]["prices"].as_array_mut().unwrap().remove(1);

        let summary = h.engine.put(&h.scope, &payload(body)).await.unwrap();
        assert_eq!(summary.tiers.deleted, 1);
        assert_eq!(summary.pricing.removed, 1);
        assert_eq!(h.store.deleted_tier_ids(), vec![vip_id]);
        assert_eq!(h.store.deleted_pricing(), vec![vip_cell.clone()]);
        assert!(!h.provider.product(vip_cell.provider_product_id.as_deref().unwrap()).unwrap().active);
        assert_eq!(h.provider.active_products(), 1);

        let view = h.current().await;
        assert_eq!(view["tiers"].as_array().unwrap().len(), 1);
        assert_eq!(view["tiers"][0]["name"], "General");
    }

    #[tokio::test]
    async fn removing_a_period_deactivates_all_its_products() {
        let h = harness();
        h.engine.put(&h.scope, &scenario()).await.unwrap();
        let mut body = h.current().await;
        body["periods"] = json!([]);

        let summary = h.engine.put(&h.scope, &payload(body)).await.unwrap();
        assert_eq!(summary.periods.deleted, 1);
        assert_eq!(h.store.deleted_period_ids().len(), 1);
        assert!(h.store.active_pricing().is_empty());
        assert_eq!(h.provider.active_products(), 0);
    }

    #[tokio::test]
    async fn tier_order_follows_the_latest_payload() {
        let h = harness();
        let three = payload(json!({
            "tiers": [{"name": "General"}, {"name": "VIP"}, {"name": "Student"}],
            "periods": []
        }));
        h.engine.put(&h.scope, &three).await.unwrap();

        let mut body = h.current().await;
        body["tiers"].as_array_mut().unwrap().reverse();
        h.engine.put(&h.scope, &payload(body)).await.unwrap();

        let view = h.current().await;
        let names: Vec<&str> = view["tiers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Student", "VIP", "General"]);
        let orders: Vec<i64> = view["tiers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["order"].as_i64().unwrap())
            .collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failed_commit_unwinds_every_provider_mutation() {
        let h = harness();
        h.engine.put(&h.scope, &scenario()).await.unwrap();
        let old = h.store.active_pricing().remove(0);
        let old_price_id = old.provider_price_id.clone().unwrap();
        let product_id = old.provider_product_id.clone().unwrap();

        let mut body = h.current().await;
        body["tiers"][0]["name"] = json!("Standard");
        body["periods"][0]["prices"][0]["price"] = json!("30.00");
        h.store.fail_next_commit();

        let err = h.engine.put(&h.scope, &payload(body)).await.unwrap_err();
        assert!(matches!(err, BuilderError::Store(_)));

        // Old price is live again, the minted one is retired, the name is restored.
        assert!(h.provider.price(&old_price_id).unwrap().active);
        assert_eq!(h.provider.active_prices(), 1);
        assert_eq!(h.provider.product(&product_id).unwrap().name, "General: Early Bird");
        assert_eq!(h.store.active_pricing(), vec![old]);
        assert_eq!(h.store.commits(), 1);
    }

    #[tokio::test]
    async fn failed_first_commit_leaves_no_live_provider_objects() {
        let h = harness();
        h.store.fail_next_commit();
        h.engine.put(&h.scope, &scenario()).await.unwrap_err();
        assert_eq!(h.provider.active_products(), 0);
        assert_eq!(h.provider.active_prices(), 0);
        assert!(h.store.active_pricing().is_empty());
        assert_eq!(h.store.commits(), 0);
    }

    #[tokio::test]
    async fn provider_failure_mid_sync_unwinds_and_skips_commit() {
        let h = harness();
        let two_cells = payload(json!({
            "tiers": [{"name": "General"}, {"name": "VIP"}],
            "periods": [early_bird(json!([
                {"tierId": 0, "price": "25.00"},
                {"tierId": 1, "price": "80.00"}
            ]))]
        }));
        // Product and price of the first cell succeed; the second product fails.
        h.provider.fail_after(2);

        let err = h.engine.put(&h.scope, &two_cells).await.unwrap_err();
        assert!(matches!(err, BuilderError::Provider(_)));
        assert_eq!(h.provider.active_products(), 0);
        assert_eq!(h.provider.active_prices(), 0);
        assert_eq!(h.store.commits(), 0);
        assert!(h.current().await["tiers"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_timeout_unwinds() {
        let config = BuilderConfig {
            tx_timeout: Duration::from_millis(20),
            ..BuilderConfig::default()
        };
        let h = harness_with(Some("acct_1"), config);
        h.store.delay_commits(Duration::from_millis(500));

        let err = h.engine.put(&h.scope, &scenario()).await.unwrap_err();
        assert!(matches!(err, BuilderError::Timeout(_)));
        assert_eq!(h.provider.active_prices(), 0);
        assert_eq!(h.store.commits(), 0);
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_before_any_side_effect() {
        let h = harness();
        let bad = payload(json!({
            "tiers": [{"id": "t_missing", "name": "General"}],
            "periods": [early_bird(json!([{"tierId": "t_missing", "price": "25.001"}]))]
        }));
        let err = h.engine.put(&h.scope, &bad).await.unwrap_err();
        match err {
            BuilderError::Validation(errors) => {
                assert!(errors.iter().any(|e| e.field == "periods[0].prices[0].price"))
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let unknown = payload(json!({"tiers": [{"id": "t_missing", "name": "General"}]}));
        let err = h.engine.put(&h.scope, &unknown).await.unwrap_err();
        assert!(matches!(err, BuilderError::Validation(_)));
        assert!(h.provider.calls().is_empty());
        assert_eq!(h.store.commits(), 0);
    }

    #[tokio::test]
    async fn out_of_range_amounts_and_double_priced_tiers_never_reach_the_provider() {
        let h = harness();
        let bad = payload(json!({
            "tiers": [{"name": "General"}],
            "periods": [early_bird(json!([
                {"tierId": 0, "price": "10000000000.00"},
                {"tierId": 0, "price": "25.00"}
            ]))]
        }));
        match h.engine.put(&h.scope, &bad).await.unwrap_err() {
            BuilderError::Validation(errors) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["periods[0].prices[0].price", "periods[0].prices[1].tierId"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        h.engine.put(&h.scope, &scenario()).await.unwrap();
        h.provider.clear_calls();
        let mut body = h.current().await;
        body["periods"][0]["prices"][0]["id"] = json!("pp_unknown");
        match h.engine.put(&h.scope, &payload(body)).await.unwrap_err() {
            BuilderError::Validation(errors) => {
                assert_eq!(errors[0].field, "periods[0].prices[0].id");
                assert_eq!(errors[0].message, "unknown price id");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(h.provider.calls().is_empty());
        assert_eq!(h.store.commits(), 1);
    }

    #[tokio::test]
    async fn unknown_event_and_missing_account() {
        let h = harness_with(None, BuilderConfig::default());
        let other = BuilderScope::new("evt_404", None);
        assert!(matches!(
            h.engine.put(&other, &scenario()).await.unwrap_err(),
            BuilderError::NotFound { .. }
        ));
        assert!(matches!(
            h.engine.put(&h.scope, &scenario()).await.unwrap_err(),
            BuilderError::NoProviderAccount { .. }
        ));

        // Without price cells no provider account is needed.
        let tiers_only = payload(json!({"tiers": [{"name": "General"}]}));
        h.engine.put(&h.scope, &tiers_only).await.unwrap();
        assert_eq!(h.store.commits(), 1);
    }

    #[tokio::test]
    async fn plan_is_a_dry_run() {
        let h = harness();
        let report = h.engine.plan(&h.scope, &scenario()).await.unwrap();
        assert!(report.requires_provider);
        assert_eq!(report.tiers.created, 1);
        assert!(matches!(report.cells.as_slice(), [CellAction::Create(c)] if c.amount_minor == 2500));
        assert!(h.provider.calls().is_empty());
        assert_eq!(h.store.commits(), 0);
    }
}
