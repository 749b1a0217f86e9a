//! In-memory store and payment provider for engine tests.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use super::model::{BuilderScope, BuilderSnapshot, PeriodRow, PricingRow, TierRow};
use super::store::{BuilderStore, LocalWrites};
use crate::payments::{PaymentProvider, ProviderAccount, ProviderError};

#[derive(Default)]
struct StoreState {
    events: HashMap<String, Option<String>>,
    tiers: Vec<(TierRow, bool)>,
    periods: Vec<(PeriodRow, bool)>,
    pricing: Vec<(PricingRow, bool)>,
    fail_commit: bool,
    commit_delay: Option<Duration>,
    commits: usize,
}

/// Keeps soft-deleted rows around so tests can assert on them.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn with_event(event_id: &str, account: Option<&str>) -> Self {
        let store = Self::default();
        store
            .state
            .lock()
            .unwrap()
            .events
            .insert(event_id.to_string(), account.map(str::to_string));
        store
    }

    pub fn fail_next_commit(&self) {
        self.state.lock().unwrap().fail_commit = true;
    }

    pub fn delay_commits(&self, delay: Duration) {
        self.state.lock().unwrap().commit_delay = Some(delay);
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub fn active_pricing(&self) -> Vec<PricingRow> {
        let state = self.state.lock().unwrap();
        state.pricing.iter().filter(|(_, d)| !d).map(|(r, _)| r.clone()).collect()
    }

    pub fn deleted_pricing(&self) -> Vec<PricingRow> {
        let state = self.state.lock().unwrap();
        state.pricing.iter().filter(|(_, d)| *d).map(|(r, _)| r.clone()).collect()
    }

    pub fn deleted_tier_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.tiers.iter().filter(|(_, d)| *d).map(|(r, _)| r.id.clone()).collect()
    }

    pub fn deleted_period_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.periods.iter().filter(|(_, d)| *d).map(|(r, _)| r.id.clone()).collect()
    }
}

trait RowId {
    fn row_id(&self) -> &str;
}

impl RowId for TierRow {
    fn row_id(&self) -> &str {
        &self.id
    }
}

impl RowId for PeriodRow {
    fn row_id(&self) -> &str {
        &self.id
    }
}

impl RowId for PricingRow {
    fn row_id(&self) -> &str {
        &self.id
    }
}

fn soft_delete<R: RowId>(rows: &mut [(R, bool)], id: &str) {
    for (row, deleted) in rows.iter_mut() {
        if row.row_id() == id {
            *deleted = true;
        }
    }
}

fn replace<R: RowId + Clone>(rows: &mut [(R, bool)], new: &R) -> Result<()> {
    let slot = rows
        .iter_mut()
        .find(|(r, d)| !*d && r.row_id() == new.row_id())
        .ok_or_else(|| anyhow!("no active row {}", new.row_id()))?;
    slot.0 = new.clone();
    Ok(())
}

#[async_trait]
impl BuilderStore for MemoryStore {
    async fn load_snapshot(&self, scope: &BuilderScope) -> Result<Option<BuilderSnapshot>> {
        let state = self.state.lock().unwrap();
        let Some(account) = state.events.get(&scope.event_id) else {
            return Ok(None);
        };
        let in_scope = |event_id: &str, instance_id: &Option<String>| {
            event_id == scope.event_id && *instance_id == scope.instance_id
        };
        let mut tiers: Vec<TierRow> = state
            .tiers
            .iter()
            .filter(|(t, d)| !d && in_scope(&t.event_id, &t.instance_id))
            .map(|(t, _)| t.clone())
            .collect();
        tiers.sort_by_key(|t| t.order);
        let periods: Vec<PeriodRow> = state
            .periods
            .iter()
            .filter(|(p, d)| !d && in_scope(&p.event_id, &p.instance_id))
            .map(|(p, _)| p.clone())
            .collect();
        let period_ids: HashSet<&str> = periods.iter().map(|p| p.id.as_str()).collect();
        let pricing = state
            .pricing
            .iter()
            .filter(|(c, d)| !d && period_ids.contains(c.period_id.as_str()))
            .map(|(c, _)| c.clone())
            .collect();
        Ok(Some(BuilderSnapshot {
            provider_account: account.clone(),
            tiers,
            periods,
            pricing,
        }))
    }

    async fn commit(&self, _scope: &BuilderScope, writes: &LocalWrites, _timeout: Duration) -> Result<()> {
        let delay = self.state.lock().unwrap().commit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut guard = self.state.lock().unwrap();
        if std::mem::take(&mut guard.fail_commit) {
            bail!("injected commit failure");
        }
        // Work on a copy so a failed commit leaves nothing behind.
        let mut tiers = guard.tiers.clone();
        let mut periods = guard.periods.clone();
        let mut pricing = guard.pricing.clone();

        for id in &writes.pricing_deleted {
            soft_delete(&mut pricing, id);
        }
        for id in &writes.tiers_deleted {
            soft_delete(&mut tiers, id);
        }
        for id in &writes.periods_deleted {
            soft_delete(&mut periods, id);
        }
        tiers.extend(writes.tiers_created.iter().cloned().map(|t| (t, false)));
        for t in &writes.tiers_updated {
            replace(&mut tiers, t)?;
        }
        periods.extend(writes.periods_created.iter().cloned().map(|p| (p, false)));
        for p in &writes.periods_updated {
            replace(&mut periods, p)?;
        }
        pricing.extend(writes.pricing_created.iter().cloned().map(|c| (c, false)));
        for c in &writes.pricing_updated {
            replace(&mut pricing, c)?;
        }

        let mut cells = HashSet::new();
        for (c, deleted) in &pricing {
            if !deleted && !cells.insert((c.period_id.clone(), c.tier_id.clone())) {
                bail!("duplicate active cell ({}, {})", c.period_id, c.tier_id);
            }
        }

        guard.tiers = tiers;
        guard.periods = periods;
        guard.pricing = pricing;
        guard.commits += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductState {
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceState {
    pub product_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub active: bool,
}

#[derive(Default)]
struct ProviderState {
    products: HashMap<String, ProductState>,
    prices: HashMap<String, PriceState>,
    calls: Vec<String>,
    next_id: usize,
    fail_after: Option<usize>,
}

impl ProviderState {
    fn call(&mut self, name: String) -> Result<(), ProviderError> {
        if let Some(remaining) = self.fail_after.as_mut() {
            if *remaining == 0 {
                self.fail_after = None;
                return Err(ProviderError::Api {
                    operation: "injected",
                    status: 500,
                    message: format!("{name} failed"),
                });
            }
            *remaining -= 1;
        }
        self.calls.push(name);
        Ok(())
    }

    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }
}

/// Provider fake that tracks object state and every successful call.
#[derive(Default)]
pub struct RecordingProvider {
    state: Mutex<ProviderState>,
}

impl RecordingProvider {
    /// Let `n` calls succeed, then fail the next one.
    pub fn fail_after(&self, n: usize) {
        self.state.lock().unwrap().fail_after = Some(n);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn product(&self, id: &str) -> Option<ProductState> {
        self.state.lock().unwrap().products.get(id).cloned()
    }

    pub fn price(&self, id: &str) -> Option<PriceState> {
        self.state.lock().unwrap().prices.get(id).cloned()
    }

    pub fn active_prices(&self) -> usize {
        self.state.lock().unwrap().prices.values().filter(|p| p.active).count()
    }

    pub fn active_products(&self) -> usize {
        self.state.lock().unwrap().products.values().filter(|p| p.active).count()
    }
}

#[async_trait]
impl PaymentProvider for RecordingProvider {
    async fn create_product(&self, account: &ProviderAccount, name: &str) -> Result<String, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call(format!("create_product {} {name}", account.as_str()))?;
        let id = state.mint("prod");
        state.products.insert(id.clone(), ProductState { name: name.to_string(), active: true });
        Ok(id)
    }

    async fn create_price(
        &self,
        _account: &ProviderAccount,
        product_id: &str,
        amount_minor: i64,
        currency: &str,
    ) -> Result<String, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call(format!("create_price {product_id} {amount_minor} {currency}"))?;
        let id = state.mint("price");
        state.prices.insert(
            id.clone(),
            PriceState {
                product_id: product_id.to_string(),
                amount_minor,
                currency: currency.to_string(),
                active: true,
            },
        );
        Ok(id)
    }

    async fn rename_product(&self, _account: &ProviderAccount, product_id: &str, name: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call(format!("rename_product {product_id} {name}"))?;
        if let Some(p) = state.products.get_mut(product_id) {
            p.name = name.to_string();
        }
        Ok(())
    }

    async fn set_product_active(&self, _account: &ProviderAccount, product_id: &str, active: bool) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call(format!("set_product_active {product_id} {active}"))?;
        if let Some(p) = state.products.get_mut(product_id) {
            p.active = active;
        }
        Ok(())
    }

    async fn set_price_active(&self, _account: &ProviderAccount, price_id: &str, active: bool) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.call(format!("set_price_active {price_id} {active}"))?;
        if let Some(p) = state.prices.get_mut(price_id) {
            p.active = active;
        }
        Ok(())
    }
}
