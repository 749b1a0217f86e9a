//! Price cell reconciliation against the payment provider.
//!
//! Planning is pure and decides one [`CellAction`] per cell. Execution walks
//! the actions in order, one provider round-trip at a time, and records the
//! inverse of every mutation in a [`CompensationLog`].

use bigdecimal::BigDecimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument};

use super::compensation::{Compensation, CompensationLog};
use super::error::{BuilderError, FieldError};
use super::identity::Identity;
use super::model::{product_name, BuilderSnapshot, PeriodRow, PricingRow, TierRow};
use super::payload::{to_minor_units, PeriodInput, PriceInput};
use super::upsert::Staged;
use crate::payments::{PaymentProvider, ProviderAccount, ProviderError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellCreate {
    pub cell_id: String,
    pub period_id: String,
    pub tier_id: String,
    pub product_name: String,
    pub price: BigDecimal,
    pub amount_minor: i64,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProductStep {
    Keep,
    Rename { from: String, to: String },
    /// The stored cell never got a provider product.
    Create { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellUpdate {
    pub existing: PricingRow,
    pub price: BigDecimal,
    pub amount_minor: i64,
    pub available: bool,
    pub product: ProductStep,
    /// Mint a new provider price (and retire the old one, if any).
    pub reprice: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CellAction {
    Create(CellCreate),
    Update(CellUpdate),
    Unchanged { cell_id: String },
    Remove(PricingRow),
}

impl CellAction {
    pub fn needs_provider(&self) -> bool {
        match self {
            CellAction::Create(_) => true,
            CellAction::Update(u) => u.reprice || u.product != ProductStep::Keep,
            CellAction::Unchanged { .. } => false,
            CellAction::Remove(row) => row.provider_product_id.is_some(),
        }
    }
}

pub fn requires_provider(actions: &[CellAction]) -> bool {
    actions.iter().any(CellAction::needs_provider)
}

/// Decide what happens to every price cell of the submission.
///
/// Incoming cells match stored cells by id first, then by (period, tier).
/// Stored cells left unmatched are removed, which also covers every cell of
/// a deleted tier or period.
pub fn plan_pricing(
    periods: &[PeriodInput],
    tiers: &Staged<TierRow>,
    staged_periods: &Staged<PeriodRow>,
    snapshot: &BuilderSnapshot,
) -> Result<Vec<CellAction>, BuilderError> {
    let tier_names: HashMap<&str, &str> = tiers.rows().map(|t| (t.id.as_str(), t.name.as_str())).collect();
    let stored_by_id: HashMap<&str, &PricingRow> = snapshot.pricing.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut errors = Vec::new();

    struct Resolved<'p> {
        path: String,
        period_id: String,
        period_name: &'p str,
        tier_id: String,
        input: &'p PriceInput,
    }

    let mut resolved = Vec::new();
    for (i, period) in periods.iter().enumerate() {
        let Some(period_id) = staged_periods.ids.resolve(&period.identity) else {
            errors.push(FieldError::new(format!("periods[{i}].id"), "unresolved period"));
            continue;
        };
        for (j, cell) in period.prices.iter().enumerate() {
            let path = format!("periods[{i}].prices[{j}]");
            let Some(tier_id) = tiers.ids.resolve(&cell.tier) else {
                errors.push(FieldError::new(format!("{path}.tierId"), "unresolved tier"));
                continue;
            };
            resolved.push(Resolved {
                path,
                period_id: period_id.to_string(),
                period_name: &period.name,
                tier_id: tier_id.to_string(),
                input: cell,
            });
        }
    }

    // Pass 1: cells that name their stored row.
    let mut matched: HashMap<usize, &PricingRow> = HashMap::new();
    let mut claimed: HashSet<&str> = HashSet::new();
    for (k, r) in resolved.iter().enumerate() {
        let Identity::Existing(cell_id) = &r.input.identity else {
            continue;
        };
        match stored_by_id.get(cell_id.as_str()).copied() {
            None => errors.push(FieldError::new(format!("{}.id", r.path), "unknown price id")),
            Some(row) if row.period_id != r.period_id || row.tier_id != r.tier_id => errors.push(
                FieldError::new(format!("{}.id", r.path), "price belongs to a different tier or period"),
            ),
            Some(row) => {
                matched.insert(k, row);
                claimed.insert(row.id.as_str());
            }
        }
    }
    // Pass 2: new cells adopt the stored row of the same (period, tier).
    for (k, r) in resolved.iter().enumerate() {
        if !r.input.identity.is_new() {
            continue;
        }
        if let Some(row) = snapshot.pricing.iter().find(|c| {
            !claimed.contains(c.id.as_str()) && c.period_id == r.period_id && c.tier_id == r.tier_id
        }) {
            matched.insert(k, row);
            claimed.insert(row.id.as_str());
        }
    }

    let mut actions = Vec::with_capacity(resolved.len());
    for (k, r) in resolved.iter().enumerate() {
        let Some(amount_minor) = to_minor_units(&r.input.price) else {
            errors.push(FieldError::new(format!("{}.price", r.path), "amount too large"));
            continue;
        };
        let tier_name = tier_names.get(r.tier_id.as_str()).copied().unwrap_or_default();
        let name = product_name(tier_name, r.period_name);

        let Some(row) = matched.get(&k) else {
            actions.push(CellAction::Create(CellCreate {
                cell_id: uuid::Uuid::new_v4().to_string(),
                period_id: r.period_id.clone(),
                tier_id: r.tier_id.clone(),
                product_name: name,
                price: r.input.price.clone(),
                amount_minor,
                available: r.input.available,
            }));
            continue;
        };

        let product = match &row.provider_product_id {
            None => ProductStep::Create { name },
            Some(_) => {
                let stored_name = stored_product_name(snapshot, row);
                if stored_name == name {
                    ProductStep::Keep
                } else {
                    ProductStep::Rename { from: stored_name, to: name }
                }
            }
        };
        let reprice = row.price != r.input.price
            || row.provider_price_id.is_none()
            || matches!(product, ProductStep::Create { .. });

        if !reprice && product == ProductStep::Keep && row.available == r.input.available {
            actions.push(CellAction::Unchanged { cell_id: row.id.clone() });
            continue;
        }
        actions.push(CellAction::Update(CellUpdate {
            existing: (*row).clone(),
            price: r.input.price.clone(),
            amount_minor,
            available: r.input.available,
            product,
            reprice,
        }));
    }

    for row in &snapshot.pricing {
        if !claimed.contains(row.id.as_str()) {
            actions.push(CellAction::Remove(row.clone()));
        }
    }

    if errors.is_empty() {
        Ok(actions)
    } else {
        Err(BuilderError::Validation(errors))
    }
}

fn stored_product_name(snapshot: &BuilderSnapshot, row: &PricingRow) -> String {
    let tier = snapshot.tier(&row.tier_id).map(|t| t.name.as_str()).unwrap_or_default();
    let period = snapshot.period(&row.period_id).map(|p| p.name.as_str()).unwrap_or_default();
    product_name(tier, period)
}

/// Local pricing writes produced by a successful sync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PricingWrites {
    pub created: Vec<PricingRow>,
    pub updated: Vec<PricingRow>,
    pub deleted: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub created: usize,
    pub repriced: usize,
    pub renamed: usize,
    pub toggled: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub provider_calls: usize,
}

/// Execute provider work for `actions` in order and return the matching
/// local writes. Stops at the first provider error; whatever ran before it
/// is already recorded in `log`.
#[instrument(skip_all, fields(cells = actions.len()))]
pub async fn sync_pricing_for_periods(
    provider: &dyn PaymentProvider,
    account: &ProviderAccount,
    currency: &str,
    actions: &[CellAction],
    log: &mut CompensationLog,
) -> Result<(PricingWrites, SyncStats), ProviderError> {
    let mut writes = PricingWrites::default();
    let mut stats = SyncStats::default();

    for action in actions {
        match action {
            CellAction::Create(c) => {
                let product_id = provider.create_product(account, &c.product_name).await?;
                log.record(Compensation::DeactivateProduct(product_id.clone()));
                let price_id = provider
                    .create_price(account, &product_id, c.amount_minor, currency)
                    .await?;
                log.record(Compensation::DeactivatePrice(price_id.clone()));
                stats.provider_calls += 2;
                stats.created += 1;
                info!(cell_id = %c.cell_id, provider_product_id = %product_id, provider_price_id = %price_id, "price cell created");

                writes.created.push(PricingRow {
                    id: c.cell_id.clone(),
                    period_id: c.period_id.clone(),
                    tier_id: c.tier_id.clone(),
                    price: c.price.clone(),
                    available: c.available,
                    provider_product_id: Some(product_id),
                    provider_price_id: Some(price_id),
                });
            }
            CellAction::Update(u) => {
                let mut row = u.existing.clone();
                match &u.product {
                    ProductStep::Keep => {}
                    ProductStep::Rename { from, to } => {
                        if let Some(product_id) = &row.provider_product_id {
                            provider.rename_product(account, product_id, to).await?;
                            log.record(Compensation::RenameProduct {
                                product_id: product_id.clone(),
                                name: from.clone(),
                            });
                            stats.provider_calls += 1;
                            stats.renamed += 1;
                        }
                    }
                    ProductStep::Create { name } => {
                        let product_id = provider.create_product(account, name).await?;
                        log.record(Compensation::DeactivateProduct(product_id.clone()));
                        stats.provider_calls += 1;
                        row.provider_product_id = Some(product_id);
                    }
                }

                if u.reprice {
                    if let Some(old_price) = &u.existing.provider_price_id {
                        provider.set_price_active(account, old_price, false).await?;
                        log.record(Compensation::ReactivatePrice(old_price.clone()));
                        stats.provider_calls += 1;
                    }
                    if let Some(product_id) = &row.provider_product_id {
                        let price_id = provider
                            .create_price(account, product_id, u.amount_minor, currency)
                            .await?;
                        log.record(Compensation::DeactivatePrice(price_id.clone()));
                        stats.provider_calls += 1;
                        info!(cell_id = %row.id, old_price = ?u.existing.provider_price_id, provider_price_id = %price_id, "price cell repriced");
                        row.provider_price_id = Some(price_id);
                    }
                    stats.repriced += 1;
                }

                if row.available != u.available {
                    stats.toggled += 1;
                }
                row.price = u.price.clone();
                row.available = u.available;
                writes.updated.push(row);
            }
            CellAction::Unchanged { .. } => stats.unchanged += 1,
            CellAction::Remove(row) => {
                if let Some(product_id) = &row.provider_product_id {
                    provider.set_product_active(account, product_id, false).await?;
                    log.record(Compensation::ReactivateProduct(product_id.clone()));
                    stats.provider_calls += 1;
                }
                stats.removed += 1;
                info!(cell_id = %row.id, provider_product_id = ?row.provider_product_id, "price cell removed");
                writes.deleted.push(row.id.clone());
            }
        }
    }

    Ok((writes, stats))
}
