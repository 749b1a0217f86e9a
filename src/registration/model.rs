use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Event + instance a builder call operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderScope {
    pub event_id: String,
    pub instance_id: Option<String>,
}

impl BuilderScope {
    pub fn new(event_id: impl Into<String>, instance_id: Option<String>) -> Self {
        Self {
            event_id: event_id.into(),
            instance_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TierRow {
    pub id: String,
    pub event_id: String,
    pub instance_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PeriodRow {
    pub id: String,
    pub event_id: String,
    pub instance_id: Option<String>,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_time_tz: String,
    pub end_time_tz: String,
}

/// One price cell: a (period, tier) pair with its provider objects.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct PricingRow {
    pub id: String,
    pub period_id: String,
    pub tier_id: String,
    pub price: BigDecimal,
    pub available: bool,
    pub provider_product_id: Option<String>,
    pub provider_price_id: Option<String>,
}

/// Active (non-deleted) state of one scope, as read before a builder call.
#[derive(Debug, Clone, Default)]
pub struct BuilderSnapshot {
    /// Connected payment account of the owning event.
    pub provider_account: Option<String>,
    /// Sorted by `order`.
    pub tiers: Vec<TierRow>,
    pub periods: Vec<PeriodRow>,
    pub pricing: Vec<PricingRow>,
}

impl BuilderSnapshot {
    pub fn tier(&self, id: &str) -> Option<&TierRow> {
        self.tiers.iter().find(|t| t.id == id)
    }

    pub fn period(&self, id: &str) -> Option<&PeriodRow> {
        self.periods.iter().find(|p| p.id == id)
    }
}

/// Provider product display name for a cell.
pub fn product_name(tier_name: &str, period_name: &str) -> String {
    format!("{tier_name}: {period_name}")
}
