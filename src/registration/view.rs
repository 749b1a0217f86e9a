//! Read model returned by the builder GET route. Same shape as the PUT body,
//! so a client can edit it and send it straight back.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::model::BuilderSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierEntry {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceEntry {
    pub id: String,
    pub tier_id: String,
    pub price: BigDecimal,
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodEntry {
    pub id: String,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_time_tz: String,
    pub end_time_tz: String,
    pub prices: Vec<PriceEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderView {
    pub tiers: Vec<TierEntry>,
    pub periods: Vec<PeriodEntry>,
}

impl BuilderView {
    /// Cells inside a period follow tier order.
    pub fn from_snapshot(snapshot: &BuilderSnapshot) -> Self {
        let tier_rank = |tier_id: &str| {
            snapshot
                .tiers
                .iter()
                .position(|t| t.id == tier_id)
                .unwrap_or(usize::MAX)
        };

        let tiers = snapshot
            .tiers
            .iter()
            .map(|t| TierEntry {
                id: t.id.clone(),
                name: t.name.clone(),
                description: t.description.clone(),
                order: t.order,
            })
            .collect();

        let periods = snapshot
            .periods
            .iter()
            .map(|p| {
                let mut cells: Vec<_> = snapshot
                    .pricing
                    .iter()
                    .filter(|c| c.period_id == p.id)
                    .collect();
                cells.sort_by_key(|c| tier_rank(&c.tier_id));
                PeriodEntry {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    start_time: p.start_time,
                    end_time: p.end_time,
                    start_time_tz: p.start_time_tz.clone(),
                    end_time_tz: p.end_time_tz.clone(),
                    prices: cells
                        .into_iter()
                        .map(|c| PriceEntry {
                            id: c.id.clone(),
                            tier_id: c.tier_id.clone(),
                            price: c.price.clone(),
                            is_available: c.available,
                        })
                        .collect(),
                }
            })
            .collect();

        Self { tiers, periods }
    }
}
