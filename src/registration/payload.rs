//! Builder PUT body: wire shape and validation into typed input.

use bigdecimal::{BigDecimal, Signed};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use super::error::FieldError;
use super::identity::{Identity, RawId};

/// Request body exactly as sent by the builder UI. Every field is optional
/// here so that missing values are reported per field instead of failing
/// deserialization as a whole.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBuilderPayload {
    #[serde(default)]
    pub tiers: Vec<RawTier>,
    #[serde(default)]
    pub periods: Vec<RawPeriod>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTier {
    pub id: Option<RawId>,
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPeriod {
    pub id: Option<RawId>,
    pub name: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub start_time_tz: Option<String>,
    pub end_time_tz: Option<String>,
    #[serde(default)]
    pub prices: Vec<RawPrice>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPrice {
    pub id: Option<RawId>,
    pub tier_id: Option<RawId>,
    pub price: Option<RawAmount>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAmount {
    Number(serde_json::Number),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierInput {
    pub identity: Identity,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeriodInput {
    pub identity: Identity,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub start_time_tz: String,
    pub end_time_tz: String,
    pub prices: Vec<PriceInput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceInput {
    pub identity: Identity,
    /// Input-side key of the tier this cell sells.
    pub tier: Identity,
    pub price: BigDecimal,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuilderInput {
    pub tiers: Vec<TierInput>,
    pub periods: Vec<PeriodInput>,
}

impl RawBuilderPayload {
    /// Validate the whole body, collecting every field error.
    pub fn validate(&self) -> Result<BuilderInput, Vec<FieldError>> {
        let mut errors = Vec::new();

        let mut tiers = Vec::with_capacity(self.tiers.len());
        let mut seen_tiers = HashSet::new();
        for (i, raw) in self.tiers.iter().enumerate() {
            let path = format!("tiers[{i}]");
            let identity = Identity::from_raw(raw.id.as_ref(), i);
            if !seen_tiers.insert(identity.clone()) {
                errors.push(FieldError::new(format!("{path}.id"), "duplicate tier id"));
            }
            let name = required_text(raw.name.as_deref(), &format!("{path}.name"), &mut errors);
            tiers.push(TierInput {
                identity,
                name,
                description: raw
                    .description
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
            });
        }

        let mut periods = Vec::with_capacity(self.periods.len());
        let mut seen_periods = HashSet::new();
        let mut seen_cells = HashSet::new();
        for (i, raw) in self.periods.iter().enumerate() {
            let path = format!("periods[{i}]");
            let identity = Identity::from_raw(raw.id.as_ref(), i);
            if !seen_periods.insert(identity.clone()) {
                errors.push(FieldError::new(format!("{path}.id"), "duplicate period id"));
            }
            let name = required_text(raw.name.as_deref(), &format!("{path}.name"), &mut errors);
            let start_time = timestamp(raw.start_time.as_deref(), &format!("{path}.startTime"), &mut errors);
            let end_time = timestamp(raw.end_time.as_deref(), &format!("{path}.endTime"), &mut errors);
            if let (Some(start), Some(end)) = (start_time, end_time) {
                if end < start {
                    errors.push(FieldError::new(
                        format!("{path}.endTime"),
                        "endTime must not be before startTime",
                    ));
                }
            }
            let start_time_tz =
                required_text(raw.start_time_tz.as_deref(), &format!("{path}.startTimeTz"), &mut errors);
            let end_time_tz =
                required_text(raw.end_time_tz.as_deref(), &format!("{path}.endTimeTz"), &mut errors);

            let mut prices = Vec::with_capacity(raw.prices.len());
            let mut tiers_in_period = HashSet::new();
            for (j, price) in raw.prices.iter().enumerate() {
                let cell_path = format!("{path}.prices[{j}]");
                let cell_identity = Identity::from_raw(price.id.as_ref(), j);
                if let Identity::Existing(id) = &cell_identity {
                    if !seen_cells.insert(id.clone()) {
                        errors.push(FieldError::new(format!("{cell_path}.id"), "duplicate price id"));
                    }
                }
                // A cell without tierId sells the tier at the same position.
                let tier = match price.tier_id.as_ref() {
                    Some(raw_tier) => Some(Identity::from_raw(Some(raw_tier), j)),
                    None => tiers.get(j).map(|t| t.identity.clone()),
                };
                let tier = match tier {
                    Some(t) if seen_tiers.contains(&t) => Some(t),
                    Some(t) => {
                        errors.push(FieldError::new(
                            format!("{cell_path}.tierId"),
                            format!("tier {t} is not part of this payload"),
                        ));
                        None
                    }
                    None => {
                        errors.push(FieldError::new(
                            format!("{cell_path}.tierId"),
                            format!("no tier at position {j}"),
                        ));
                        None
                    }
                };
                if let Some(t) = &tier {
                    if !tiers_in_period.insert(t.clone()) {
                        errors.push(FieldError::new(
                            format!("{cell_path}.tierId"),
                            "tier is priced twice in this period",
                        ));
                    }
                }
                let parsed = amount(price.price.as_ref(), &format!("{cell_path}.price"), &mut errors);
                if let (Some(tier), Some(parsed)) = (tier, parsed) {
                    prices.push(PriceInput {
                        identity: cell_identity,
                        tier,
                        price: parsed,
                        available: price.is_available.unwrap_or(true),
                    });
                }
            }

            if let (Some(start_time), Some(end_time)) = (start_time, end_time) {
                periods.push(PeriodInput {
                    identity,
                    name,
                    start_time,
                    end_time,
                    start_time_tz,
                    end_time_tz,
                    prices,
                });
            }
        }

        if errors.is_empty() {
            Ok(BuilderInput { tiers, periods })
        } else {
            Err(errors)
        }
    }
}

fn required_text(value: Option<&str>, field: &str, errors: &mut Vec<FieldError>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => {
            errors.push(FieldError::new(field, "required"));
            String::new()
        }
    }
}

fn timestamp(value: Option<&str>, field: &str, errors: &mut Vec<FieldError>) -> Option<DateTime<Utc>> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        errors.push(FieldError::new(field, "required"));
        return None;
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(_) => {
            errors.push(FieldError::new(field, "expected an RFC 3339 timestamp"));
            None
        }
    }
}

/// Largest accepted amount in minor units, the provider's `unit_amount` limit.
pub const MAX_AMOUNT_MINOR: i64 = 99_999_999;

fn amount(value: Option<&RawAmount>, field: &str, errors: &mut Vec<FieldError>) -> Option<BigDecimal> {
    let text = match value {
        None => {
            errors.push(FieldError::new(field, "required"));
            return None;
        }
        Some(RawAmount::Number(n)) => n.to_string(),
        Some(RawAmount::Text(s)) => s.trim().to_string(),
    };
    if text.contains(|c: char| matches!(c, 'e' | 'E')) {
        errors.push(FieldError::new(field, "exponent notation is not accepted"));
        return None;
    }
    let parsed = match BigDecimal::from_str(&text) {
        Ok(v) => v,
        Err(_) => {
            errors.push(FieldError::new(field, format!("'{text}' is not a decimal amount")));
            return None;
        }
    };
    if parsed.is_negative() {
        errors.push(FieldError::new(field, "must not be negative"));
        return None;
    }
    let (_, exponent) = parsed.normalized().as_bigint_and_exponent();
    if exponent > 2 {
        errors.push(FieldError::new(field, "at most two decimal places"));
        return None;
    }
    if &parsed * BigDecimal::from(100) > BigDecimal::from(MAX_AMOUNT_MINOR) {
        errors.push(FieldError::new(field, "must not exceed 999999.99"));
        return None;
    }
    Some(parsed.with_scale(2))
}

/// Amount in minor currency units (`25.00` -> `2500`).
pub fn to_minor_units(price: &BigDecimal) -> Option<i64> {
    use bigdecimal::ToPrimitive;
    (price * BigDecimal::from(100)).with_scale(0).to_i64()
}
