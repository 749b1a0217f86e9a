//! Tier and period appliers.
//!
//! Both stage their writes instead of executing them: the result carries the
//! rows to insert or update, the ids to soft-delete, and the identity map from
//! input-side keys to persisted ids. New ids are minted here so that price
//! cells can reference rows before anything is written.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::diff::{self, prepare_cud, Identified};
use super::error::{BuilderError, FieldError};
use super::identity::Identity;
use super::model::{BuilderScope, PeriodRow, TierRow};
use super::payload::{PeriodInput, TierInput};

/// Input-side key -> persisted id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityMap {
    ids: HashMap<Identity, String>,
}

impl IdentityMap {
    pub fn insert(&mut self, key: Identity, persisted_id: String) {
        self.ids.insert(key, persisted_id);
    }

    pub fn resolve(&self, key: &Identity) -> Option<&str> {
        self.ids.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn persisted_ids(&self) -> HashSet<&str> {
        self.ids.values().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Staged<R> {
    pub created: Vec<R>,
    /// Every persisted row that appears in the input, changed or not.
    pub updated: Vec<R>,
    /// How many of `updated` actually differ from their stored version.
    pub changed: usize,
    /// Ids to soft-delete.
    pub deleted: Vec<String>,
    pub ids: IdentityMap,
}

impl<R> Default for Staged<R> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            changed: 0,
            deleted: Vec::new(),
            ids: IdentityMap::default(),
        }
    }
}

impl<R> Staged<R> {
    /// Rows as they will exist after the write, input order not guaranteed.
    pub fn rows(&self) -> impl Iterator<Item = &R> {
        self.created.iter().chain(self.updated.iter())
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn internal(e: serde_json::Error, what: &str) -> BuilderError {
    BuilderError::Internal(anyhow::Error::from(e).context(format!("diffing {what}")))
}

/// Comparable projection of a tier.
#[derive(Serialize)]
struct TierView<'a> {
    #[serde(skip)]
    index: usize,
    #[serde(skip)]
    key: Option<&'a str>,
    name: &'a str,
    description: Option<&'a str>,
    order: i32,
}

impl Identified for TierView<'_> {
    fn identity_key(&self) -> Option<&str> {
        self.key
    }
}

/// Stage tier creates and updates. `order` is rewritten for every tier to
/// its position in `incoming`.
pub fn upsert_tiers(
    incoming: &[TierInput],
    existing: &[TierRow],
    scope: &BuilderScope,
) -> Result<Staged<TierRow>, BuilderError> {
    let incoming_views: Vec<TierView<'_>> = incoming
        .iter()
        .enumerate()
        .map(|(i, t)| TierView {
            index: i,
            key: t.identity.existing_id(),
            name: &t.name,
            description: t.description.as_deref(),
            order: i as i32,
        })
        .collect();
    let existing_views: Vec<TierView<'_>> = existing
        .iter()
        .enumerate()
        .map(|(i, t)| TierView {
            index: i,
            key: Some(&t.id),
            name: &t.name,
            description: t.description.as_deref(),
            order: t.order,
        })
        .collect();

    let partition = prepare_cud(&incoming_views, &existing_views).map_err(|e| internal(e, "tiers"))?;
    let unknown: Vec<FieldError> = partition
        .new_
        .iter()
        .filter(|v| v.key.is_some())
        .map(|v| FieldError::new(format!("tiers[{}].id", v.index), "unknown tier id"))
        .collect();
    if !unknown.is_empty() {
        return Err(BuilderError::Validation(unknown));
    }
    for changed in &partition.existing_with_diffs {
        debug!(tier_id = ?changed.incoming.key, keys = ?changed.changed_keys, "tier changed");
    }

    let mut staged = Staged {
        changed: partition.existing_with_diffs.len(),
        ..Staged::default()
    };
    for (i, tier) in incoming.iter().enumerate() {
        let id = match &tier.identity {
            Identity::Existing(id) => id.clone(),
            Identity::New(_) => new_id(),
        };
        let row = TierRow {
            id: id.clone(),
            event_id: scope.event_id.clone(),
            instance_id: scope.instance_id.clone(),
            name: tier.name.clone(),
            description: tier.description.clone(),
            order: i as i32,
        };
        debug!(key = %tier.identity.key("tier"), tier_id = %id, "tier staged");
        if tier.identity.is_new() {
            staged.created.push(row);
        } else {
            staged.updated.push(row);
        }
        staged.ids.insert(tier.identity.clone(), id);
    }
    staged.deleted = delete_missing(existing, &staged.ids);
    Ok(staged)
}

#[derive(Serialize)]
struct PeriodView<'a> {
    #[serde(skip)]
    index: usize,
    #[serde(skip)]
    key: Option<&'a str>,
    name: &'a str,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    start_time_tz: &'a str,
    end_time_tz: &'a str,
}

impl Identified for PeriodView<'_> {
    fn identity_key(&self) -> Option<&str> {
        self.key
    }
}

/// Stage period creates and updates.
pub fn upsert_periods(
    incoming: &[PeriodInput],
    existing: &[PeriodRow],
    scope: &BuilderScope,
) -> Result<Staged<PeriodRow>, BuilderError> {
    let incoming_views: Vec<PeriodView<'_>> = incoming
        .iter()
        .enumerate()
        .map(|(i, p)| PeriodView {
            index: i,
            key: p.identity.existing_id(),
            name: &p.name,
            start_time: p.start_time,
            end_time: p.end_time,
            start_time_tz: &p.start_time_tz,
            end_time_tz: &p.end_time_tz,
        })
        .collect();
    let existing_views: Vec<PeriodView<'_>> = existing
        .iter()
        .enumerate()
        .map(|(i, p)| PeriodView {
            index: i,
            key: Some(&p.id),
            name: &p.name,
            start_time: p.start_time,
            end_time: p.end_time,
            start_time_tz: &p.start_time_tz,
            end_time_tz: &p.end_time_tz,
        })
        .collect();

    let partition =
        prepare_cud(&incoming_views, &existing_views).map_err(|e| internal(e, "periods"))?;
    let unknown: Vec<FieldError> = partition
        .new_
        .iter()
        .filter(|v| v.key.is_some())
        .map(|v| FieldError::new(format!("periods[{}].id", v.index), "unknown period id"))
        .collect();
    if !unknown.is_empty() {
        return Err(BuilderError::Validation(unknown));
    }

    let mut staged = Staged {
        changed: partition.existing_with_diffs.len(),
        ..Staged::default()
    };
    for period in incoming {
        let id = match &period.identity {
            Identity::Existing(id) => id.clone(),
            Identity::New(_) => new_id(),
        };
        let row = PeriodRow {
            id: id.clone(),
            event_id: scope.event_id.clone(),
            instance_id: scope.instance_id.clone(),
            name: period.name.clone(),
            start_time: period.start_time,
            end_time: period.end_time,
            start_time_tz: period.start_time_tz.clone(),
            end_time_tz: period.end_time_tz.clone(),
        };
        debug!(key = %period.identity.key("period"), period_id = %id, "period staged");
        if period.identity.is_new() {
            staged.created.push(row);
        } else {
            staged.updated.push(row);
        }
        staged.ids.insert(period.identity.clone(), id);
    }
    staged.deleted = delete_missing(existing, &staged.ids);
    Ok(staged)
}

impl Identified for TierRow {
    fn identity_key(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl Identified for PeriodRow {
    fn identity_key(&self) -> Option<&str> {
        Some(&self.id)
    }
}

/// Persisted rows that the submission no longer mentions.
pub fn delete_missing<T: Identified>(existing: &[T], ids: &IdentityMap) -> Vec<String> {
    diff::missing_ids(existing, &ids.persisted_ids())
        .into_iter()
        .map(str::to_string)
        .collect()
}
