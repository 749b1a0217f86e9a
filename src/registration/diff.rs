//! Create/update/delete classification of an incoming list against persisted rows.

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Rows that can be matched by persisted id. `None` means "not persisted yet".
pub trait Identified {
    fn identity_key(&self) -> Option<&str>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Comparison {
    pub equal: bool,
    /// Dotted paths of keys whose values differ.
    pub changed_keys: Vec<String>,
}

/// Structural equality over serialized values.
///
/// Objects are compared key by key, recursing into nested objects; a key
/// present on one side only (even as `null`) is a change. Arrays and scalars
/// are compared as whole values.
pub fn deep_compare(a: &Value, b: &Value) -> Comparison {
    let mut changed_keys = Vec::new();
    collect_changes(a, b, "", &mut changed_keys);
    Comparison {
        equal: changed_keys.is_empty(),
        changed_keys,
    }
}

fn collect_changes(a: &Value, b: &Value, prefix: &str, out: &mut Vec<String>) {
    if std::ptr::eq(a, b) {
        return;
    }
    match (a, b) {
        (Value::Object(left), Value::Object(right)) => {
            let mut keys: Vec<&String> = left.keys().chain(right.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match (left.get(key), right.get(key)) {
                    (Some(l), Some(r)) => collect_changes(l, r, &path, out),
                    _ => out.push(path),
                }
            }
        }
        _ => {
            if a != b {
                out.push(if prefix.is_empty() {
                    "$".to_string()
                } else {
                    prefix.to_string()
                });
            }
        }
    }
}

#[derive(Debug)]
pub struct Changed<'a, T> {
    pub incoming: &'a T,
    pub existing: &'a T,
    pub changed_keys: Vec<String>,
}

#[derive(Debug)]
pub struct CudPartition<'a, T> {
    pub new_: Vec<&'a T>,
    pub existing_with_diffs: Vec<Changed<'a, T>>,
    pub existing_without_diffs: Vec<&'a T>,
    pub deleted: Vec<&'a T>,
}

impl<'a, T> CudPartition<'a, T> {
    pub fn incoming_len(&self) -> usize {
        self.new_.len() + self.existing_with_diffs.len() + self.existing_without_diffs.len()
    }
}

/// Partition `incoming` against `existing` by id and deep equality.
pub fn prepare_cud<'a, T>(
    incoming: &'a [T],
    existing: &'a [T],
) -> Result<CudPartition<'a, T>, serde_json::Error>
where
    T: Identified + Serialize,
{
    let by_id: HashMap<&str, &T> = existing
        .iter()
        .filter_map(|e| e.identity_key().map(|id| (id, e)))
        .collect();

    let mut partition = CudPartition {
        new_: Vec::new(),
        existing_with_diffs: Vec::new(),
        existing_without_diffs: Vec::new(),
        deleted: Vec::new(),
    };
    let mut incoming_ids: HashSet<&str> = HashSet::new();

    for item in incoming {
        let Some(id) = item.identity_key() else {
            partition.new_.push(item);
            continue;
        };
        incoming_ids.insert(id);
        let Some(current) = by_id.get(id) else {
            partition.new_.push(item);
            continue;
        };
        let cmp = deep_compare(&serde_json::to_value(item)?, &serde_json::to_value(*current)?);
        if cmp.equal {
            partition.existing_without_diffs.push(item);
        } else {
            partition.existing_with_diffs.push(Changed {
                incoming: item,
                existing: current,
                changed_keys: cmp.changed_keys,
            });
        }
    }

    partition.deleted = existing
        .iter()
        .filter(|e| e.identity_key().map_or(true, |id| !incoming_ids.contains(id)))
        .collect();

    Ok(partition)
}

/// Ids of `existing` rows missing from `incoming_ids`.
pub fn missing_ids<'a, T: Identified>(existing: &'a [T], incoming_ids: &HashSet<&str>) -> Vec<&'a str> {
    existing
        .iter()
        .filter_map(|e| e.identity_key())
        .filter(|id| !incoming_ids.contains(id))
        .collect()
}
