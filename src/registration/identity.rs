//! Row identity as submitted by the builder client.
//!
//! Clients reference rows that are not persisted yet through placeholder ids
//! (the row's position, sent as a number or a numeric string). Anything else
//! is a real persisted id. The parser turns both shapes into [`Identity`] so
//! downstream code never has to sniff id strings again.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Id exactly as it appears on the wire: `"ck1x..."`, `3` or `"3"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Number(serde_json::Number),
    Text(String),
}

/// Client-side token for a row that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Placeholder(String);

impl Placeholder {
    pub fn positional(index: usize) -> Self {
        Self(index.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    Existing(String),
    New(Placeholder),
}

impl Identity {
    /// Classify an optional wire id. Rows without an id get the positional
    /// placeholder `index`.
    pub fn from_raw(raw: Option<&RawId>, index: usize) -> Self {
        match raw {
            None => Identity::New(Placeholder::positional(index)),
            Some(RawId::Number(n)) => Identity::New(Placeholder(normalize_number(n))),
            Some(RawId::Text(s)) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Identity::New(Placeholder::positional(index))
                } else if let Some(token) = numeric_token(trimmed) {
                    Identity::New(Placeholder(token))
                } else {
                    Identity::Existing(trimmed.to_string())
                }
            }
        }
    }

    pub fn existing_id(&self) -> Option<&str> {
        match self {
            Identity::Existing(id) => Some(id),
            Identity::New(_) => None,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Identity::New(_))
    }

    /// Stable key for logs and identity maps: the persisted id, or
    /// `__new_<kind>_<token>` for placeholders.
    pub fn key(&self, kind: &str) -> String {
        match self {
            Identity::Existing(id) => id.clone(),
            Identity::New(p) => format!("__new_{kind}_{}", p.as_str()),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Existing(id) => write!(f, "{id}"),
            Identity::New(p) => write!(f, "new:{}", p.as_str()),
        }
    }
}

// `3`, `3.0` and `"3"` name the same placeholder.
fn normalize_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (f as i64).to_string(),
        _ => n.to_string(),
    }
}

fn numeric_token(s: &str) -> Option<String> {
    let value: f64 = s.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some((value as i64).to_string())
    } else {
        Some(s.to_string())
    }
}
