use serde::Serialize;
use thiserror::Error;

use crate::payments::ProviderError;

/// A rejected input value, keyed by its path in the request body
/// (e.g. `periods[0].prices[1].price`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("invalid builder payload ({} field errors)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("event {event_id} not found")]
    NotFound { event_id: String },

    #[error("event {event_id} has no connected payment account")]
    NoProviderAccount { event_id: String },

    #[error("payment provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0:#}")]
    Store(#[source] anyhow::Error),

    #[error("local commit exceeded {0:?}")]
    Timeout(std::time::Duration),

    #[error("internal error: {0:#}")]
    Internal(#[source] anyhow::Error),
}

impl From<Vec<FieldError>> for BuilderError {
    fn from(errors: Vec<FieldError>) -> Self {
        BuilderError::Validation(errors)
    }
}
