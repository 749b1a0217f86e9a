// API request/response models (DTOs)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registration::FieldError;

/// Standard API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-field details for rejected input.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            errors: Vec::new(),
            meta: Some(Meta::now()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            errors: Vec::new(),
            meta: Some(Meta::now()),
        }
    }

    pub fn with_errors(mut self, errors: Vec<ErrorDetail>) -> Self {
        self.errors = errors;
        self
    }
}

/// Metadata included in all API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct Meta {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub version: String,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub uptime_seconds: u64,
}

/// `?instance_id=` on builder routes
#[derive(Debug, Default, Deserialize)]
pub struct BuilderQuery {
    pub instance_id: Option<String>,
}

/// Error details for debugging
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl From<FieldError> for ErrorDetail {
    fn from(e: FieldError) -> Self {
        Self {
            code: "invalid".to_string(),
            message: e.message,
            field: Some(e.field),
        }
    }
}
