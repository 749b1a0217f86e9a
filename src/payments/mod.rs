//! Payment provider seam used by the pricing synchronizer.
//!
//! Provider prices are immutable once minted: an amount change is always
//! "deactivate old price, create new price" on the same product.

pub mod stripe;

use async_trait::async_trait;
use thiserror::Error;

pub use stripe::{StripeConfig, StripeProvider};

/// Connected account every provider call of one event is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAccount(pub String);

impl ProviderAccount {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{operation} failed with status {status}: {message}")]
    Api {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("{operation} transport error: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} returned an unexpected body: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn operation(&self) -> &'static str {
        match self {
            ProviderError::Api { operation, .. }
            | ProviderError::Transport { operation, .. }
            | ProviderError::Decode { operation, .. } => operation,
        }
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a product and return its provider id.
    async fn create_product(
        &self,
        account: &ProviderAccount,
        name: &str,
    ) -> Result<String, ProviderError>;

    /// Create a price in minor units under `product_id` and return its provider id.
    async fn create_price(
        &self,
        account: &ProviderAccount,
        product_id: &str,
        amount_minor: i64,
        currency: &str,
    ) -> Result<String, ProviderError>;

    async fn rename_product(
        &self,
        account: &ProviderAccount,
        product_id: &str,
        name: &str,
    ) -> Result<(), ProviderError>;

    async fn set_product_active(
        &self,
        account: &ProviderAccount,
        product_id: &str,
        active: bool,
    ) -> Result<(), ProviderError>;

    async fn set_price_active(
        &self,
        account: &ProviderAccount,
        price_id: &str,
        active: bool,
    ) -> Result<(), ProviderError>;
}
