use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{PaymentProvider, ProviderAccount, ProviderError};
use crate::util::env as env_util;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub api_base: String,
    pub secret_key: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl StripeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            api_base: env_util::env_opt("STRIPE_API_BASE")
                .unwrap_or_else(|| "https://api.stripe.com".to_string()),
            secret_key: env_util::env_req("STRIPE_SECRET_KEY")?,
            timeout_secs: env_util::env_parse("STRIPE_TIMEOUT_SECS", 20u64),
            max_retries: env_util::env_parse("STRIPE_MAX_RETRIES", 2u32),
        })
    }
}

/// Stripe REST client for products and prices on connected accounts.
///
/// Every logical call carries one `Idempotency-Key` that is reused across its
/// transport retries, so a retried create never mints a second object.
#[derive(Clone)]
pub struct StripeProvider {
    base_url: String,
    http: Client,
    secret_key: String,
    max_retries: u32,
}

#[derive(Deserialize)]
struct ObjectId {
    id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
}

impl StripeProvider {
    pub fn new(config: &StripeConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("eventpilot/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.api_base.trim_end_matches('/').to_string(),
            http,
            secret_key: config.secret_key.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn post_form(
        &self,
        operation: &'static str,
        account: &ProviderAccount,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<String, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let idempotency_key = uuid::Uuid::new_v4().to_string();
        let mut attempt = 0u32;

        loop {
            let sent = self
                .http
                .post(&url)
                .bearer_auth(&self.secret_key)
                .header("Stripe-Account", account.as_str())
                .header("Idempotency-Key", &idempotency_key)
                .form(form)
                .send()
                .await;

            match sent {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .text()
                        .await
                        .map_err(|source| ProviderError::Transport { operation, source })?;
                    if status.is_success() {
                        debug!(operation, path, "stripe call ok");
                        return Ok(body);
                    }
                    if is_retryable(status) && attempt < self.max_retries {
                        warn!(operation, status = status.as_u16(), attempt = attempt + 1, "retrying stripe call");
                        tokio::time::sleep(backoff(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ProviderError::Api {
                        operation,
                        status: status.as_u16(),
                        message: error_message(&body),
                    });
                }
                Err(source) => {
                    if (source.is_timeout() || source.is_connect()) && attempt < self.max_retries {
                        warn!(operation, error = %source, attempt = attempt + 1, "retrying stripe call");
                        tokio::time::sleep(backoff(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ProviderError::Transport { operation, source });
                }
            }
        }
    }

    async fn post_for_id(
        &self,
        operation: &'static str,
        account: &ProviderAccount,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<String, ProviderError> {
        let body = self.post_form(operation, account, path, form).await?;
        serde_json::from_str::<ObjectId>(&body)
            .map(|o| o.id)
            .map_err(|e| ProviderError::Decode {
                operation,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    async fn create_product(
        &self,
        account: &ProviderAccount,
        name: &str,
    ) -> Result<String, ProviderError> {
        self.post_for_id(
            "create_product",
            account,
            "/v1/products",
            &[("name", name.to_string())],
        )
        .await
    }

    async fn create_price(
        &self,
        account: &ProviderAccount,
        product_id: &str,
        amount_minor: i64,
        currency: &str,
    ) -> Result<String, ProviderError> {
        self.post_for_id(
            "create_price",
            account,
            "/v1/prices",
            &[
                ("product", product_id.to_string()),
                ("unit_amount", amount_minor.to_string()),
                ("currency", currency.to_ascii_lowercase()),
            ],
        )
        .await
    }

    async fn rename_product(
        &self,
        account: &ProviderAccount,
        product_id: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        self.post_form(
            "rename_product",
            account,
            &format!("/v1/products/{product_id}"),
            &[("name", name.to_string())],
        )
        .await
        .map(|_| ())
    }

    async fn set_product_active(
        &self,
        account: &ProviderAccount,
        product_id: &str,
        active: bool,
    ) -> Result<(), ProviderError> {
        self.post_form(
            "set_product_active",
            account,
            &format!("/v1/products/{product_id}"),
            &[("active", active.to_string())],
        )
        .await
        .map(|_| ())
    }

    async fn set_price_active(
        &self,
        account: &ProviderAccount,
        price_id: &str,
        active: bool,
    ) -> Result<(), ProviderError> {
        self.post_form(
            "set_price_active",
            account,
            &format!("/v1/prices/{price_id}"),
            &[("active", active.to_string())],
        )
        .await
        .map(|_| ())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn backoff(attempt: u32) -> Duration {
    let ms = 250u64.saturating_mul(1u64 << attempt.min(4));
    Duration::from_millis(ms.min(4_000))
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => match (env.error.code, env.error.message) {
            (Some(code), Some(msg)) => format!("{code}: {msg}"),
            (None, Some(msg)) => msg,
            (Some(code), None) => code,
            (None, None) => "unknown provider error".to_string(),
        },
        Err(_) => {
            let mut s = body.trim().to_string();
            if s.len() > 200 {
                let mut cut = 200;
                while !s.is_char_boundary(cut) {
                    cut -= 1;
                }
                s.truncate(cut);
                s.push('…');
            }
            s
        }
    }
}
