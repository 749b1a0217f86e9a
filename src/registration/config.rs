use std::time::Duration;

use crate::util::env as env_util;

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// ISO currency code for minted prices, lowercase.
    pub currency: String,
    /// Upper bound for the local commit of one builder call.
    pub tx_timeout: Duration,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            tx_timeout: Duration::from_secs(300),
        }
    }
}

impl BuilderConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            currency: env_util::env_opt("BUILDER_CURRENCY")
                .map(|c| c.trim().to_ascii_lowercase())
                .filter(|c| !c.is_empty())
                .unwrap_or(defaults.currency),
            tx_timeout: Duration::from_secs(env_util::env_parse(
                "BUILDER_TX_TIMEOUT_SECS",
                defaults.tx_timeout.as_secs(),
            )),
        }
    }
}
