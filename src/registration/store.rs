use async_trait::async_trait;
use std::time::Duration;

use super::model::{BuilderScope, BuilderSnapshot, PeriodRow, PricingRow, TierRow};

/// Every local write of one builder call. Applied atomically or not at all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalWrites {
    pub tiers_created: Vec<TierRow>,
    pub tiers_updated: Vec<TierRow>,
    pub tiers_deleted: Vec<String>,
    pub periods_created: Vec<PeriodRow>,
    pub periods_updated: Vec<PeriodRow>,
    pub periods_deleted: Vec<String>,
    pub pricing_deleted: Vec<String>,
    pub pricing_created: Vec<PricingRow>,
    pub pricing_updated: Vec<PricingRow>,
}

impl LocalWrites {
    pub fn statement_count(&self) -> usize {
        self.tiers_created.len()
            + self.tiers_updated.len()
            + self.tiers_deleted.len()
            + self.periods_created.len()
            + self.periods_updated.len()
            + self.periods_deleted.len()
            + self.pricing_deleted.len()
            + self.pricing_created.len()
            + self.pricing_updated.len()
    }
}

/// Persistence seam for the builder.
#[async_trait]
pub trait BuilderStore: Send + Sync {
    /// Active rows of `scope`, or `None` when the event does not exist.
    async fn load_snapshot(&self, scope: &BuilderScope) -> anyhow::Result<Option<BuilderSnapshot>>;

    /// Apply `writes` in a single transaction bounded by `timeout`.
    ///
    /// Deletions run first so that a replacement cell never collides with
    /// the active (period, tier) row it supersedes.
    async fn commit(&self, scope: &BuilderScope, writes: &LocalWrites, timeout: Duration) -> anyhow::Result<()>;
}
