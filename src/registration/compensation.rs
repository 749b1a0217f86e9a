//! Undo log for provider mutations issued before the local commit.

use tracing::{error, info, warn};

use crate::payments::{PaymentProvider, ProviderAccount};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compensation {
    DeactivateProduct(String),
    DeactivatePrice(String),
    ReactivateProduct(String),
    ReactivatePrice(String),
    RenameProduct { product_id: String, name: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnwindReport {
    pub attempted: usize,
    pub failed: usize,
}

/// Inverse of every provider mutation applied so far, in application order.
#[derive(Debug, Default)]
pub struct CompensationLog {
    steps: Vec<Compensation>,
}

impl CompensationLog {
    pub fn record(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Compensation] {
        &self.steps
    }

    /// Run the recorded steps newest first. A failing step is logged and
    /// skipped; the remaining steps still run.
    pub async fn unwind(
        self,
        provider: &dyn PaymentProvider,
        account: &ProviderAccount,
    ) -> UnwindReport {
        let mut report = UnwindReport::default();
        if self.steps.is_empty() {
            return report;
        }
        warn!(steps = self.steps.len(), "unwinding provider mutations");

        for step in self.steps.into_iter().rev() {
            report.attempted += 1;
            let result = match &step {
                Compensation::DeactivateProduct(id) => provider.set_product_active(account, id, false).await,
                Compensation::DeactivatePrice(id) => provider.set_price_active(account, id, false).await,
                Compensation::ReactivateProduct(id) => provider.set_product_active(account, id, true).await,
                Compensation::ReactivatePrice(id) => provider.set_price_active(account, id, true).await,
                Compensation::RenameProduct { product_id, name } => {
                    provider.rename_product(account, product_id, name).await
                }
            };
            if let Err(e) = result {
                report.failed += 1;
                // Left for manual cleanup: the provider object no longer matches local state.
                error!(step = ?step, error = %e, "compensation failed");
            }
        }
        info!(attempted = report.attempted, failed = report.failed, "unwind finished");
        report
    }
}
