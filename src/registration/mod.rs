//! Registration builder: tiers, periods and their price cells for one
//! event+instance, reconciled against the database and the payment provider.

pub mod compensation;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod identity;
pub mod model;
pub mod payload;
pub mod pg_store;
pub mod pricing;
pub mod store;
pub mod upsert;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use config::BuilderConfig;
pub use engine::{plan_builder, BuilderEngine, PlanReport, PutSummary};
pub use error::{BuilderError, FieldError};
pub use model::BuilderScope;
pub use payload::RawBuilderPayload;
pub use pg_store::PgBuilderStore;
pub use store::BuilderStore;
pub use view::BuilderView;
