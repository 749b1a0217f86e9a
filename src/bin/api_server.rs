// HTTP API server binary for the registration builder

use anyhow::{Context, Result};
use eventpilot::api::{engine_from_env, ApiServer};
use eventpilot::telemetry;
use eventpilot::util::db::Db;
use eventpilot::util::env as env_util;

#[actix_web::main]
async fn main() -> Result<()> {
    telemetry::init_tracing(telemetry::DEFAULT_FILTER)?;

    // Load dotenv/env once (safe to call multiple times)
    env_util::init_env();
    env_util::preflight_check(
        "api_server",
        &["API_SECRET", "STRIPE_SECRET_KEY"],
        &["API_HOST", "API_PORT", "ALLOWED_ORIGINS", "STRIPE_API_BASE", "BUILDER_CURRENCY"],
    )?;

    let server = ApiServer::from_env()?;

    let database_url = env_util::db_url()?;
    let max_connections: u32 = env_util::env_parse("DB_MAX_CONNS", 10u32);
    let db = Db::connect(&database_url, max_connections)
        .await
        .context("connecting to database")?;

    let engine = engine_from_env(&db)?;
    server.run(db, engine).await
}
