// API server implementation using actix-web

use crate::api::handlers::{self, StartedAt};
use crate::api::{auth, middleware, routes};
use crate::payments::{StripeConfig, StripeProvider};
use crate::registration::{BuilderConfig, BuilderEngine, PgBuilderStore};
use crate::util::db::Db;
use crate::util::env as env_util;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;

/// Builder engine wired to Postgres and Stripe from environment settings.
pub fn engine_from_env(db: &Db) -> Result<BuilderEngine> {
    let stripe = StripeProvider::new(&StripeConfig::from_env()?).context("building Stripe client")?;
    Ok(BuilderEngine::new(
        Arc::new(PgBuilderStore::new(db.clone())),
        Arc::new(stripe),
        BuilderConfig::from_env(),
    ))
}

pub struct ApiServer {
    pub host: String,
    pub port: u16,
    pub api_secret: String,
    pub allowed_origins: String,
}

impl ApiServer {
    /// Create server from environment variables
    pub fn from_env() -> Result<Self> {
        env_util::init_env();

        let host = env_util::env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = env_util::env_opt("API_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .context("Invalid API_PORT")?;

        let api_secret =
            env_util::env_req("API_SECRET").context("API_SECRET environment variable is required")?;

        let allowed_origins = env_util::env_opt("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(Self {
            host,
            port,
            api_secret,
            allowed_origins,
        })
    }

    /// Start the HTTP server
    pub async fn run(self, db: Db, engine: BuilderEngine) -> Result<()> {
        let bind_addr = format!("{}:{}", self.host, self.port);

        tracing::info!(
            host = %self.host,
            port = %self.port,
            currency = %engine.config().currency,
            "Starting eventpilot API server"
        );

        let db_data = web::Data::new(db);
        let engine_data = web::Data::new(engine);
        let started = web::Data::new(StartedAt(Instant::now()));
        let api_secret = self.api_secret.clone();
        let allowed_origins = self.allowed_origins.clone();

        HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            let cors = middleware::setup_cors(&allowed_origins);
            let auth = auth::Auth::new(api_secret.clone());

            App::new()
                .app_data(db_data.clone())
                .app_data(engine_data.clone())
                .app_data(started.clone())
                .app_data(web::JsonConfig::default().error_handler(handlers::json_error_handler))
                .wrap(logger)
                .wrap(compress)
                .wrap(cors)
                .wrap(auth)
                .configure(routes::configure_routes)
        })
        .bind(&bind_addr)
        .with_context(|| format!("Failed to bind to {}", bind_addr))?
        .run()
        .await
        .context("HTTP server error")?;

        Ok(())
    }
}
