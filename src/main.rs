use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eventpilot::api::{engine_from_env, ApiServer};
use eventpilot::registration::{plan_builder, BuilderError, BuilderScope, PgBuilderStore, RawBuilderPayload};
use eventpilot::telemetry;
use eventpilot::util::db::Db;
use eventpilot::util::env as env_util;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "eventpilot", version, about = "EventPilot registration builder admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Run the builder HTTP API
    Serve,
    /// Apply pending SQL migrations from ./migrations
    Migrate {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Validate a builder body and print the planned changes without applying them
    Plan {
        /// Event the builder belongs to
        #[arg(long)]
        event_id: String,
        /// Optional event instance
        #[arg(long)]
        instance_id: Option<String>,
        /// Path to a JSON file shaped like the PUT body
        #[arg(long)]
        file: PathBuf,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
}

async fn connect(db_url: Option<String>) -> Result<Db> {
    let url = match db_url {
        Some(url) => url,
        None => env_util::db_url()?,
    };
    let max_connections: u32 = env_util::env_parse("DB_MAX_CONNS", 10u32);
    Db::connect(&url, max_connections)
        .await
        .context("connecting to database")
}

#[actix_web::main]
async fn main() -> Result<()> {
    telemetry::init_tracing(telemetry::DEFAULT_FILTER)?;
    env_util::init_env();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => {
            env_util::preflight_check(
                "serve",
                &["API_SECRET", "STRIPE_SECRET_KEY"],
                &["API_HOST", "API_PORT", "ALLOWED_ORIGINS", "STRIPE_API_BASE", "BUILDER_CURRENCY"],
            )?;
            let server = ApiServer::from_env()?;
            let db = connect(None).await?;
            let engine = engine_from_env(&db)?;
            server.run(db, engine).await?;
        }
        Commands::Migrate { db_url } => {
            let db = connect(db_url).await?;
            db.migrate().await.context("applying migrations")?;
            info!("migrations applied");
        }
        Commands::Plan {
            event_id,
            instance_id,
            file,
            db_url,
        } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let payload: RawBuilderPayload =
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;

            let db = connect(db_url).await?;
            let store = PgBuilderStore::new(db);
            let scope = BuilderScope::new(event_id, instance_id);
            match plan_builder(&store, &scope, &payload).await {
                Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                Err(BuilderError::Validation(errors)) => {
                    for e in &errors {
                        error!(field = %e.field, message = %e.message, "invalid");
                    }
                    anyhow::bail!("{} field error(s) in {}", errors.len(), file.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}
