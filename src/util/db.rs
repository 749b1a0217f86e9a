use anyhow::Result;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Row,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let use_prepared = crate::util::env::env_flag("USE_PREPARED", true);
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !use_prepared {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");

        // Default off: schema changes are applied explicitly via `eventpilot migrate`.
        if crate::util::env::env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on)");
            Self::run_migrations(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Quick connectivity probe used by the health endpoint.
    pub async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, bool>("SELECT true")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    /// Apply pending `./migrations/<version>_<name>.sql` files in version order.
    /// Files without a numeric prefix are ignored.
    pub async fn migrate(&self) -> Result<()> {
        Self::run_migrations(&self.pool).await
    }

    async fn run_migrations(pool: &PgPool) -> Result<()> {
        use std::collections::HashSet;
        use std::{fs, path::Path};

        let dir = Path::new("./migrations");
        if !dir.exists() {
            return Ok(());
        }
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _eventpilot_migrations (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now()
             )",
        )
        .execute(pool)
        .await?;

        let applied_rows = sqlx::raw_sql("SELECT version FROM _eventpilot_migrations")
            .fetch_all(pool)
            .await?;
        let mut applied: HashSet<i64> = HashSet::new();
        for r in applied_rows {
            applied.insert(r.try_get::<i64, _>(0)?);
        }

        let mut candidates: Vec<(i64, String, std::path::PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some((version, desc)) = parse_migration_name(fname) {
                candidates.push((version, desc, path));
            }
        }
        candidates.sort_by_key(|(v, _, _)| *v);

        for (version, desc, path) in candidates {
            if applied.contains(&version) {
                continue;
            }
            let sql = fs::read_to_string(&path)?;
            info!(version, file = ?path, "applying migration");

            let mut tx = pool.begin().await?;
            sqlx::raw_sql(&sql).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO _eventpilot_migrations(version, description) VALUES ($1, $2)")
                .bind(version)
                .bind(&desc)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            applied.insert(version);
        }
        info!(applied = applied.len(), "migrations up-to-date");
        Ok(())
    }
}

// pattern: digits '_' rest '.sql'
fn parse_migration_name(fname: &str) -> Option<(i64, String)> {
    let stem = fname.strip_suffix(".sql")?;
    let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let rest = stem[digits.len()..].strip_prefix('_')?;
    let version = digits.parse::<i64>().ok()?;
    Some((version, rest.to_string()))
}
