//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::str::FromStr;
use std::sync::Once;
use tracing::info;

static INIT: Once = Once::new();

/// Load .env exactly once.
/// Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Get required env var; error if missing.
pub fn env_req(key: &str) -> anyhow::Result<String> {
    init_env();
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing env var {key}"))
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        Err(_) => default,
    }
}

/// Composed database URL (tries specific -> generic). Returns first found.
pub fn db_url() -> anyhow::Result<String> {
    init_env();
    for k in ["DATABASE_URL", "DB_URL"] {
        if let Some(v) = env_opt(k) {
            return Ok(v);
        }
    }
    if let Some(dsn) = build_dsn_from_parts() {
        return Ok(dsn);
    }
    Err(anyhow::anyhow!("no database URL env vars set"))
}

// DB_HOST / DB_USERNAME / DB_PASSWORD / DB_DATABASE / DB_PORT / DB_SSLMODE
fn build_dsn_from_parts() -> Option<String> {
    let host = env_opt("DB_HOST")?;
    let user = env_opt("DB_USERNAME")?;
    let password = env_opt("DB_PASSWORD");
    let database = env_opt("DB_DATABASE").unwrap_or_else(|| "postgres".into());
    let port: u16 = env_parse("DB_PORT", 5432u16);
    let ssl_mode = env_opt("DB_SSLMODE").unwrap_or_else(|| "prefer".into());
    dsn_from_parts(&host, &user, password.as_deref(), &database, port, &ssl_mode)
}

fn dsn_from_parts(
    host: &str,
    user: &str,
    password: Option<&str>,
    database: &str,
    port: u16,
    ssl_mode: &str,
) -> Option<String> {
    let mut out = url::Url::parse("postgresql://localhost").ok()?;
    out.set_username(user).ok()?;
    if let Some(pass) = password {
        out.set_password(Some(pass)).ok()?;
    }

    let host_trimmed = host.trim().trim_matches(|c| c == '[' || c == ']');
    if host_trimmed.contains(':') {
        out.set_host(Some(&format!("[{host_trimmed}]"))).ok()?;
    } else {
        out.set_host(Some(host_trimmed)).ok()?;
    }
    out.set_port(Some(port)).ok()?;
    out.set_path(&format!("/{database}"));

    if ssl_mode != "disable" {
        out.query_pairs_mut().append_pair("sslmode", ssl_mode);
    }
    Some(out.to_string())
}

fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    if k.contains("PASSWORD") || k.contains("SECRET") || k.contains("KEY") || k.contains("TOKEN")
    {
        return "***".to_string();
    }

    let val_trim = val.trim();

    // Always redact postgres DSNs even if the key isn't obviously sensitive.
    if val_trim.starts_with("postgres://") || val_trim.starts_with("postgresql://") {
        if let Some(proto) = val_trim.find("//") {
            if let Some(at) = val_trim[proto + 2..].find('@') {
                let host_part = &val_trim[proto + 2 + at + 1..];
                return format!("{}***@{}", &val_trim[..proto + 2], host_part);
            }
        }
        return "postgres://***".to_string();
    }

    val_trim.to_string()
}

/// Validate required keys and log a consolidated, redacted snapshot of configuration.
/// Returns error if any required key is missing.
pub fn preflight_check(title: &str, required: &[&str], also_log: &[&str]) -> anyhow::Result<()> {
    init_env();
    let mut missing: Vec<&str> = Vec::new();
    for &k in required {
        if env_opt(k).is_none() {
            missing.push(k);
        }
    }
    let mut snapshot: Vec<(String, String)> = Vec::new();
    for &k in also_log {
        let v = env_opt(k).unwrap_or_default();
        snapshot.push((k.to_string(), redact_value(k, &v)));
    }
    info!(target = "preflight", title, snapshot = ?snapshot, "configuration snapshot");
    if !missing.is_empty() {
        return Err(anyhow::anyhow!(format!(
            "missing required env: {:?}",
            missing
        )));
    }
    Ok(())
}
