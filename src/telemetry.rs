use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Engine and provider sync at info, sqlx statement logs muted.
pub const DEFAULT_FILTER: &str = "info,eventpilot::registration=info,eventpilot::payments=info,sqlx=warn,actix_web=info";

/// `RUST_LOG` when it parses, `default_filter` otherwise. Returns the
/// rejected directive so it can be reported once logging is up.
fn builder_filter(rust_log: Option<&str>, default_filter: &str) -> (EnvFilter, Option<String>) {
    match rust_log.map(str::trim).filter(|v| !v.is_empty()) {
        Some(directives) => match EnvFilter::try_new(directives) {
            Ok(filter) => (filter, None),
            Err(_) => (EnvFilter::new(default_filter), Some(directives.to_string())),
        },
        None => (EnvFilter::new(default_filter), None),
    }
}

/// Installs the global subscriber for the CLI and the API server.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let (filter, rejected) = builder_filter(rust_log.as_deref(), default_filter);

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    if let Some(directives) = rejected {
        tracing::warn!(rust_log = %directives, fallback = default_filter, "ignoring unparseable RUST_LOG");
    }
    Ok(())
}
