use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Build the level filter: `RUST_LOG` wins, otherwise the configured level.
fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
    }
}

/// Initialize tracing from the logging section of the configuration
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    init_tracing_with_config(&config.level, config.json)
}

/// Initialize tracing with JSON (production) or pretty (development) output
pub fn init_tracing_with_config(level: &str, json_format: bool) -> Result<()> {
    let env_filter = env_filter(level)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let result = if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
    };
    result.wrap_err("A global tracing subscriber is already installed")?;

    tracing::info!(
        "relaygate logging initialized (level: {}, json: {})",
        level,
        json_format
    );
    Ok(())
}

/// Span wrapping every task of one relay session
pub fn create_session_span(app_id: &str, session_id: &str, upstream_url: &str) -> tracing::Span {
    tracing::info_span!(
        "relay_session",
        app.id = app_id,
        session.id = session_id,
        upstream.url = upstream_url,
    )
}
