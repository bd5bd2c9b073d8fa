//! Subscriber setup for the crate's `tracing` events.

use crate::config::LoggingConfig;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Installs a global `tracing` subscriber configured by `config`.
///
/// `RUST_LOG` takes precedence over `config.filter`. Returns `Ok(false)` if a
/// global subscriber was already installed, which leaves it in place.
///
/// # Errors
///
/// Returns the parse error if `config.filter` is not a valid directive.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, ParseError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)?,
    };
    let subscriber = Registry::default().with(env_filter);

    let installed = if config.json {
        let json_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(config.with_thread_names);
        tracing::subscriber::set_global_default(subscriber.with(json_layer)).is_ok()
    } else {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_thread_names(config.with_thread_names);
        tracing::subscriber::set_global_default(subscriber.with(fmt_layer)).is_ok()
    };
    Ok(installed)
}
