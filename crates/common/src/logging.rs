use crate::config::Environment;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber: pretty output for development,
/// JSON lines for production.
///
/// Uses RUST_LOG for filtering (defaults to "info" if not set). Calling it twice
/// is harmless; the second subscriber is ignored.
pub fn setup_logging(environment: Environment) {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match environment {
        Environment::Production => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_level(true)
                    .with_current_span(true),
            )
            .try_init(),
        Environment::Development => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_thread_names(true),
            )
            .try_init(),
    };

    if let Err(e) = result {
        tracing::debug!("tracing subscriber already installed: {}", e);
    }
}
