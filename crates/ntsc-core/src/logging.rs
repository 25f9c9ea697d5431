use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::OrchestratorConfig;

const FALLBACK_FILTER: &str = "info";

/// Installs a fmt subscriber for the process. `filter` wins over `RUST_LOG`, which wins over
/// `info`; a `filter` that does not parse is reported and replaced by `info`. Returns false
/// when a global subscriber was already installed.
pub fn init_tracing(filter: Option<&str>) -> bool {
    let (env_filter, rejected) = select_filter(filter);

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok();

    if let Some(error) = rejected {
        tracing::warn!(
            filter = filter.unwrap_or_default(),
            error = %error,
            "ignoring invalid log filter; falling back to info"
        );
    }
    installed
}

pub fn init_tracing_from_config(config: &OrchestratorConfig) -> bool {
    init_tracing(config.log_filter.as_deref())
}

fn select_filter(filter: Option<&str>) -> (EnvFilter, Option<ParseError>) {
    match filter {
        Some(directives) => match EnvFilter::try_new(directives) {
            Ok(env_filter) => (env_filter, None),
            Err(error) => (EnvFilter::new(FALLBACK_FILTER), Some(error)),
        },
        None => (
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER)),
            None,
        ),
    }
}
