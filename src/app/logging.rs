use tracing_subscriber::{EnvFilter, fmt};

use crate::app::AppError;

/// `RUST_LOG` takes precedence over the configured filter.
pub fn init(default_filter: &str) -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(AppError::logging_init)?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(AppError::logging_init)
}
