mod config;
mod error;
mod logging;
mod runtime;
pub mod services;

pub use error::AppError;

pub fn run() -> Result<(), AppError> {
    let config = config::AppConfig::from_env()?;

    logging::init(&config.log_filter)?;

    tracing::info!(
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        http_workers = config.http_workers,
        "application bootstrap initialized"
    );

    runtime::run(config)
}
