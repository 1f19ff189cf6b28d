use std::sync::{Arc, Mutex};

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use chrono::{DateTime, Utc};

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::db::{open_connection, run_migrations, schema_version};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::services::{Clock, EnergyService};

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    if let Some(parent) = std::path::Path::new(&config.db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(AppError::database_init)?;
    }

    let mut connection = open_connection(&config.db_path).map_err(AppError::database_init)?;
    run_migrations(&mut connection).map_err(AppError::database_init)?;
    let version = schema_version(&connection).map_err(AppError::database_init)?;
    tracing::info!(db_path = %config.db_path, schema_version = version, "database ready");

    let api_state = ApiState {
        energy: EnergyService::new(Arc::new(Mutex::new(connection)), Arc::new(SystemClock)),
    };

    tracing::info!(bind = %config.http_bind, workers = config.http_workers, "http server starting");

    actix_web::rt::System::new()
        .block_on(async move {
            HttpServer::new(move || {
                App::new()
                    .wrap(Cors::permissive())
                    .app_data(web::Data::new(api_state.clone()))
                    .configure(configure_routes)
            })
            .workers(config.http_workers)
            .bind(&config.http_bind)?
            .run()
            .await
        })
        .map_err(AppError::runtime)
}
