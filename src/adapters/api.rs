use actix_web::{HttpResponse, Responder, get, web};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::app::services::{EnergyService, ServiceError};
use crate::domain::error::EnergyError;
use crate::domain::models::{BuildingId, DeviceId};

#[derive(Clone)]
pub struct ApiState {
    pub energy: EnergyService,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

type QueryWindow = (Option<DateTime<Utc>>, Option<DateTime<Utc>>);

impl WindowQuery {
    fn parse(&self) -> Result<QueryWindow, HttpResponse> {
        Ok((
            parse_query_date("start_date", self.start_date.as_deref())?,
            parse_query_date("end_date", self.end_date.as_deref())?,
        ))
    }
}

/// Accepts RFC 3339 or `YYYY-MM-DD HH:MM:SS`, the latter read as UTC.
fn parse_query_date(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, HttpResponse> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|_| {
            HttpResponse::BadRequest().json(serde_json::json!({
                "error": format!("{name} is not a valid date: {raw}")
            }))
        })
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(device_energy_endpoint)
        .service(device_reports_endpoint)
        .service(device_charge_state_endpoint)
        .service(building_energy_endpoint)
        .service(building_storage_energy_endpoint);
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[get("/devices/{id}/energy")]
async fn device_energy_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
    query: web::Query<WindowQuery>,
) -> impl Responder {
    let (start, end) = match query.parse() {
        Ok(window) => window,
        Err(response) => return response,
    };
    let energy = state.energy.clone();
    let device_id = DeviceId(path.into_inner());

    match web::block(move || energy.compute_device_energy(device_id, start, end)).await {
        Ok(Ok(result)) => HttpResponse::Ok().json(result),
        Ok(Err(error)) => service_error_response(error),
        Err(error) => blocking_error_response(error),
    }
}

#[get("/devices/{id}/reports")]
async fn device_reports_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
    query: web::Query<WindowQuery>,
) -> impl Responder {
    let (start, end) = match query.parse() {
        Ok(window) => window,
        Err(response) => return response,
    };
    let energy = state.energy.clone();
    let device_id = DeviceId(path.into_inner());

    match web::block(move || energy.device_reports(device_id, start, end)).await {
        Ok(Ok(reports)) => HttpResponse::Ok().json(reports),
        Ok(Err(error)) => service_error_response(error),
        Err(error) => blocking_error_response(error),
    }
}

#[get("/devices/{id}/charge-state")]
async fn device_charge_state_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
) -> impl Responder {
    let energy = state.energy.clone();
    let device_id = DeviceId(path.into_inner());

    match web::block(move || energy.latest_charge_state(device_id)).await {
        Ok(Ok(Some(snapshot))) => HttpResponse::Ok().json(snapshot),
        Ok(Ok(None)) => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("device {device_id} has no charge state")
        })),
        Ok(Err(error)) => service_error_response(error),
        Err(error) => blocking_error_response(error),
    }
}

#[get("/buildings/{id}/energy")]
async fn building_energy_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
    query: web::Query<WindowQuery>,
) -> impl Responder {
    let (start, end) = match query.parse() {
        Ok(window) => window,
        Err(response) => return response,
    };
    let energy = state.energy.clone();
    let building_id = BuildingId(path.into_inner());

    match web::block(move || energy.compute_building_energy(building_id, start, end)).await {
        Ok(Ok(result)) => HttpResponse::Ok().json(result),
        Ok(Err(error)) => service_error_response(error),
        Err(error) => blocking_error_response(error),
    }
}

#[get("/buildings/{id}/energy-storage")]
async fn building_storage_energy_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
    query: web::Query<WindowQuery>,
) -> impl Responder {
    let (start, end) = match query.parse() {
        Ok(window) => window,
        Err(response) => return response,
    };
    let energy = state.energy.clone();
    let building_id = BuildingId(path.into_inner());

    match web::block(move || energy.compute_building_storage_energy(building_id, start, end)).await
    {
        Ok(Ok(result)) => HttpResponse::Ok().json(result),
        Ok(Err(error)) => service_error_response(error),
        Err(error) => blocking_error_response(error),
    }
}

fn blocking_error_response(error: actix_web::error::BlockingError) -> HttpResponse {
    HttpResponse::InternalServerError().json(serde_json::json!({
        "error": format!("energy request aborted: {error}")
    }))
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    let message = error.to_string();
    let body = serde_json::json!({ "error": message });

    match error {
        ServiceError::DeviceNotFound(_)
        | ServiceError::BuildingNotFound(_)
        | ServiceError::Energy(EnergyError::NoChargeState { .. }) => {
            HttpResponse::NotFound().json(body)
        }
        ServiceError::NotStorage(_) | ServiceError::Energy(EnergyError::InvalidWindow { .. }) => {
            HttpResponse::BadRequest().json(body)
        }
        ServiceError::Energy(EnergyError::PhysicalInvariant(_)) => {
            HttpResponse::UnprocessableEntity().json(body)
        }
        ServiceError::DbLockPoisoned
        | ServiceError::DeviceLockPoisoned(_)
        | ServiceError::Database(_)
        | ServiceError::Energy(EnergyError::UnsupportedDeviceKind { .. })
        | ServiceError::Energy(EnergyError::StoreUnavailable(_)) => {
            tracing::error!(error = %message, "energy request failed");
            HttpResponse::InternalServerError().json(body)
        }
    }
}
