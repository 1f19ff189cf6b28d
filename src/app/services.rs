use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;

use crate::adapters::db;
use crate::adapters::db::{DbError, NewActivityReport, NewStorageJobReport, NewWeatherReport};
use crate::domain::dispatch::{EnergyReport, compute_energy};
use crate::domain::error::EnergyError;
use crate::domain::interval::{Clipped, TimeWindow, Timespan, clip};
use crate::domain::models::{
    ActivityReport, Building, BuildingId, ChargeStateSnapshot, Device, DeviceId, DeviceSpec,
    KIND_STORAGE, NewChargeState, NewDevice, StorageJobReport, WeatherReport,
};
use crate::domain::ports::{ChargeLedger, ReportStore, StoreError};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("storage lock poisoned for device {0}")]
    DeviceLockPoisoned(DeviceId),
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),
    #[error("building {0} not found")]
    BuildingNotFound(BuildingId),
    #[error("device {0} is not a storage device")]
    NotStorage(DeviceId),
    #[error(transparent)]
    Energy(#[from] EnergyError),
}

/// Report store and charge ledger over one shared SQLite connection.
#[derive(Clone)]
pub struct SqliteEnergyStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteEnergyStore {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, ServiceError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        op(&connection).map_err(ServiceError::from)
    }

    fn with_store_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, StoreError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| StoreError::unavailable("database lock poisoned"))?;
        op(&connection).map_err(|error| match error {
            DbError::ChargeStateConflict {
                device_id,
                at,
                reason,
            } => StoreError::Conflict {
                device_id,
                at,
                reason,
            },
            other => StoreError::unavailable(other),
        })
    }
}

impl ReportStore for SqliteEnergyStore {
    fn activity_reports(
        &self,
        device_id: DeviceId,
        window: &TimeWindow,
    ) -> Result<Vec<ActivityReport>, StoreError> {
        self.with_store_connection(|connection| {
            db::list_activity_reports(connection, device_id, window)
        })
    }

    fn weather_reports(&self, window: &TimeWindow) -> Result<Vec<WeatherReport>, StoreError> {
        self.with_store_connection(|connection| db::list_weather_reports(connection, window))
    }

    fn storage_job_reports(
        &self,
        device_id: DeviceId,
        window: &TimeWindow,
    ) -> Result<Vec<StorageJobReport>, StoreError> {
        self.with_store_connection(|connection| {
            db::list_storage_job_reports(connection, device_id, window)
        })
    }
}

impl ChargeLedger for SqliteEnergyStore {
    fn latest_at_or_before(
        &self,
        device_id: DeviceId,
        at: DateTime<Utc>,
    ) -> Result<Option<ChargeStateSnapshot>, StoreError> {
        self.with_store_connection(|connection| {
            db::latest_charge_state_at_or_before(connection, device_id, at)
        })
    }

    fn latest(&self, device_id: DeviceId) -> Result<Option<ChargeStateSnapshot>, StoreError> {
        self.with_store_connection(|connection| db::latest_charge_state(connection, device_id))
    }

    fn append(&self, new_state: &NewChargeState) -> Result<ChargeStateSnapshot, StoreError> {
        self.with_store_connection(|connection| db::append_charge_state(connection, new_state))
    }
}

/// One exclusive lock per storage device, held across read-compute-append.
#[derive(Default)]
struct StorageLocks {
    locks: Mutex<HashMap<DeviceId, Arc<Mutex<()>>>>,
}

impl StorageLocks {
    fn handle(&self, device_id: DeviceId) -> Result<Arc<Mutex<()>>, ServiceError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| ServiceError::DeviceLockPoisoned(device_id))?;
        Ok(Arc::clone(locks.entry(device_id).or_default()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEnergy {
    pub device: Device,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub energy: EnergyReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildingEnergy {
    pub building: Building,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub total_energy_kwh: f64,
    pub devices: Vec<DeviceEnergy>,
}

/// A stored report together with its interval narrowed to the query window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClippedReport<T> {
    #[serde(flatten)]
    pub report: T,
    pub clipped_from: DateTime<Utc>,
    pub clipped_to: DateTime<Utc>,
}

impl<T: Clone> From<Clipped<'_, T>> for ClippedReport<T> {
    fn from(clipped: Clipped<'_, T>) -> Self {
        Self {
            report: clipped.record.clone(),
            clipped_from: clipped.start,
            clipped_to: clipped.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "report_type", content = "reports", rename_all = "snake_case")]
pub enum DeviceReports {
    Activity(Vec<ClippedReport<ActivityReport>>),
    StorageJobs(Vec<ClippedReport<StorageJobReport>>),
}

#[derive(Clone)]
pub struct EnergyService {
    store: SqliteEnergyStore,
    clock: Arc<dyn Clock + Send + Sync>,
    storage_locks: Arc<StorageLocks>,
}

impl EnergyService {
    pub fn new(connection: Arc<Mutex<Connection>>, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            store: SqliteEnergyStore::new(connection),
            clock,
            storage_locks: Arc::new(StorageLocks::default()),
        }
    }

    /// Resolves the query window once per request. A missing end means now,
    /// a missing start means the beginning of recorded history.
    ///
    /// Both bounds are truncated to the millisecond precision of stored
    /// timestamps, so a settlement reference always equals its persisted date.
    pub fn resolve_window(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<TimeWindow, ServiceError> {
        let end = end.unwrap_or_else(|| self.clock.now()).trunc_subsecs(3);
        let start = start
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
            .trunc_subsecs(3);
        Ok(TimeWindow::new(start, end)?)
    }

    fn load_device(&self, device_id: DeviceId) -> Result<Device, ServiceError> {
        let record = self
            .store
            .with_connection(|connection| db::get_device(connection, device_id))?
            .ok_or(ServiceError::DeviceNotFound(device_id))?;
        Ok(Device::try_from(record)?)
    }

    fn load_building(&self, building_id: BuildingId) -> Result<Building, ServiceError> {
        self.store
            .with_connection(|connection| db::get_building(connection, building_id))?
            .ok_or(ServiceError::BuildingNotFound(building_id))
    }

    /// Devices of a building whose stored kind passes `include`. Rows of other
    /// kinds are never decoded.
    fn building_devices(
        &self,
        building_id: BuildingId,
        include: impl Fn(&str) -> bool,
    ) -> Result<Vec<Device>, ServiceError> {
        let records = self
            .store
            .with_connection(|connection| db::list_building_devices(connection, building_id))?;
        records
            .into_iter()
            .filter(|record| include(&record.kind))
            .map(|record| Device::try_from(record).map_err(ServiceError::from))
            .collect()
    }

    /// Runs the calculator for one device. For storage devices this is a
    /// command: it settles the charge at the window end and may append a
    /// snapshot, under the device's exclusive lock.
    fn energy_for(
        &self,
        device: Device,
        window: &TimeWindow,
    ) -> Result<DeviceEnergy, ServiceError> {
        let energy = if matches!(device.spec, DeviceSpec::Storage(_)) {
            let handle = self.storage_locks.handle(device.id)?;
            let _guard = handle
                .lock()
                .map_err(|_| ServiceError::DeviceLockPoisoned(device.id))?;
            compute_energy(&self.store, &device, window)
        } else {
            compute_energy(&self.store, &device, window)
        };

        let energy = energy.inspect_err(|error| {
            tracing::warn!(
                device_id = %device.id,
                window = ?window,
                error = %error,
                "device energy calculation rejected"
            );
        })?;

        Ok(DeviceEnergy {
            device,
            window_start: window.start(),
            window_end: window.end(),
            energy,
        })
    }

    pub fn compute_device_energy(
        &self,
        device_id: DeviceId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<DeviceEnergy, ServiceError> {
        let window = self.resolve_window(start, end)?;
        let device = self.load_device(device_id)?;
        self.energy_for(device, &window)
    }

    /// Consumption and generation of every non-storage device in a building.
    pub fn compute_building_energy(
        &self,
        building_id: BuildingId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<BuildingEnergy, ServiceError> {
        self.building_energy(building_id, start, end, |kind| kind != KIND_STORAGE)
    }

    /// Settles every storage device of a building at the window end.
    pub fn compute_building_storage_energy(
        &self,
        building_id: BuildingId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<BuildingEnergy, ServiceError> {
        self.building_energy(building_id, start, end, |kind| kind == KIND_STORAGE)
    }

    fn building_energy(
        &self,
        building_id: BuildingId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        include: impl Fn(&str) -> bool,
    ) -> Result<BuildingEnergy, ServiceError> {
        let window = self.resolve_window(start, end)?;
        let building = self.load_building(building_id)?;

        let devices = self
            .building_devices(building_id, include)?
            .into_iter()
            .map(|device| self.energy_for(device, &window))
            .collect::<Result<Vec<_>, _>>()?;
        let total_energy_kwh = devices.iter().map(|device| device.energy.energy_kwh()).sum();

        Ok(BuildingEnergy {
            building,
            window_start: window.start(),
            window_end: window.end(),
            total_energy_kwh,
            devices,
        })
    }

    pub fn latest_charge_state(
        &self,
        device_id: DeviceId,
    ) -> Result<Option<ChargeStateSnapshot>, ServiceError> {
        let device = self.load_device(device_id)?;
        if !matches!(device.spec, DeviceSpec::Storage(_)) {
            return Err(ServiceError::NotStorage(device_id));
        }
        Ok(self
            .store
            .latest(device_id)
            .map_err(EnergyError::from)?)
    }

    /// Reports of a device narrowed to the window: job reports for storage
    /// devices, activity reports otherwise.
    pub fn device_reports(
        &self,
        device_id: DeviceId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<DeviceReports, ServiceError> {
        let window = self.resolve_window(start, end)?;
        let device = self.load_device(device_id)?;

        let reports = match device.spec {
            DeviceSpec::Storage(_) => {
                let jobs = self
                    .store
                    .storage_job_reports(device_id, &window)
                    .map_err(EnergyError::from)?;
                DeviceReports::StorageJobs(clipped_reports(&jobs, &window))
            }
            DeviceSpec::Receiver(_) | DeviceSpec::Generator(_) => {
                let activity = self
                    .store
                    .activity_reports(device_id, &window)
                    .map_err(EnergyError::from)?;
                DeviceReports::Activity(clipped_reports(&activity, &window))
            }
        };

        Ok(reports)
    }

    pub fn register_building(&self, name: &str) -> Result<BuildingId, ServiceError> {
        self.store
            .with_connection(|connection| db::insert_building(connection, name))
    }

    pub fn register_device(&self, new_device: &NewDevice) -> Result<DeviceId, ServiceError> {
        let device_id = self
            .store
            .with_connection(|connection| db::insert_device(connection, new_device))?;
        tracing::info!(
            device_id = %device_id,
            building_id = %new_device.building_id,
            kind = new_device.spec.kind(),
            "device registered"
        );
        Ok(device_id)
    }

    pub fn record_activity(&self, report: &NewActivityReport) -> Result<i64, ServiceError> {
        self.store
            .with_connection(|connection| db::insert_activity_report(connection, report))
    }

    pub fn record_weather(&self, report: &NewWeatherReport) -> Result<i64, ServiceError> {
        self.store
            .with_connection(|connection| db::insert_weather_report(connection, report))
    }

    pub fn record_storage_job(&self, report: &NewStorageJobReport) -> Result<i64, ServiceError> {
        self.store
            .with_connection(|connection| db::insert_storage_job_report(connection, report))
    }
}

fn clipped_reports<T: Timespan + Clone>(
    records: &[T],
    window: &TimeWindow,
) -> Vec<ClippedReport<T>> {
    clip(records, window).into_iter().map(ClippedReport::from).collect()
}
