use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::interval::TimeWindow;
use crate::domain::models::{
    ActivityReport, ChargeStateSnapshot, DeviceId, NewChargeState, StorageJobReport,
    WeatherReport,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Unavailable(String),
    #[error("charge state conflict for device {device_id} at {at}: {reason}")]
    Conflict {
        device_id: DeviceId,
        at: DateTime<Utc>,
        reason: String,
    },
}

impl StoreError {
    pub fn unavailable<E: std::fmt::Display>(error: E) -> Self {
        Self::Unavailable(error.to_string())
    }
}

/// Historical records, returned unclipped. Implementations return every record
/// satisfying the window selection predicate, ordered by start ascending.
pub trait ReportStore {
    fn activity_reports(
        &self,
        device_id: DeviceId,
        window: &TimeWindow,
    ) -> Result<Vec<ActivityReport>, StoreError>;

    fn weather_reports(&self, window: &TimeWindow) -> Result<Vec<WeatherReport>, StoreError>;

    fn storage_job_reports(
        &self,
        device_id: DeviceId,
        window: &TimeWindow,
    ) -> Result<Vec<StorageJobReport>, StoreError>;
}

/// Append-only charge snapshots of storage devices.
pub trait ChargeLedger {
    fn latest_at_or_before(
        &self,
        device_id: DeviceId,
        at: DateTime<Utc>,
    ) -> Result<Option<ChargeStateSnapshot>, StoreError>;

    fn latest(&self, device_id: DeviceId) -> Result<Option<ChargeStateSnapshot>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when `(device, date)` exists or when
    /// the date is not after the device's latest snapshot.
    fn append(&self, new_state: &NewChargeState) -> Result<ChargeStateSnapshot, StoreError>;
}
