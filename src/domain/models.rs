use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::error::EnergyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DeviceId(pub i64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct BuildingId(pub i64);

impl fmt::Display for BuildingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Building {
    pub id: BuildingId,
    pub name: String,
}

/// A load drawing `power_watts` whenever it is switched on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReceiverSpec {
    pub power_watts: f64,
    pub supply_voltage: f64,
}

/// A photovoltaic installation with its nameplate output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeneratorSpec {
    pub generation_power_watts: f64,
}

/// A battery. `capacity_kwh` bounds every charge snapshot ever recorded for it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StorageSpec {
    pub capacity_kwh: f64,
    pub battery_voltage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceSpec {
    Receiver(ReceiverSpec),
    Generator(GeneratorSpec),
    Storage(StorageSpec),
}

impl DeviceSpec {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Receiver(_) => KIND_RECEIVER,
            Self::Generator(_) => KIND_GENERATOR,
            Self::Storage(_) => KIND_STORAGE,
        }
    }
}

pub const KIND_RECEIVER: &str = "receiver";
pub const KIND_GENERATOR: &str = "generator";
pub const KIND_STORAGE: &str = "storage";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: DeviceId,
    pub building_id: BuildingId,
    pub name: String,
    #[serde(flatten)]
    pub spec: DeviceSpec,
}

/// A device row as persisted. The kind is kept as text so that rows written by
/// other tools survive loading and are rejected only when a calculation needs them.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub building_id: BuildingId,
    pub name: String,
    pub kind: String,
    pub power_watts: Option<f64>,
    pub supply_voltage: Option<f64>,
    pub generation_power_watts: Option<f64>,
    pub capacity_kwh: Option<f64>,
    pub battery_voltage: Option<f64>,
}

impl TryFrom<DeviceRecord> for Device {
    type Error = EnergyError;

    fn try_from(record: DeviceRecord) -> Result<Self, Self::Error> {
        let unsupported = || EnergyError::UnsupportedDeviceKind {
            device_id: record.id,
            kind: record.kind.clone(),
        };

        let spec = match record.kind.as_str() {
            KIND_RECEIVER => DeviceSpec::Receiver(ReceiverSpec {
                power_watts: record.power_watts.ok_or_else(unsupported)?,
                supply_voltage: record.supply_voltage.unwrap_or_default(),
            }),
            KIND_GENERATOR => DeviceSpec::Generator(GeneratorSpec {
                generation_power_watts: record.generation_power_watts.ok_or_else(unsupported)?,
            }),
            KIND_STORAGE => DeviceSpec::Storage(StorageSpec {
                capacity_kwh: record.capacity_kwh.ok_or_else(unsupported)?,
                battery_voltage: record.battery_voltage.ok_or_else(unsupported)?,
            }),
            _ => return Err(unsupported()),
        };

        Ok(Self {
            id: record.id,
            building_id: record.building_id,
            name: record.name,
            spec,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDevice {
    pub building_id: BuildingId,
    pub name: String,
    pub spec: DeviceSpec,
    pub created_at: DateTime<Utc>,
}

/// One on/off cycle of a device. `turned_off == None` means still on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityReport {
    pub id: i64,
    pub device_id: DeviceId,
    pub turned_on: DateTime<Utc>,
    pub turned_off: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    pub id: i64,
    pub datetime_from: DateTime<Utc>,
    pub datetime_to: Option<DateTime<Utc>>,
    /// W/m².
    pub solar_radiation: f64,
    pub temperature: Option<f64>,
    pub wind_speed: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "job_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageJob {
    Charging,
    Usage {
        receiver_id: DeviceId,
        receiver_power_watts: f64,
    },
}

pub const JOB_CODE_CHARGING: &str = "CH";
pub const JOB_CODE_USAGE: &str = "US";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageJobReport {
    pub id: i64,
    pub device_id: DeviceId,
    pub date_time_from: DateTime<Utc>,
    pub date_time_to: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub job: StorageJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChargeStateSnapshot {
    pub id: i64,
    pub device_id: DeviceId,
    pub date: DateTime<Utc>,
    pub charge_value_kwh: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewChargeState {
    pub device_id: DeviceId,
    pub date: DateTime<Utc>,
    pub charge_value_kwh: f64,
}
