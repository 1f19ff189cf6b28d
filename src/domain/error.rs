use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::models::DeviceId;
use crate::domain::ports::StoreError;

/// Physical-model violations. These always indicate bad upstream data and are
/// never clamped.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum PhysicalViolation {
    #[error(
        "output power out of physical range: device {device_id} produced {output_watts} W from solar radiation {solar_radiation} W/m², allowed [0, {nameplate_watts}] W"
    )]
    OutputPowerOutOfRange {
        device_id: DeviceId,
        solar_radiation: f64,
        output_watts: f64,
        nameplate_watts: f64,
    },
    #[error(
        "accumulated energy exceeds storage capacity: device {device_id} would hold {charge_kwh} kWh at {at}, capacity is {capacity_kwh} kWh"
    )]
    ChargeAboveCapacity {
        device_id: DeviceId,
        at: DateTime<Utc>,
        charge_kwh: f64,
        capacity_kwh: f64,
    },
    #[error(
        "accumulated energy below zero: device {device_id} would hold {charge_kwh} kWh at {at}"
    )]
    ChargeBelowZero {
        device_id: DeviceId,
        at: DateTime<Utc>,
        charge_kwh: f64,
    },
}

#[derive(Debug, Error)]
pub enum EnergyError {
    #[error(transparent)]
    PhysicalInvariant(#[from] PhysicalViolation),
    #[error("no storage data at requested time: device {device_id} has no charge state at or before {at}")]
    NoChargeState {
        device_id: DeviceId,
        at: DateTime<Utc>,
    },
    #[error("unsupported device kind `{kind}` for device {device_id}")]
    UnsupportedDeviceKind { device_id: DeviceId, kind: String },
    #[error("invalid query window: start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::domain::models::DeviceId;

    use super::{EnergyError, PhysicalViolation};

    #[test]
    fn physical_violation_message_names_device_and_value() {
        let err = EnergyError::from(PhysicalViolation::ChargeAboveCapacity {
            device_id: DeviceId(7),
            at: Utc.with_ymd_and_hms(2022, 3, 30, 12, 0, 0).unwrap(),
            charge_kwh: 201.5,
            capacity_kwh: 200.0,
        });

        assert_eq!(
            err.to_string(),
            "accumulated energy exceeds storage capacity: device 7 would hold 201.5 kWh at 2022-03-30 12:00:00 UTC, capacity is 200 kWh"
        );
    }

    #[test]
    fn missing_charge_state_maps_to_storage_message() {
        let err = EnergyError::NoChargeState {
            device_id: DeviceId(2),
            at: Utc.with_ymd_and_hms(2022, 5, 14, 0, 0, 0).unwrap(),
        };

        assert_eq!(
            err.to_string(),
            "no storage data at requested time: device 2 has no charge state at or before 2022-05-14 00:00:00 UTC"
        );
    }
}
