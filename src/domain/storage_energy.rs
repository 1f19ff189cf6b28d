use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::error::{EnergyError, PhysicalViolation};
use crate::domain::interval::Clipped;
use crate::domain::models::{
    ChargeStateSnapshot, DeviceId, NewChargeState, StorageJob, StorageJobReport, StorageSpec,
};
use crate::domain::ports::ChargeLedger;

/// Charging current as a share of rated capacity.
pub const CHARGING_CURRENT_FACTOR: f64 = 0.10;
/// Applied once to the final charge of a settlement.
pub const CHARGING_LOSS_FACTOR: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageEnergy {
    #[serde(rename = "energy_stored")]
    pub energy_kwh: f64,
    pub previous_charge_kwh: f64,
    pub previous_charge_at: DateTime<Utc>,
    pub jobs_processed: usize,
    /// Snapshot appended by this settlement, if any.
    pub appended: Option<ChargeStateSnapshot>,
}

/// Replays job reports on top of `starting_charge_kwh`. Jobs run in
/// `date_time_from` order and the loss factor is applied once at the end.
pub fn replay_storage_jobs(
    device_id: DeviceId,
    storage: &StorageSpec,
    starting_charge_kwh: f64,
    jobs: &[Clipped<'_, StorageJobReport>],
) -> Result<f64, PhysicalViolation> {
    let mut ordered: Vec<&Clipped<'_, StorageJobReport>> = jobs.iter().collect();
    ordered.sort_by_key(|job| job.record.date_time_from);

    let charging_current = CHARGING_CURRENT_FACTOR * storage.capacity_kwh;
    let mut charge_kwh = starting_charge_kwh;

    for job in ordered {
        let hours = job.hours();
        match job.record.job {
            StorageJob::Charging => {
                charge_kwh += charging_current * storage.battery_voltage * hours / 1000.0;
                if charge_kwh > storage.capacity_kwh {
                    return Err(PhysicalViolation::ChargeAboveCapacity {
                        device_id,
                        at: job.end,
                        charge_kwh,
                        capacity_kwh: storage.capacity_kwh,
                    });
                }
            }
            StorageJob::Usage {
                receiver_power_watts,
                ..
            } => {
                charge_kwh -= receiver_power_watts * hours / 1000.0;
                if charge_kwh < 0.0 {
                    return Err(PhysicalViolation::ChargeBelowZero {
                        device_id,
                        at: job.end,
                        charge_kwh,
                    });
                }
            }
        }
    }

    Ok(charge_kwh * (1.0 - CHARGING_LOSS_FACTOR))
}

/// Settles the charge of a storage device at `reference`.
///
/// Reads the latest snapshot at or before `reference`, replays the job reports
/// and appends at most one new snapshot dated `reference`. Nothing is appended
/// when no job had a non-empty clipped interval, when a snapshot already exists
/// at `reference`, or when the ledger already holds a later snapshot.
///
/// Callers must hold the device's exclusive lock for the whole call.
pub fn settle_storage_energy<L>(
    ledger: &L,
    device_id: DeviceId,
    storage: &StorageSpec,
    jobs: &[Clipped<'_, StorageJobReport>],
    reference: DateTime<Utc>,
) -> Result<StorageEnergy, EnergyError>
where
    L: ChargeLedger + ?Sized,
{
    let last = ledger
        .latest_at_or_before(device_id, reference)?
        .ok_or(EnergyError::NoChargeState {
            device_id,
            at: reference,
        })?;

    let unchanged = |jobs_processed| StorageEnergy {
        energy_kwh: last.charge_value_kwh,
        previous_charge_kwh: last.charge_value_kwh,
        previous_charge_at: last.date,
        jobs_processed,
        appended: None,
    };

    if last.date == reference {
        return Ok(unchanged(0));
    }

    let active: Vec<Clipped<'_, StorageJobReport>> = jobs
        .iter()
        .filter(|job| job.end > job.start)
        .map(|job| Clipped {
            record: job.record,
            start: job.start,
            end: job.end,
        })
        .collect();

    if active.is_empty() {
        return Ok(unchanged(0));
    }

    let charge_kwh = replay_storage_jobs(device_id, storage, last.charge_value_kwh, &active)?;

    let newer_exists = ledger
        .latest(device_id)?
        .is_some_and(|latest| latest.date > reference);

    let appended = if newer_exists {
        tracing::debug!(
            device_id = %device_id,
            reference = %reference,
            "ledger holds a later snapshot, settlement not persisted"
        );
        None
    } else {
        let snapshot = ledger.append(&NewChargeState {
            device_id,
            date: reference,
            charge_value_kwh: charge_kwh,
        })?;
        tracing::info!(
            device_id = %device_id,
            date = %snapshot.date,
            charge_kwh = snapshot.charge_value_kwh,
            "charge state appended"
        );
        Some(snapshot)
    };

    Ok(StorageEnergy {
        energy_kwh: charge_kwh,
        previous_charge_kwh: last.charge_value_kwh,
        previous_charge_at: last.date,
        jobs_processed: active.len(),
        appended,
    })
}
