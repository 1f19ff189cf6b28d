use serde::Serialize;

use crate::domain::error::EnergyError;
use crate::domain::generator_energy::{GeneratorEnergy, compute_generator_energy};
use crate::domain::interval::{TimeWindow, clip};
use crate::domain::models::{Device, DeviceSpec};
use crate::domain::ports::{ChargeLedger, ReportStore};
use crate::domain::receiver_energy::{ReceiverEnergy, compute_receiver_energy};
use crate::domain::storage_energy::{StorageEnergy, settle_storage_energy};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnergyReport {
    Receiver(ReceiverEnergy),
    Generator(GeneratorEnergy),
    Storage(StorageEnergy),
}

impl EnergyReport {
    pub fn energy_kwh(&self) -> f64 {
        match self {
            Self::Receiver(energy) => energy.energy_kwh,
            Self::Generator(energy) => energy.energy_kwh,
            Self::Storage(energy) => energy.energy_kwh,
        }
    }
}

/// Runs the calculator matching the device kind over `window`.
///
/// Storage devices settle their charge at `window.end()`, which may append to
/// the ledger; see [`settle_storage_energy`].
pub fn compute_energy<S>(
    store: &S,
    device: &Device,
    window: &TimeWindow,
) -> Result<EnergyReport, EnergyError>
where
    S: ReportStore + ChargeLedger + ?Sized,
{
    let report = match &device.spec {
        DeviceSpec::Receiver(receiver) => {
            let activity = store.activity_reports(device.id, window)?;
            EnergyReport::Receiver(compute_receiver_energy(receiver, &clip(&activity, window)))
        }
        DeviceSpec::Generator(generator) => {
            let weather = store.weather_reports(window)?;
            EnergyReport::Generator(compute_generator_energy(
                device.id,
                generator,
                &clip(&weather, window),
            )?)
        }
        DeviceSpec::Storage(storage) => {
            let jobs = store.storage_job_reports(device.id, window)?;
            EnergyReport::Storage(settle_storage_energy(
                store,
                device.id,
                storage,
                &clip(&jobs, window),
                window.end(),
            )?)
        }
    };

    tracing::debug!(
        device_id = %device.id,
        kind = device.spec.kind(),
        window = ?window,
        energy_kwh = report.energy_kwh(),
        "device energy computed"
    );

    Ok(report)
}
