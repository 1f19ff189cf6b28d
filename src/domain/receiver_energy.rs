use serde::Serialize;

use crate::domain::interval::{Clipped, total_hours};
use crate::domain::models::{ActivityReport, ReceiverSpec};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReceiverEnergy {
    #[serde(rename = "energy_consumed")]
    pub energy_kwh: f64,
    pub hours_on: f64,
}

pub fn compute_receiver_energy(
    receiver: &ReceiverSpec,
    activity: &[Clipped<'_, ActivityReport>],
) -> ReceiverEnergy {
    let hours_on = total_hours(activity);

    ReceiverEnergy {
        energy_kwh: receiver.power_watts / 1000.0 * hours_on,
        hours_on,
    }
}
