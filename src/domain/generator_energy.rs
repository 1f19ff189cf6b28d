use serde::Serialize;

use crate::domain::error::PhysicalViolation;
use crate::domain::interval::Clipped;
use crate::domain::models::{DeviceId, GeneratorSpec, WeatherReport};

/// Solar radiation domain in W/m², mapped linearly onto a `[0, 1]` coefficient.
const MIN_SOLAR_RADIATION: f64 = 0.0;
const MAX_SOLAR_RADIATION: f64 = 1000.0;
const COEFFICIENT_MIN: f64 = 0.0;
const COEFFICIENT_MAX: f64 = 1.0;

pub const WEATHER_LOSS_FACTOR: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeneratorEnergy {
    #[serde(rename = "energy_generated")]
    pub energy_kwh: f64,
    pub hours: f64,
}

pub fn radiation_coefficient(solar_radiation: f64) -> f64 {
    (solar_radiation - MIN_SOLAR_RADIATION) / (MAX_SOLAR_RADIATION - MIN_SOLAR_RADIATION)
        * (COEFFICIENT_MAX - COEFFICIENT_MIN)
        + COEFFICIENT_MIN
}

/// Photovoltaic output in watts for one weather report. Values outside
/// `[0, nameplate]` are rejected, not clamped.
pub fn photovoltaic_output_watts(
    device_id: DeviceId,
    generator: &GeneratorSpec,
    solar_radiation: f64,
) -> Result<f64, PhysicalViolation> {
    let output_watts = generator.generation_power_watts
        * radiation_coefficient(solar_radiation)
        * (1.0 - WEATHER_LOSS_FACTOR);

    if !(0.0..=generator.generation_power_watts).contains(&output_watts) {
        return Err(PhysicalViolation::OutputPowerOutOfRange {
            device_id,
            solar_radiation,
            output_watts,
            nameplate_watts: generator.generation_power_watts,
        });
    }

    Ok(output_watts)
}

pub fn compute_generator_energy(
    device_id: DeviceId,
    generator: &GeneratorSpec,
    weather: &[Clipped<'_, WeatherReport>],
) -> Result<GeneratorEnergy, PhysicalViolation> {
    let mut energy = GeneratorEnergy {
        energy_kwh: 0.0,
        hours: 0.0,
    };

    for report in weather {
        let hours = report.hours();
        let output_watts =
            photovoltaic_output_watts(device_id, generator, report.record.solar_radiation)?;
        energy.hours += hours;
        energy.energy_kwh += output_watts / 1000.0 * hours;
    }

    Ok(energy)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use crate::domain::error::PhysicalViolation;
    use crate::domain::interval::{TimeWindow, clip};
    use crate::domain::models::{DeviceId, GeneratorSpec, WeatherReport};

    use super::{compute_generator_energy, photovoltaic_output_watts, radiation_coefficient};

    const PANEL: GeneratorSpec = GeneratorSpec {
        generation_power_watts: 635.0,
    };

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 3, 30, hour, minute, 0).unwrap()
    }

    fn weather(
        from: DateTime<Utc>,
        to: Option<DateTime<Utc>>,
        solar_radiation: f64,
    ) -> WeatherReport {
        WeatherReport {
            id: 0,
            datetime_from: from,
            datetime_to: to,
            solar_radiation,
            temperature: Some(10.5),
            wind_speed: Some(5.8),
        }
    }

    fn generated(records: &[WeatherReport], start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
        let window = TimeWindow::new(start, end).expect("window should be valid");
        compute_generator_energy(DeviceId(1), &PANEL, &clip(records, &window))
            .expect("weather data is in range")
            .energy_kwh
    }

    #[test]
    fn rescales_radiation_linearly() {
        assert!((radiation_coefficient(340.0) - 0.34).abs() < 1e-12);
        assert_eq!(radiation_coefficient(0.0), 0.0);
        assert_eq!(radiation_coefficient(1000.0), 1.0);
    }

    #[test]
    fn single_half_hour_report() {
        let records = [weather(at(10, 30), Some(at(11, 0)), 340.0)];
        let window = TimeWindow::new(at(10, 30), at(11, 0)).expect("window should be valid");

        let energy = compute_generator_energy(DeviceId(1), &PANEL, &clip(&records, &window))
            .expect("weather data is in range");

        // 635 W * 0.34 * 0.95 = 205.105 W over half an hour.
        assert!((energy.energy_kwh - 0.102_552_5).abs() < 1e-6);
        assert!((energy.hours - 0.5).abs() < 1e-12);
    }

    #[test]
    fn sums_clipped_reports_including_open_one() {
        let records = [
            weather(at(10, 30), Some(at(11, 0)), 340.0),
            weather(at(11, 0), Some(at(12, 0)), 360.0),
            weather(at(12, 0), Some(at(12, 15)), 410.0),
            weather(at(12, 15), None, 312.0),
        ];

        assert!((generated(&records, at(8, 0), at(12, 30)) - 0.428_609_125).abs() < 1e-6);
        assert!((generated(&records, at(11, 30), at(12, 30)) - 0.217_471_625).abs() < 1e-6);
    }

    #[test]
    fn rejects_radiation_above_domain() {
        let error = photovoltaic_output_watts(DeviceId(4), &PANEL, 1200.0)
            .expect_err("output exceeds nameplate");

        assert!(matches!(
            error,
            PhysicalViolation::OutputPowerOutOfRange { device_id: DeviceId(4), nameplate_watts, .. }
                if nameplate_watts == 635.0
        ));
    }

    #[test]
    fn rejects_negative_radiation_inside_window() {
        let records = [
            weather(at(10, 0), Some(at(11, 0)), 200.0),
            weather(at(11, 0), Some(at(12, 0)), -15.0),
        ];
        let window = TimeWindow::new(at(10, 0), at(12, 0)).expect("window should be valid");

        let result = compute_generator_energy(DeviceId(1), &PANEL, &clip(&records, &window));

        assert!(result.is_err());
    }
}
