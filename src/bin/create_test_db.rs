use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;

use smarthome_energy::adapters::db::{
    NewActivityReport, NewStorageJobReport, NewWeatherReport, insert_activity_report,
    insert_building, insert_device, insert_storage_job_report, insert_weather_report,
    open_connection, run_migrations, schema_version,
};
use smarthome_energy::domain::models::{
    DeviceSpec, GeneratorSpec, NewDevice, ReceiverSpec, StorageSpec,
};

fn main() {
    if let Err(error) = run() {
        eprintln!("failed to create test db: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut path = if cfg!(windows) {
        ".\\data\\smarthome_test.db".to_string()
    } else {
        "./data/smarthome_test.db".to_string()
    };
    let mut force = false;
    let mut seed = false;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--path" => {
                let Some(value) = args.get(index + 1) else {
                    return Err("--path requires a value".to_string());
                };
                path = value.clone();
                index += 2;
            }
            "--force" => {
                force = true;
                index += 1;
            }
            "--seed" => {
                seed = true;
                index += 1;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }

    let path_ref = Path::new(&path);
    if let Some(parent) = path_ref.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|error| format!("failed to create parent directory: {error}"))?;
    }

    if force && path_ref.exists() {
        std::fs::remove_file(path_ref)
            .map_err(|error| format!("failed to remove existing db file: {error}"))?;
    }

    let mut connection = open_connection(&path).map_err(|error| error.to_string())?;
    run_migrations(&mut connection).map_err(|error| error.to_string())?;
    let version = schema_version(&connection).map_err(|error| error.to_string())?;

    println!("created/updated test db at: {path}");
    println!("schema version: {version}");

    if seed {
        seed_demo_building(&connection).map_err(|error| error.to_string())?;
        println!("seeded demo building with one device of each kind");
    }

    Ok(())
}

fn at(hour: u32, minute: u32) -> Result<DateTime<Utc>, String> {
    Utc.with_ymd_and_hms(2022, 3, 30, hour, minute, 0)
        .single()
        .ok_or_else(|| format!("invalid demo time {hour:02}:{minute:02}"))
}

fn seed_demo_building(connection: &Connection) -> Result<(), String> {
    let created_at = at(6, 0)?;
    let building_id = insert_building(connection, "Demo house").map_err(|e| e.to_string())?;

    let bulb = insert_device(
        connection,
        &NewDevice {
            building_id,
            name: "Bulb".to_string(),
            spec: DeviceSpec::Receiver(ReceiverSpec {
                power_watts: 60.0,
                supply_voltage: 230.0,
            }),
            created_at,
        },
    )
    .map_err(|e| e.to_string())?;
    insert_device(
        connection,
        &NewDevice {
            building_id,
            name: "Roof panel".to_string(),
            spec: DeviceSpec::Generator(GeneratorSpec {
                generation_power_watts: 635.0,
            }),
            created_at,
        },
    )
    .map_err(|e| e.to_string())?;
    let battery = insert_device(
        connection,
        &NewDevice {
            building_id,
            name: "Battery".to_string(),
            spec: DeviceSpec::Storage(StorageSpec {
                capacity_kwh: 200.0,
                battery_voltage: 24.0,
            }),
            created_at,
        },
    )
    .map_err(|e| e.to_string())?;

    insert_activity_report(
        connection,
        &NewActivityReport {
            device_id: bulb,
            turned_on: at(7, 0)?,
            turned_off: Some(at(15, 45)?),
        },
    )
    .map_err(|e| e.to_string())?;

    for (from, to, radiation) in [
        (at(10, 30)?, Some(at(11, 0)?), 340.0),
        (at(11, 0)?, Some(at(12, 0)?), 360.0),
        (at(12, 0)?, Some(at(12, 15)?), 410.0),
        (at(12, 15)?, None, 312.0),
    ] {
        insert_weather_report(
            connection,
            &NewWeatherReport {
                datetime_from: from,
                datetime_to: to,
                solar_radiation: radiation,
                temperature: Some(10.5),
                wind_speed: Some(5.0),
            },
        )
        .map_err(|e| e.to_string())?;
    }

    for (from, to, usage_receiver) in [
        (at(9, 0)?, Some(at(11, 0)?), None),
        (at(11, 0)?, Some(at(12, 0)?), Some(bulb)),
    ] {
        insert_storage_job_report(
            connection,
            &NewStorageJobReport {
                device_id: battery,
                date_time_from: from,
                date_time_to: to,
                usage_receiver,
            },
        )
        .map_err(|e| e.to_string())?;
    }

    Ok(())
}

fn print_help() {
    println!("create_test_db");
    println!();
    println!("Usage:");
    println!("  cargo run --bin create_test_db -- [--path <file>] [--force] [--seed]");
    println!();
    println!("Options:");
    println!(
        "  --path <file>   target sqlite file (default: .\\\\data\\\\smarthome_test.db on Windows)"
    );
    println!("  --force         delete existing file before creating");
    println!("  --seed          insert a demo building with one device of each kind");
}
