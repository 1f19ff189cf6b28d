use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use thiserror::Error;

use crate::domain::interval::TimeWindow;
use crate::domain::models::{
    ActivityReport, Building, BuildingId, ChargeStateSnapshot, DeviceId, DeviceRecord, DeviceSpec,
    JOB_CODE_CHARGING, JOB_CODE_USAGE, KIND_RECEIVER, NewChargeState, NewDevice, StorageJob,
    StorageJobReport, WeatherReport,
};

pub const LATEST_SCHEMA_VERSION: u32 = 1;

const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
CREATE TABLE IF NOT EXISTS buildings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    building_id INTEGER NOT NULL REFERENCES buildings (id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    power_watts REAL,
    supply_voltage REAL,
    generation_power_watts REAL,
    capacity_kwh REAL,
    battery_voltage REAL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_devices_building_id
ON devices (building_id);

CREATE TABLE IF NOT EXISTS device_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices (id) ON DELETE CASCADE,
    turned_on TEXT NOT NULL,
    turned_off TEXT,
    UNIQUE (device_id, turned_on)
);

CREATE TABLE IF NOT EXISTS weather_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    datetime_from TEXT NOT NULL,
    datetime_to TEXT,
    solar_radiation REAL NOT NULL,
    temperature REAL,
    wind_speed REAL
);

CREATE INDEX IF NOT EXISTS idx_weather_reports_datetime_from
ON weather_reports (datetime_from);

CREATE TABLE IF NOT EXISTS storage_job_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices (id) ON DELETE CASCADE,
    date_time_from TEXT NOT NULL,
    date_time_to TEXT,
    job_type TEXT NOT NULL CHECK (job_type IN ('CH', 'US')),
    receiver_id INTEGER REFERENCES devices (id),
    CHECK (job_type = 'CH' OR receiver_id IS NOT NULL),
    UNIQUE (device_id, date_time_from)
);

CREATE TABLE IF NOT EXISTS charge_state_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id INTEGER NOT NULL REFERENCES devices (id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    charge_value_kwh REAL NOT NULL CHECK (charge_value_kwh >= 0),
    UNIQUE (device_id, date)
);
"#,
)];

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
    #[error("invalid row in {table} (id {id}): {reason}")]
    InvalidRow {
        table: &'static str,
        id: i64,
        reason: String,
    },
    #[error("charge state conflict for device {device_id} at {at}: {reason}")]
    ChargeStateConflict {
        device_id: DeviceId,
        at: DateTime<Utc>,
        reason: String,
    },
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    let connection = Connection::open(path)?;
    connection.pragma_update(None, "foreign_keys", true)?;
    Ok(connection)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Fixed-width UTC text, so that SQL string comparison matches time order.
pub fn encode_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn timestamp_at(row: &Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    parse_timestamp(index, &raw)
}

fn optional_timestamp_at(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(index)?;
    raw.map(|raw| parse_timestamp(index, &raw)).transpose()
}

fn parse_timestamp(index: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
        })
}

pub fn insert_building(connection: &Connection, name: &str) -> Result<BuildingId, DbError> {
    connection.execute("INSERT INTO buildings (name) VALUES (?1)", params![name])?;
    Ok(BuildingId(connection.last_insert_rowid()))
}

pub fn get_building(
    connection: &Connection,
    building_id: BuildingId,
) -> Result<Option<Building>, DbError> {
    let building = connection
        .query_row(
            "SELECT id, name FROM buildings WHERE id = ?1",
            params![building_id.0],
            |row| {
                Ok(Building {
                    id: BuildingId(row.get(0)?),
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(building)
}

/// Inserts a device. Storage devices get a zero-charge snapshot dated at
/// creation within the same transaction.
pub fn insert_device(connection: &Connection, new_device: &NewDevice) -> Result<DeviceId, DbError> {
    let (power_watts, supply_voltage, generation_power_watts, capacity_kwh, battery_voltage) =
        match new_device.spec {
            DeviceSpec::Receiver(spec) => {
                (Some(spec.power_watts), Some(spec.supply_voltage), None, None, None)
            }
            DeviceSpec::Generator(spec) => {
                (None, None, Some(spec.generation_power_watts), None, None)
            }
            DeviceSpec::Storage(spec) => {
                (None, None, None, Some(spec.capacity_kwh), Some(spec.battery_voltage))
            }
        };

    let transaction = connection.unchecked_transaction()?;
    transaction.execute(
        "INSERT INTO devices (building_id, name, kind, power_watts, supply_voltage, generation_power_watts, capacity_kwh, battery_voltage, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            new_device.building_id.0,
            new_device.name,
            new_device.spec.kind(),
            power_watts,
            supply_voltage,
            generation_power_watts,
            capacity_kwh,
            battery_voltage,
            encode_timestamp(new_device.created_at),
        ],
    )?;
    let device_id = DeviceId(transaction.last_insert_rowid());

    if matches!(new_device.spec, DeviceSpec::Storage(_)) {
        transaction.execute(
            "INSERT INTO charge_state_snapshots (device_id, date, charge_value_kwh) VALUES (?1, ?2, 0.0)",
            params![device_id.0, encode_timestamp(new_device.created_at)],
        )?;
    }

    transaction.commit()?;
    Ok(device_id)
}

const DEVICE_COLUMNS: &str = "id, building_id, name, kind, power_watts, supply_voltage, generation_power_watts, capacity_kwh, battery_voltage";

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<DeviceRecord> {
    Ok(DeviceRecord {
        id: DeviceId(row.get(0)?),
        building_id: BuildingId(row.get(1)?),
        name: row.get(2)?,
        kind: row.get(3)?,
        power_watts: row.get(4)?,
        supply_voltage: row.get(5)?,
        generation_power_watts: row.get(6)?,
        capacity_kwh: row.get(7)?,
        battery_voltage: row.get(8)?,
    })
}

pub fn get_device(
    connection: &Connection,
    device_id: DeviceId,
) -> Result<Option<DeviceRecord>, DbError> {
    let device = connection
        .query_row(
            &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"),
            params![device_id.0],
            device_from_row,
        )
        .optional()?;
    Ok(device)
}

pub fn list_building_devices(
    connection: &Connection,
    building_id: BuildingId,
) -> Result<Vec<DeviceRecord>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {DEVICE_COLUMNS} FROM devices WHERE building_id = ?1 ORDER BY id ASC"
    ))?;
    let rows = statement.query_map(params![building_id.0], device_from_row)?;

    let mut devices = Vec::new();
    for row in rows {
        devices.push(row?);
    }

    Ok(devices)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewActivityReport {
    pub device_id: DeviceId,
    pub turned_on: DateTime<Utc>,
    pub turned_off: Option<DateTime<Utc>>,
}

pub fn insert_activity_report(
    connection: &Connection,
    report: &NewActivityReport,
) -> Result<i64, DbError> {
    connection.execute(
        "INSERT INTO device_reports (device_id, turned_on, turned_off) VALUES (?1, ?2, ?3)",
        params![
            report.device_id.0,
            encode_timestamp(report.turned_on),
            report.turned_off.map(encode_timestamp),
        ],
    )?;
    Ok(connection.last_insert_rowid())
}

/// Rows starting in the window, ending in it, spanning it, or still open at its
/// end. The window bounds are bound to parameters `?{first}` and `?{first + 1}`.
fn window_predicate(start_column: &str, end_column: &str, first: usize) -> String {
    let (lo, hi) = (format!("?{first}"), format!("?{}", first + 1));
    format!(
        "(({start_column} >= {lo} AND {start_column} <= {hi})
          OR ({end_column} >= {lo} AND {end_column} <= {hi})
          OR ({start_column} < {lo} AND {end_column} > {hi})
          OR ({start_column} < {hi} AND {end_column} IS NULL))"
    )
}

pub fn list_activity_reports(
    connection: &Connection,
    device_id: DeviceId,
    window: &TimeWindow,
) -> Result<Vec<ActivityReport>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT id, device_id, turned_on, turned_off
         FROM device_reports
         WHERE device_id = ?1 AND {}
         ORDER BY turned_on ASC, id ASC",
        window_predicate("turned_on", "turned_off", 2)
    ))?;

    let rows = statement.query_map(
        params![
            device_id.0,
            encode_timestamp(window.start()),
            encode_timestamp(window.end())
        ],
        |row| {
            Ok(ActivityReport {
                id: row.get(0)?,
                device_id: DeviceId(row.get(1)?),
                turned_on: timestamp_at(row, 2)?,
                turned_off: optional_timestamp_at(row, 3)?,
            })
        },
    )?;

    let mut reports = Vec::new();
    for row in rows {
        reports.push(row?);
    }

    Ok(reports)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewWeatherReport {
    pub datetime_from: DateTime<Utc>,
    pub datetime_to: Option<DateTime<Utc>>,
    pub solar_radiation: f64,
    pub temperature: Option<f64>,
    pub wind_speed: Option<f64>,
}

pub fn insert_weather_report(
    connection: &Connection,
    report: &NewWeatherReport,
) -> Result<i64, DbError> {
    connection.execute(
        "INSERT INTO weather_reports (datetime_from, datetime_to, solar_radiation, temperature, wind_speed)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            encode_timestamp(report.datetime_from),
            report.datetime_to.map(encode_timestamp),
            report.solar_radiation,
            report.temperature,
            report.wind_speed,
        ],
    )?;
    Ok(connection.last_insert_rowid())
}

pub fn list_weather_reports(
    connection: &Connection,
    window: &TimeWindow,
) -> Result<Vec<WeatherReport>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT id, datetime_from, datetime_to, solar_radiation, temperature, wind_speed
         FROM weather_reports
         WHERE {}
         ORDER BY datetime_from ASC, id ASC",
        window_predicate("datetime_from", "datetime_to", 1)
    ))?;

    let rows = statement.query_map(
        params![encode_timestamp(window.start()), encode_timestamp(window.end())],
        |row| {
            Ok(WeatherReport {
                id: row.get(0)?,
                datetime_from: timestamp_at(row, 1)?,
                datetime_to: optional_timestamp_at(row, 2)?,
                solar_radiation: row.get(3)?,
                temperature: row.get(4)?,
                wind_speed: row.get(5)?,
            })
        },
    )?;

    let mut reports = Vec::new();
    for row in rows {
        reports.push(row?);
    }

    Ok(reports)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStorageJobReport {
    pub device_id: DeviceId,
    pub date_time_from: DateTime<Utc>,
    pub date_time_to: Option<DateTime<Utc>>,
    /// `None` records a charging job, `Some` a usage job drawn by that receiver.
    pub usage_receiver: Option<DeviceId>,
}

pub fn insert_storage_job_report(
    connection: &Connection,
    report: &NewStorageJobReport,
) -> Result<i64, DbError> {
    let job_type = if report.usage_receiver.is_some() {
        JOB_CODE_USAGE
    } else {
        JOB_CODE_CHARGING
    };

    connection.execute(
        "INSERT INTO storage_job_reports (device_id, date_time_from, date_time_to, job_type, receiver_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            report.device_id.0,
            encode_timestamp(report.date_time_from),
            report.date_time_to.map(encode_timestamp),
            job_type,
            report.usage_receiver.map(|receiver| receiver.0),
        ],
    )?;
    Ok(connection.last_insert_rowid())
}

struct StorageJobRow {
    id: i64,
    device_id: i64,
    date_time_from: DateTime<Utc>,
    date_time_to: Option<DateTime<Utc>>,
    job_type: String,
    receiver_id: Option<i64>,
    receiver_kind: Option<String>,
    receiver_power_watts: Option<f64>,
}

impl StorageJobRow {
    fn into_report(self) -> Result<StorageJobReport, DbError> {
        let invalid = |reason: String| DbError::InvalidRow {
            table: "storage_job_reports",
            id: self.id,
            reason,
        };

        let job = match self.job_type.as_str() {
            JOB_CODE_CHARGING => StorageJob::Charging,
            JOB_CODE_USAGE => match (
                self.receiver_id,
                self.receiver_kind.as_deref(),
                self.receiver_power_watts,
            ) {
                (Some(receiver_id), Some(KIND_RECEIVER), Some(receiver_power_watts)) => {
                    StorageJob::Usage {
                        receiver_id: DeviceId(receiver_id),
                        receiver_power_watts,
                    }
                }
                (receiver_id, kind, _) => {
                    return Err(invalid(format!(
                        "usage job must reference a receiver with known power, got device {receiver_id:?} of kind {kind:?}"
                    )));
                }
            },
            other => return Err(invalid(format!("unknown job type `{other}`"))),
        };

        Ok(StorageJobReport {
            id: self.id,
            device_id: DeviceId(self.device_id),
            date_time_from: self.date_time_from,
            date_time_to: self.date_time_to,
            job,
        })
    }
}

pub fn list_storage_job_reports(
    connection: &Connection,
    device_id: DeviceId,
    window: &TimeWindow,
) -> Result<Vec<StorageJobReport>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT j.id, j.device_id, j.date_time_from, j.date_time_to, j.job_type, j.receiver_id, r.kind, r.power_watts
         FROM storage_job_reports j
         LEFT JOIN devices r ON r.id = j.receiver_id
         WHERE j.device_id = ?1 AND {}
         ORDER BY j.date_time_from ASC, j.id ASC",
        window_predicate("j.date_time_from", "j.date_time_to", 2)
    ))?;

    let rows = statement.query_map(
        params![
            device_id.0,
            encode_timestamp(window.start()),
            encode_timestamp(window.end())
        ],
        |row| {
            Ok(StorageJobRow {
                id: row.get(0)?,
                device_id: row.get(1)?,
                date_time_from: timestamp_at(row, 2)?,
                date_time_to: optional_timestamp_at(row, 3)?,
                job_type: row.get(4)?,
                receiver_id: row.get(5)?,
                receiver_kind: row.get(6)?,
                receiver_power_watts: row.get(7)?,
            })
        },
    )?;

    let mut reports = Vec::new();
    for row in rows {
        reports.push(row?.into_report()?);
    }

    Ok(reports)
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<ChargeStateSnapshot> {
    Ok(ChargeStateSnapshot {
        id: row.get(0)?,
        device_id: DeviceId(row.get(1)?),
        date: timestamp_at(row, 2)?,
        charge_value_kwh: row.get(3)?,
    })
}

pub fn latest_charge_state_at_or_before(
    connection: &Connection,
    device_id: DeviceId,
    at: DateTime<Utc>,
) -> Result<Option<ChargeStateSnapshot>, DbError> {
    let snapshot = connection
        .query_row(
            "SELECT id, device_id, date, charge_value_kwh
             FROM charge_state_snapshots
             WHERE device_id = ?1 AND date <= ?2
             ORDER BY date DESC
             LIMIT 1",
            params![device_id.0, encode_timestamp(at)],
            snapshot_from_row,
        )
        .optional()?;
    Ok(snapshot)
}

pub fn latest_charge_state(
    connection: &Connection,
    device_id: DeviceId,
) -> Result<Option<ChargeStateSnapshot>, DbError> {
    let snapshot = connection
        .query_row(
            "SELECT id, device_id, date, charge_value_kwh
             FROM charge_state_snapshots
             WHERE device_id = ?1
             ORDER BY date DESC
             LIMIT 1",
            params![device_id.0],
            snapshot_from_row,
        )
        .optional()?;
    Ok(snapshot)
}

/// Appends a snapshot dated strictly after the device's latest one.
pub fn append_charge_state(
    connection: &Connection,
    new_state: &NewChargeState,
) -> Result<ChargeStateSnapshot, DbError> {
    let conflict = |reason: String| DbError::ChargeStateConflict {
        device_id: new_state.device_id,
        at: new_state.date,
        reason,
    };

    let transaction = connection.unchecked_transaction()?;

    if let Some(latest) = latest_charge_state(&transaction, new_state.device_id)?
        && latest.date >= new_state.date
    {
        return Err(conflict(format!(
            "latest snapshot is dated {}",
            encode_timestamp(latest.date)
        )));
    }

    let inserted = transaction.execute(
        "INSERT INTO charge_state_snapshots (device_id, date, charge_value_kwh) VALUES (?1, ?2, ?3)",
        params![
            new_state.device_id.0,
            encode_timestamp(new_state.date),
            new_state.charge_value_kwh,
        ],
    );

    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(error, message))
            if error.code == ErrorCode::ConstraintViolation =>
        {
            return Err(conflict(
                message.unwrap_or_else(|| "constraint violation".to_string()),
            ));
        }
        Err(error) => return Err(error.into()),
    }

    let snapshot = ChargeStateSnapshot {
        id: transaction.last_insert_rowid(),
        device_id: new_state.device_id,
        date: new_state.date,
        charge_value_kwh: new_state.charge_value_kwh,
    };
    transaction.commit()?;

    Ok(snapshot)
}
