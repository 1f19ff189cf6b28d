use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::adapters::db::{open_connection, run_migrations};
use crate::domain::interval::{TimeWindow, Timespan};
use crate::domain::models::{
    ActivityReport, ChargeStateSnapshot, DeviceId, NewChargeState, StorageJob, StorageJobReport,
    WeatherReport,
};
use crate::domain::ports::{ChargeLedger, ReportStore, StoreError};

static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn open_test_connection(test_name: &str) -> Connection {
    let template = ensure_template_db();
    let test_db_path = unique_test_db_path(test_name);

    if let Some(parent) = test_db_path.parent() {
        std::fs::create_dir_all(parent).expect("test db dir should be creatable");
    }

    std::fs::copy(&template, &test_db_path).expect("template db should be copied");
    open_connection(test_db_path.to_string_lossy().as_ref()).expect("test db should open")
}

fn ensure_template_db() -> PathBuf {
    static TEMPLATE_PATH: OnceLock<PathBuf> = OnceLock::new();

    TEMPLATE_PATH
        .get_or_init(|| {
            let template_path = std::env::var("TEST_DB_TEMPLATE_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| Path::new("./target/testdb/template.sqlite").to_path_buf());

            if let Some(parent) = template_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).expect("template parent dir should be creatable");
            }

            let mut connection = open_connection(template_path.to_string_lossy().as_ref())
                .expect("template db opens");
            run_migrations(&mut connection).expect("template migrations should succeed");

            template_path
        })
        .clone()
}

fn unique_test_db_path(test_name: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    Path::new("./target/testdb").join(format!("{test_name}-{now}-{counter}.sqlite"))
}

/// Report store and charge ledger backed by plain vectors.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Records>,
    next_id: AtomicI64,
}

#[derive(Default)]
struct Records {
    activity: Vec<ActivityReport>,
    weather: Vec<WeatherReport>,
    jobs: Vec<StorageJobReport>,
    snapshots: Vec<ChargeStateSnapshot>,
}

impl InMemoryStore {
    fn records(&self) -> MutexGuard<'_, Records> {
        self.inner.lock().expect("in-memory store lock")
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add_activity(
        &self,
        device_id: DeviceId,
        turned_on: DateTime<Utc>,
        turned_off: Option<DateTime<Utc>>,
    ) {
        let id = self.next_id();
        self.records().activity.push(ActivityReport {
            id,
            device_id,
            turned_on,
            turned_off,
        });
    }

    pub fn add_weather(
        &self,
        datetime_from: DateTime<Utc>,
        datetime_to: Option<DateTime<Utc>>,
        solar_radiation: f64,
    ) {
        let id = self.next_id();
        self.records().weather.push(WeatherReport {
            id,
            datetime_from,
            datetime_to,
            solar_radiation,
            temperature: None,
            wind_speed: None,
        });
    }

    pub fn add_storage_job(
        &self,
        device_id: DeviceId,
        date_time_from: DateTime<Utc>,
        date_time_to: Option<DateTime<Utc>>,
        job: StorageJob,
    ) {
        let id = self.next_id();
        self.records().jobs.push(StorageJobReport {
            id,
            device_id,
            date_time_from,
            date_time_to,
            job,
        });
    }

    /// Inserts a snapshot without the ordering checks of [`ChargeLedger::append`].
    pub fn seed_charge_state(
        &self,
        device_id: DeviceId,
        date: DateTime<Utc>,
        charge_value_kwh: f64,
    ) {
        let id = self.next_id();
        self.records().snapshots.push(ChargeStateSnapshot {
            id,
            device_id,
            date,
            charge_value_kwh,
        });
    }

    pub fn snapshot_count(&self, device_id: DeviceId) -> usize {
        self.records()
            .snapshots
            .iter()
            .filter(|snapshot| snapshot.device_id == device_id)
            .count()
    }
}

fn select<T: Timespan + Clone>(
    records: &[T],
    window: &TimeWindow,
    keep: impl Fn(&T) -> bool,
) -> Vec<T> {
    let mut selected: Vec<T> = records
        .iter()
        .filter(|record| keep(*record) && window.selects(record.span_start(), record.span_end()))
        .cloned()
        .collect();
    selected.sort_by_key(|record| record.span_start());
    selected
}

impl ReportStore for InMemoryStore {
    fn activity_reports(
        &self,
        device_id: DeviceId,
        window: &TimeWindow,
    ) -> Result<Vec<ActivityReport>, StoreError> {
        Ok(select(&self.records().activity, window, |report| {
            report.device_id == device_id
        }))
    }

    fn weather_reports(&self, window: &TimeWindow) -> Result<Vec<WeatherReport>, StoreError> {
        Ok(select(&self.records().weather, window, |_| true))
    }

    fn storage_job_reports(
        &self,
        device_id: DeviceId,
        window: &TimeWindow,
    ) -> Result<Vec<StorageJobReport>, StoreError> {
        Ok(select(&self.records().jobs, window, |report| {
            report.device_id == device_id
        }))
    }
}

impl ChargeLedger for InMemoryStore {
    fn latest_at_or_before(
        &self,
        device_id: DeviceId,
        at: DateTime<Utc>,
    ) -> Result<Option<ChargeStateSnapshot>, StoreError> {
        Ok(self
            .records()
            .snapshots
            .iter()
            .filter(|snapshot| snapshot.device_id == device_id && snapshot.date <= at)
            .max_by_key(|snapshot| snapshot.date)
            .copied())
    }

    fn latest(&self, device_id: DeviceId) -> Result<Option<ChargeStateSnapshot>, StoreError> {
        Ok(self
            .records()
            .snapshots
            .iter()
            .filter(|snapshot| snapshot.device_id == device_id)
            .max_by_key(|snapshot| snapshot.date)
            .copied())
    }

    fn append(&self, new_state: &NewChargeState) -> Result<ChargeStateSnapshot, StoreError> {
        if let Some(latest) = self.latest(new_state.device_id)?
            && latest.date >= new_state.date
        {
            return Err(StoreError::Conflict {
                device_id: new_state.device_id,
                at: new_state.date,
                reason: format!("latest snapshot is dated {}", latest.date),
            });
        }

        let snapshot = ChargeStateSnapshot {
            id: self.next_id(),
            device_id: new_state.device_id,
            date: new_state.date,
            charge_value_kwh: new_state.charge_value_kwh,
        };
        self.records().snapshots.push(snapshot);
        Ok(snapshot)
    }
}
