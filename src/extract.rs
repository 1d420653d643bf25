//! Extraction of recent samples from a Gadgetbridge export.
//!
//! Every sample table is read with the same shape of query (rows at or after
//! the cutoff, ascending by TIMESTAMP) and each row becomes one [`Record`]
//! with a nanosecond timestamp and a `device` tag. The newest timestamp per
//! device is tracked across all tables and turned into one `sync_check`
//! record per device at the end of the pass.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Timelike, Utc};
use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags, Row};
use thiserror::Error;

use crate::config::{Config, SleepHours};
use crate::record::{FieldValue, Record, RecordError, TimeUnit};

const HEART_RATE_TABLES: [(&str, &str); 3] = [
    ("manual", "HUAMI_HEART_RATE_MANUAL_SAMPLE"),
    ("max", "HUAMI_HEART_RATE_MAX_SAMPLE"),
    ("resting", "HUAMI_HEART_RATE_RESTING_SAMPLE"),
];

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The device table could not be read or is empty. Usually an export
    /// taken before the phone synced; the caller decides if this is fatal.
    #[error("no data in export: {0}")]
    NoData(String),

    #[error("failed to open snapshot {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{table} references unknown device id {id}")]
    UnknownDevice { table: &'static str, id: i64 },

    #[error("query against {table} failed: {source}")]
    Query {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("malformed record from {table}: {source}")]
    Record {
        table: &'static str,
        #[source]
        source: RecordError,
    },
}

/// Time bounds and classification settings for one extraction pass.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Oldest sample to include, epoch seconds.
    pub cutoff_secs: i64,
    /// Wall-clock time of the run, epoch nanoseconds.
    pub now_nanos: i64,
    pub sleep_hours: SleepHours,
}

impl ExtractOptions {
    pub fn new(now: DateTime<Utc>, lookback_secs: i64, sleep_hours: SleepHours) -> Self {
        Self {
            cutoff_secs: now.timestamp().saturating_sub(lookback_secs),
            now_nanos: now.timestamp_nanos_opt().unwrap_or(i64::MAX),
            sleep_hours,
        }
    }

    pub fn from_config(config: &Config, now: DateTime<Utc>) -> Self {
        Self::new(now, config.lookback_secs(), config.sleep_hours.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Sample records grouped by table, followed by one sync check per device.
    pub records: Vec<Record>,
    /// Newest normalized timestamp seen per device id.
    pub last_seen: BTreeMap<i64, i64>,
    /// Number of devices listed in the export.
    pub device_count: usize,
}

/// Open the downloaded export without any chance of modifying it.
pub fn open_snapshot(path: &Path) -> Result<Connection, ExtractError> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).map_err(|source| {
        ExtractError::Open {
            path: path.to_path_buf(),
            source,
        }
    })
}

pub fn extract(conn: &Connection, options: &ExtractOptions) -> Result<Extraction, ExtractError> {
    let devices = load_devices(conn)?;
    info!(
        "Found {} device(s), extracting samples since {}",
        devices.len(),
        options.cutoff_secs
    );

    let mut extractor = Extractor {
        conn,
        devices,
        cutoff_secs: options.cutoff_secs,
        records: Vec::new(),
        last_seen: BTreeMap::new(),
    };

    extractor.scan("HUAMI_SPO2_SAMPLE", "TYPE_NUM, SPO2", TimeUnit::Seconds, |row, _, record| {
        record.set_optional_tag("type_num", row.get::<_, Option<i64>>(2)?);
        record.set_field("spo2", row.get(3)?);
        Ok(())
    })?;

    let sleep_hours = &options.sleep_hours;
    extractor.scan(
        "HUAMI_STRESS_SAMPLE",
        "TYPE_NUM, STRESS",
        TimeUnit::Milliseconds,
        |row, raw_ts, record| {
            record.set_optional_tag("type_num", row.get::<_, Option<i64>>(2)?);
            let stress: Option<FieldValue> = row.get(3)?;
            record.set_field("stress", stress);
            if !is_sleep_hour(sleep_hours, raw_ts) {
                record.set_field("stress_exc_sleep", stress);
            }
            Ok(())
        },
    )?;

    extractor.scan(
        "HUAMI_SLEEP_RESPIRATORY_RATE_SAMPLE",
        "RATE",
        TimeUnit::Milliseconds,
        |row, _, record| {
            record.set_field("sleep_respiratory_rate", row.get(2)?);
            Ok(())
        },
    )?;

    extractor.scan(
        "HUAMI_PAI_SAMPLE",
        "PAI_LOW, PAI_MODERATE, PAI_HIGH, TIME_LOW, TIME_MODERATE, TIME_HIGH, PAI_TODAY, PAI_TOTAL",
        TimeUnit::Milliseconds,
        |row, _, record| {
            let names = [
                "pai_low",
                "pai_moderate",
                "pai_high",
                "time_low",
                "time_moderate",
                "time_high",
                "pai_today",
                "pai_total",
            ];
            for (offset, name) in names.into_iter().enumerate() {
                record.set_field(name, row.get(2 + offset)?);
            }
            Ok(())
        },
    )?;

    extractor.scan(
        "BATTERY_LEVEL",
        "LEVEL, BATTERY_INDEX",
        TimeUnit::Seconds,
        |row, _, record| {
            record.set_field("battery_level", row.get(2)?);
            record.set_optional_tag("battery", row.get::<_, Option<i64>>(3)?);
            Ok(())
        },
    )?;

    for (sample_type, table) in HEART_RATE_TABLES {
        extractor.scan(table, "HEART_RATE", TimeUnit::Milliseconds, |row, _, record| {
            record.set_tag("sample_type", sample_type);
            record.set_field("heart_rate", row.get(2)?);
            Ok(())
        })?;
    }

    extractor.scan(
        "HUAMI_EXTENDED_ACTIVITY_SAMPLE",
        "RAW_INTENSITY, STEPS, RAW_KIND, HEART_RATE, SLEEP, DEEP_SLEEP, REM_SLEEP",
        TimeUnit::Milliseconds,
        |row, _, record| {
            record.set_field("intensity", row.get(2)?);
            record.set_field("steps", row.get(3)?);
            record.set_optional_tag("activity_kind", row.get::<_, Option<i64>>(4)?);
            record.set_field("heart_rate", row.get(5)?);
            record.set_field("sleep", row.get(6)?);
            record.set_field("deep_sleep", row.get(7)?);
            record.set_field("rem_sleep", row.get(8)?);
            record.set_tag("sample_type", "activity");
            Ok(())
        },
    )?;

    extractor.scan(
        "MI_BAND_ACTIVITY_SAMPLE",
        "RAW_INTENSITY, STEPS, RAW_KIND",
        TimeUnit::Seconds,
        |row, _, record| {
            let raw_intensity: Option<FieldValue> = row.get(2)?;
            record.set_field("intensity", raw_intensity);
            record.set_field("steps", row.get(3)?);
            record.set_field("raw_intensity", raw_intensity);
            record.set_field("raw_kind", row.get(4)?);
            record.set_tag("sample_type", "periodic_samples");
            Ok(())
        },
    )?;

    extractor.push_sync_checks(options.now_nanos)?;

    Ok(Extraction {
        device_count: extractor.devices.len(),
        records: extractor.records,
        last_seen: extractor.last_seen,
    })
}

fn load_devices(conn: &Connection) -> Result<HashMap<i64, String>, ExtractError> {
    let read = || -> rusqlite::Result<HashMap<i64, String>> {
        let mut stmt = conn.prepare("SELECT _id, NAME FROM DEVICE")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    };

    let devices = read().map_err(|err| ExtractError::NoData(err.to_string()))?;
    if devices.is_empty() {
        return Err(ExtractError::NoData("DEVICE table is empty".into()));
    }
    Ok(devices)
}

/// Stress samples taken outside the configured sleep hours (UTC) also feed
/// `stress_exc_sleep`. A timestamp chrono cannot represent counts as awake.
fn is_sleep_hour(sleep_hours: &SleepHours, raw_millis: i64) -> bool {
    Utc.timestamp_millis_opt(raw_millis)
        .single()
        .map(|ts| sleep_hours.contains(ts.hour()))
        .unwrap_or(false)
}

struct Extractor<'c> {
    conn: &'c Connection,
    devices: HashMap<i64, String>,
    cutoff_secs: i64,
    records: Vec<Record>,
    last_seen: BTreeMap<i64, i64>,
}

impl<'c> Extractor<'c> {
    /// Read one sample table. `columns` are selected after TIMESTAMP and
    /// DEVICE_ID, so the closure sees them starting at index 2.
    fn scan<F>(
        &mut self,
        table: &'static str,
        columns: &str,
        unit: TimeUnit,
        mut fill: F,
    ) -> Result<usize, ExtractError>
    where
        F: FnMut(&Row<'_>, i64, &mut Record) -> rusqlite::Result<()>,
    {
        let query_err = |source| ExtractError::Query { table, source };
        let sql = format!(
            "SELECT TIMESTAMP, DEVICE_ID, {columns} FROM {table} \
             WHERE TIMESTAMP >= ?1 ORDER BY TIMESTAMP ASC"
        );
        let conn = self.conn;
        let mut stmt = conn.prepare(&sql).map_err(query_err)?;
        let mut rows = stmt
            .query([unit.express_seconds(self.cutoff_secs)])
            .map_err(query_err)?;

        let mut count = 0;
        while let Some(row) = rows.next().map_err(query_err)? {
            let raw_ts: i64 = row.get(0).map_err(query_err)?;
            let device_id: i64 = row.get(1).map_err(query_err)?;
            let device = self
                .devices
                .get(&device_id)
                .ok_or(ExtractError::UnknownDevice { table, id: device_id })?;

            let timestamp = unit.to_nanos(raw_ts);
            let mut record = Record::new(timestamp).tag("device", device.as_str());
            fill(row, raw_ts, &mut record).map_err(query_err)?;

            let seen = self.last_seen.entry(device_id).or_insert(timestamp);
            *seen = (*seen).max(timestamp);

            if record.fields.is_empty() {
                warn!("Skipping {table} row at {raw_ts}: every value is NULL");
                continue;
            }
            record
                .validate()
                .map_err(|source| ExtractError::Record { table, source })?;
            self.records.push(record);
            count += 1;
        }

        debug!("{table}: {count} record(s)");
        Ok(count)
    }

    fn push_sync_checks(&mut self, now_nanos: i64) -> Result<(), ExtractError> {
        for (&device_id, &last_seen) in &self.last_seen {
            let device = self.devices.get(&device_id).ok_or(ExtractError::UnknownDevice {
                table: "DEVICE",
                id: device_id,
            })?;
            let record = Record::new(now_nanos)
                .tag("device", device.as_str())
                .tag("sample_type", "sync_check")
                .field("last_seen", last_seen)
                .field("last_seen_age", now_nanos.saturating_sub(last_seen));
            debug!("Sync check for {device}: last seen {last_seen}");
            self.records.push(record);
        }
        Ok(())
    }
}
