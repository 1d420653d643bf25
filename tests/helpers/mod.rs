#![allow(dead_code)]

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};

/// Subset of the Gadgetbridge export schema that the importer reads.
const SCHEMA: &str = "
CREATE TABLE DEVICE (_id INTEGER PRIMARY KEY, NAME TEXT NOT NULL);
CREATE TABLE HUAMI_SPO2_SAMPLE (TIMESTAMP INTEGER, DEVICE_ID INTEGER, USER_ID INTEGER, TYPE_NUM INTEGER, SPO2 INTEGER);
CREATE TABLE HUAMI_STRESS_SAMPLE (TIMESTAMP INTEGER, DEVICE_ID INTEGER, USER_ID INTEGER, TYPE_NUM INTEGER, STRESS INTEGER);
CREATE TABLE HUAMI_SLEEP_RESPIRATORY_RATE_SAMPLE (TIMESTAMP INTEGER, DEVICE_ID INTEGER, USER_ID INTEGER, RATE INTEGER);
CREATE TABLE HUAMI_PAI_SAMPLE (TIMESTAMP INTEGER, DEVICE_ID INTEGER, USER_ID INTEGER, UTC_OFFSET INTEGER,
    PAI_LOW REAL, PAI_MODERATE REAL, PAI_HIGH REAL, TIME_LOW INTEGER, TIME_MODERATE INTEGER, TIME_HIGH INTEGER,
    PAI_TODAY REAL, PAI_TOTAL REAL);
CREATE TABLE BATTERY_LEVEL (TIMESTAMP INTEGER, DEVICE_ID INTEGER, LEVEL INTEGER, BATTERY_INDEX INTEGER);
CREATE TABLE HUAMI_HEART_RATE_MANUAL_SAMPLE (TIMESTAMP INTEGER, DEVICE_ID INTEGER, USER_ID INTEGER, UTC_OFFSET INTEGER, HEART_RATE INTEGER);
CREATE TABLE HUAMI_HEART_RATE_MAX_SAMPLE (TIMESTAMP INTEGER, DEVICE_ID INTEGER, USER_ID INTEGER, UTC_OFFSET INTEGER, HEART_RATE INTEGER);
CREATE TABLE HUAMI_HEART_RATE_RESTING_SAMPLE (TIMESTAMP INTEGER, DEVICE_ID INTEGER, USER_ID INTEGER, UTC_OFFSET INTEGER, HEART_RATE INTEGER);
CREATE TABLE HUAMI_EXTENDED_ACTIVITY_SAMPLE (TIMESTAMP INTEGER, DEVICE_ID INTEGER, USER_ID INTEGER, RAW_INTENSITY INTEGER,
    STEPS INTEGER, RAW_KIND INTEGER, HEART_RATE INTEGER, UNKNOWN1 INTEGER, SLEEP INTEGER, DEEP_SLEEP INTEGER, REM_SLEEP INTEGER);
CREATE TABLE MI_BAND_ACTIVITY_SAMPLE (TIMESTAMP INTEGER, DEVICE_ID INTEGER, USER_ID INTEGER, RAW_INTENSITY INTEGER,
    STEPS INTEGER, RAW_KIND INTEGER, HEART_RATE INTEGER);
";

/// Fixed wall clock for the tests: 2026-10-16T12:00:00Z.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
}

pub fn now_secs() -> i64 {
    now().timestamp()
}

pub fn now_millis() -> i64 {
    now().timestamp_millis()
}

pub struct Export {
    pub conn: Connection,
}

impl Export {
    pub fn empty() -> Self {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        Self { conn }
    }

    /// Same schema, written to a file so it can be reopened read-only.
    pub fn at(path: &Path) -> Self {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        Self { conn }
    }

    pub fn device(self, id: i64, name: &str) -> Self {
        self.conn
            .execute("INSERT INTO DEVICE (_id, NAME) VALUES (?1, ?2)", params![id, name])
            .unwrap();
        self
    }

    pub fn spo2(self, ts_secs: i64, device: i64, value: i64) -> Self {
        self.conn
            .execute(
                "INSERT INTO HUAMI_SPO2_SAMPLE VALUES (?1, ?2, 1, 0, ?3)",
                params![ts_secs, device, value],
            )
            .unwrap();
        self
    }

    pub fn stress(self, ts_millis: i64, device: i64, value: i64) -> Self {
        self.conn
            .execute(
                "INSERT INTO HUAMI_STRESS_SAMPLE VALUES (?1, ?2, 1, 1, ?3)",
                params![ts_millis, device, value],
            )
            .unwrap();
        self
    }

    pub fn respiratory_rate(self, ts_millis: i64, device: i64, value: i64) -> Self {
        self.conn
            .execute(
                "INSERT INTO HUAMI_SLEEP_RESPIRATORY_RATE_SAMPLE VALUES (?1, ?2, 1, ?3)",
                params![ts_millis, device, value],
            )
            .unwrap();
        self
    }

    pub fn pai(self, ts_millis: i64, device: i64) -> Self {
        self.conn
            .execute(
                "INSERT INTO HUAMI_PAI_SAMPLE VALUES (?1, ?2, 1, 0, 1.5, 2.5, 0.0, 30, 12, 0, 4.0, 88.5)",
                params![ts_millis, device],
            )
            .unwrap();
        self
    }

    pub fn battery(self, ts_secs: i64, device: i64, level: i64, index: i64) -> Self {
        self.conn
            .execute(
                "INSERT INTO BATTERY_LEVEL VALUES (?1, ?2, ?3, ?4)",
                params![ts_secs, device, level, index],
            )
            .unwrap();
        self
    }

    /// `kind` is one of manual, max, resting.
    pub fn heart_rate(self, kind: &str, ts_millis: i64, device: i64, value: i64) -> Self {
        let table = match kind {
            "manual" => "HUAMI_HEART_RATE_MANUAL_SAMPLE",
            "max" => "HUAMI_HEART_RATE_MAX_SAMPLE",
            "resting" => "HUAMI_HEART_RATE_RESTING_SAMPLE",
            other => panic!("unknown heart rate kind {other}"),
        };
        self.conn
            .execute(
                &format!("INSERT INTO {table} VALUES (?1, ?2, 1, 0, ?3)"),
                params![ts_millis, device, value],
            )
            .unwrap();
        self
    }

    pub fn extended_activity(self, ts_millis: i64, device: i64, kind: i64, heart_rate: i64) -> Self {
        self.conn
            .execute(
                "INSERT INTO HUAMI_EXTENDED_ACTIVITY_SAMPLE VALUES (?1, ?2, 1, 40, 120, ?3, ?4, 0, -1, 0, 0)",
                params![ts_millis, device, kind, heart_rate],
            )
            .unwrap();
        self
    }

    pub fn periodic(self, ts_secs: i64, device: i64, intensity: i64, steps: i64) -> Self {
        self.conn
            .execute(
                "INSERT INTO MI_BAND_ACTIVITY_SAMPLE VALUES (?1, ?2, 1, ?3, ?4, 1, 70)",
                params![ts_secs, device, intensity, steps],
            )
            .unwrap();
        self
    }
}
