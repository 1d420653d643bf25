use influxdb::{Client, Timestamp, WriteQuery};
use log::{debug, info};
use thiserror::Error;

use crate::config::Config;
use crate::record::{FieldValue, Record};

/// Heart rates above this are treated as sensor glitches unless overridden.
pub const DEFAULT_HEART_RATE_MAX: i64 = 253;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("record timestamp {0} is before the epoch")]
    NegativeTimestamp(i64),

    #[error("failed to write point {index} of {total}: {source}")]
    Write {
        index: usize,
        total: usize,
        #[source]
        source: influxdb::Error,
    },
}

/// Destination for finished points. Writes are awaited one at a time.
#[allow(async_fn_in_trait)]
pub trait PointSink {
    async fn write(&mut self, query: WriteQuery) -> Result<(), influxdb::Error>;
}

pub struct InfluxSink {
    client: Client,
}

impl InfluxSink {
    pub fn new(url: &str, bucket: &str, token: Option<&str>) -> Self {
        let client = Client::new(url, bucket);
        let client = match token {
            Some(token) if !token.is_empty() => client.with_token(token),
            _ => client,
        };
        Self { client }
    }

    pub fn from_config(config: &Config, url: &str) -> Self {
        Self::new(url, &config.influxdb_bucket, config.influxdb_token.as_deref())
    }
}

impl PointSink for InfluxSink {
    async fn write(&mut self, query: WriteQuery) -> Result<(), influxdb::Error> {
        self.client.query(query).await.map(|_| ())
    }
}

/// Field-level rules applied on the way into the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadFilter {
    pub heart_rate_max: i64,
}

impl Default for LoadFilter {
    fn default() -> Self {
        Self {
            heart_rate_max: DEFAULT_HEART_RATE_MAX,
        }
    }
}

impl From<&Config> for LoadFilter {
    fn from(config: &Config) -> Self {
        Self {
            heart_rate_max: config.heart_rate_max,
        }
    }
}

impl LoadFilter {
    pub fn keeps(&self, key: &str, value: &FieldValue) -> bool {
        if value.is_not_recorded() {
            return false;
        }
        !(key == "heart_rate" && value.exceeds(self.heart_rate_max))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub written: usize,
    /// Records with no field left after filtering.
    pub skipped: usize,
    pub fields_dropped: usize,
}

/// Build the point for one record, or `None` when filtering leaves it empty.
pub fn to_write_query(
    record: &Record,
    measurement: &str,
    filter: &LoadFilter,
) -> Result<Option<WriteQuery>, LoadError> {
    let nanos = u128::try_from(record.timestamp)
        .map_err(|_| LoadError::NegativeTimestamp(record.timestamp))?;

    let mut fields = record
        .fields
        .iter()
        .filter(|(key, value)| filter.keeps(key, value))
        .peekable();
    if fields.peek().is_none() {
        return Ok(None);
    }

    let mut query = WriteQuery::new(Timestamp::Nanoseconds(nanos), measurement);
    for (key, value) in &record.tags {
        query = query.add_tag(key.as_str(), value.to_string());
    }
    for (key, value) in fields {
        query = match *value {
            FieldValue::Integer(value) => query.add_field(key.as_str(), value),
            FieldValue::Float(value) => query.add_field(key.as_str(), value),
        };
    }
    Ok(Some(query))
}

/// Submit every record in order. The first failed write aborts the loop;
/// points already written stay written.
pub async fn load<S: PointSink>(
    sink: &mut S,
    records: &[Record],
    measurement: &str,
    filter: &LoadFilter,
) -> Result<LoadStats, LoadError> {
    let mut stats = LoadStats::default();
    let total = records.len();

    for (index, record) in records.iter().enumerate() {
        stats.fields_dropped += record
            .fields
            .iter()
            .filter(|(key, value)| !filter.keeps(key, value))
            .count();

        let Some(query) = to_write_query(record, measurement, filter)? else {
            debug!("Skipping record at {}: no fields left after filtering", record.timestamp);
            stats.skipped += 1;
            continue;
        };

        debug!("Query: {:#?}", &query);
        sink.write(query)
            .await
            .map_err(|source| LoadError::Write {
                index,
                total,
                source,
            })?;
        stats.written += 1;
    }

    info!(
        "Load finished: {} written, {} skipped, {} field(s) filtered",
        stats.written, stats.skipped, stats.fields_dropped
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use influxdb::Query;

    #[derive(Default)]
    struct RecordingSink {
        lines: Vec<String>,
        fail_after: Option<usize>,
    }

    impl PointSink for RecordingSink {
        async fn write(&mut self, query: WriteQuery) -> Result<(), influxdb::Error> {
            if self.fail_after == Some(self.lines.len()) {
                return Err(influxdb::Error::ConnectionError {
                    error: "refused".into(),
                });
            }
            self.lines.push(query.build()?.get());
            Ok(())
        }
    }

    fn line(record: &Record) -> Option<String> {
        to_write_query(record, "gadgetbridge", &LoadFilter::default())
            .unwrap()
            .map(|query| query.build().unwrap().get())
    }

    #[test]
    fn point_carries_tags_fields_and_timestamp() {
        let record = Record::new(1_700_000_000_000_000_000)
            .tag("device", "band")
            .tag("type_num", 0_i64)
            .field("spo2", 97_i64);
        let point = line(&record).unwrap();
        assert!(point.starts_with("gadgetbridge,"));
        assert!(point.contains("device=band"));
        assert!(point.contains("type_num=0"));
        assert!(point.contains(" spo2=97i "));
        assert!(point.ends_with(" 1700000000000000000"));
    }

    #[test]
    fn not_recorded_fields_are_dropped() {
        let record = Record::new(1)
            .tag("device", "band")
            .field("steps", -1_i64)
            .field("intensity", 20_i64);
        let point = line(&record).unwrap();
        assert!(point.contains("intensity=20i"));
        assert!(!point.contains("steps"));
    }

    #[test]
    fn heart_rate_above_limit_is_dropped() {
        let filter = LoadFilter::default();
        assert!(filter.keeps("heart_rate", &FieldValue::Integer(253)));
        assert!(!filter.keeps("heart_rate", &FieldValue::Integer(254)));
        assert!(filter.keeps("steps", &FieldValue::Integer(9_000)));

        let record = Record::new(1)
            .tag("device", "band")
            .field("heart_rate", 255_i64)
            .field("steps", 12_i64);
        let point = line(&record).unwrap();
        assert!(!point.contains("heart_rate"));
        assert!(point.contains("steps=12i"));
    }

    #[test]
    fn heart_rate_limit_is_configurable() {
        let filter = LoadFilter { heart_rate_max: 200 };
        assert!(!filter.keeps("heart_rate", &FieldValue::Integer(210)));
        assert!(filter.keeps("heart_rate", &FieldValue::Integer(200)));
    }

    #[test]
    fn record_with_nothing_left_is_not_a_point() {
        let record = Record::new(1).tag("device", "band").field("heart_rate", 255_i64);
        assert!(line(&record).is_none());
    }

    #[test]
    fn negative_timestamp_is_rejected() {
        let record = Record::new(-5).tag("device", "band").field("spo2", 97_i64);
        assert!(matches!(
            to_write_query(&record, "m", &LoadFilter::default()),
            Err(LoadError::NegativeTimestamp(-5))
        ));
    }

    #[tokio::test]
    async fn load_counts_written_and_skipped() {
        let records = vec![
            Record::new(1).tag("device", "band").field("spo2", 97_i64),
            Record::new(2).tag("device", "band").field("heart_rate", 300_i64),
            Record::new(3)
                .tag("device", "band")
                .field("steps", -1_i64)
                .field("intensity", 4_i64),
        ];
        let mut sink = RecordingSink::default();
        let stats = load(&mut sink, &records, "gadgetbridge", &LoadFilter::default())
            .await
            .unwrap();

        assert_eq!(
            stats,
            LoadStats {
                written: 2,
                skipped: 1,
                fields_dropped: 2,
            }
        );
        assert_eq!(sink.lines.len(), 2);
    }

    #[tokio::test]
    async fn write_failure_aborts_remaining_records() {
        let records: Vec<Record> = (1..=3)
            .map(|ts| Record::new(ts).tag("device", "band").field("spo2", 90 + ts))
            .collect();
        let mut sink = RecordingSink {
            fail_after: Some(1),
            ..Default::default()
        };
        let err = load(&mut sink, &records, "gadgetbridge", &LoadFilter::default())
            .await
            .unwrap_err();

        assert!(matches!(err, LoadError::Write { index: 1, total: 3, .. }));
        assert_eq!(sink.lines.len(), 1);
    }
}
