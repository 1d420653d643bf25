use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::load::DEFAULT_HEART_RATE_MAX;

/// What a run does when the export holds no readable device table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NoDataPolicy {
    /// Exit non-zero so the scheduler reports the run as failed
    Fail,
    /// Treat the run as a completed no-op
    Success,
}

/// UTC hours of the day (0-23) during which the wearer is expected to sleep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SleepHours(BTreeSet<u32>);

impl SleepHours {
    pub fn contains(&self, hour: u32) -> bool {
        self.0.contains(&hour)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<u32> for SleepHours {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        SleepHours(iter.into_iter().collect())
    }
}

pub fn parse_sleep_hours(raw: &str) -> Result<SleepHours, String> {
    let mut hours = BTreeSet::new();
    for token in raw.split(',').map(str::trim).filter(|token| !token.is_empty()) {
        let hour: u32 = token
            .parse()
            .map_err(|_| format!("'{token}' is not an hour of the day"))?;
        if hour > 23 {
            return Err(format!("hour {hour} is outside 0-23"));
        }
        hours.insert(hour);
    }
    Ok(SleepHours(hours))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("INFLUXDB_URL not set (required unless --dry-run)")]
    MissingSinkUrl,

    #[error("QUERY_DURATION must be between 1 and {max} seconds, got {got}", max = i64::MAX)]
    InvalidLookback { got: u64 },
}

/// Gadgetbridge export importer - pulls the export from WebDAV and writes recent samples to InfluxDB
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// WebDAV server base URL, scheme and host (e.g. https://cloud.example.com)
    #[arg(long, env = "WEBDAV_URL")]
    pub webdav_url: String,

    /// Directory on the WebDAV server holding the export
    #[arg(long, env = "WEBDAV_PATH", default_value = "files/service_user/GadgetBridge/")]
    pub webdav_path: String,

    #[arg(long, env = "WEBDAV_USER")]
    pub webdav_user: Option<String>,

    #[arg(long, env = "WEBDAV_PASS", hide_env_values = true)]
    pub webdav_pass: Option<String>,

    /// Name of the export file in the WebDAV directory
    #[arg(long, env = "EXPORT_FILENAME", default_value = "gadgetbridge")]
    pub export_filename: String,

    /// Lookback window in seconds
    #[arg(long, env = "QUERY_DURATION", default_value_t = 7200)]
    pub query_duration: u64,

    /// InfluxDB URL
    #[arg(long, env = "INFLUXDB_URL")]
    pub influxdb_url: Option<String>,

    #[arg(long, env = "INFLUXDB_TOKEN", hide_env_values = true)]
    pub influxdb_token: Option<String>,

    /// Accepted for compatibility only. The v1 /write endpoint used for
    /// writes takes no org, so this is logged and otherwise ignored
    #[arg(long, env = "INFLUXDB_ORG")]
    pub influxdb_org: Option<String>,

    /// Measurement name for every point written
    #[arg(long, env = "INFLUXDB_MEASUREMENT", default_value = "gadgetbridge")]
    pub influxdb_measurement: String,

    #[arg(long, env = "INFLUXDB_BUCKET", default_value = "testing_db")]
    pub influxdb_bucket: String,

    /// Comma-separated UTC hours excluded from the stress_exc_sleep field
    #[arg(long, env = "SLEEP_HOURS", default_value = "0,1,2,3,4,5,6", value_parser = parse_sleep_hours)]
    pub sleep_hours: SleepHours,

    /// heart_rate readings above this value are dropped as sensor glitches
    #[arg(long, env = "HEART_RATE_MAX", default_value_t = DEFAULT_HEART_RATE_MAX)]
    pub heart_rate_max: i64,

    /// Exit status when the export has no readable device table
    #[arg(long = "no-data", env = "NO_DATA_EXIT", value_enum, default_value_t = NoDataPolicy::Fail)]
    pub no_data: NoDataPolicy,

    /// Print normalized records as JSON lines instead of writing to InfluxDB
    #[arg(long, env = "DRY_RUN")]
    pub dry_run: bool,

    /// Also write debug-level logs to this file (console only when unset)
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Reject settings that would only fail later, after I/O has started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.dry_run && self.sink_url().is_none() {
            return Err(ConfigError::MissingSinkUrl);
        }
        if self.query_duration == 0 || i64::try_from(self.query_duration).is_err() {
            return Err(ConfigError::InvalidLookback {
                got: self.query_duration,
            });
        }
        Ok(())
    }

    pub fn sink_url(&self) -> Option<&str> {
        self.influxdb_url.as_deref().filter(|url| !url.is_empty())
    }

    /// Lookback in seconds, clamped into i64 for timestamp arithmetic.
    pub fn lookback_secs(&self) -> i64 {
        i64::try_from(self.query_duration).unwrap_or(i64::MAX)
    }
}
