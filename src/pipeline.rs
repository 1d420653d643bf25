//! One import pass: validate, fetch, extract, load.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};

use crate::config::{Config, ConfigError, NoDataPolicy};
use crate::exit::ExitCode;
use crate::extract::{extract, open_snapshot, ExtractError, ExtractOptions};
use crate::fetch::{fetch_export, FetchError, RemoteStore};
use crate::load::{load, LoadFilter, PointSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    NoData,
}

/// Run one pass against `store`. `connect` builds the sink from the
/// configured URL and is only called once there are records to write.
///
/// The scratch directory lives only inside this function, so it is gone
/// before the caller sees the result on every path.
pub async fn run<S, P, F>(
    config: &Config,
    store: &S,
    now: DateTime<Utc>,
    connect: F,
) -> Result<Outcome>
where
    S: RemoteStore,
    P: PointSink,
    F: FnOnce(&str) -> P,
{
    config.validate()?;

    info!(
        "Fetching {} from {} under {}",
        config.export_filename, config.webdav_url, config.webdav_path
    );
    let scratch = fetch_export(store, &config.webdav_path, &config.export_filename)
        .await
        .context("Failed to fetch export")?;

    let conn = open_snapshot(&scratch.snapshot_path())?;
    let options = ExtractOptions::from_config(config, now);
    let extraction = match extract(&conn, &options) {
        Err(ExtractError::NoData(reason)) => {
            warn!("Export holds no usable data: {reason}");
            return Ok(Outcome::NoData);
        }
        other => other.context("Extraction failed")?,
    };
    info!(
        "Extracted {} record(s) covering {} of {} device(s)",
        extraction.records.len(),
        extraction.last_seen.len(),
        extraction.device_count
    );

    if config.dry_run {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for record in &extraction.records {
            serde_json::to_writer(&mut out, record)?;
            writeln!(out)?;
        }
        return Ok(Outcome::Completed);
    }

    let url = config.sink_url().ok_or(ConfigError::MissingSinkUrl)?;
    info!(
        "Writing to {} bucket {} (org {}) as measurement {}",
        url,
        config.influxdb_bucket,
        config.influxdb_org.as_deref().unwrap_or("-"),
        config.influxdb_measurement
    );
    let mut sink = connect(url);
    load(
        &mut sink,
        &extraction.records,
        &config.influxdb_measurement,
        &LoadFilter::from(config),
    )
    .await
    .context("Failed to write points")?;

    Ok(Outcome::Completed)
}

/// Map the result of a pass to the process status, logging the error chain.
pub fn exit_code_for(result: &Result<Outcome>, policy: NoDataPolicy) -> ExitCode {
    match result {
        Ok(Outcome::Completed) => ExitCode::Success,
        Ok(Outcome::NoData) => ExitCode::for_no_data(policy),
        Err(err) => {
            error!("Error: {err:#}");
            if err.downcast_ref::<ConfigError>().is_some() {
                return ExitCode::ConfigError;
            }
            match err.downcast_ref::<FetchError>() {
                Some(FetchError::ExportMissing { .. }) => ExitCode::ExportMissing,
                _ => ExitCode::Failure,
            }
        }
    }
}
