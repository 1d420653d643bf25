use std::fs::OpenOptions;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{error, info, Log};

use gadgetbridge_importer::config::Config;
use gadgetbridge_importer::exit::ExitCode;
use gadgetbridge_importer::fetch::WebDavStore;
use gadgetbridge_importer::load::InfluxSink;
use gadgetbridge_importer::pipeline::{exit_code_for, run};

fn main() -> std::process::ExitCode {
    let config = Config::parse();

    if let Err(err) = setup_logging(&config) {
        eprintln!("Error: failed to set up logging: {err:#}");
        return ExitCode::Failure.into();
    }

    // Stages run strictly in sequence on one thread.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Error: {err:#}");
            return ExitCode::Failure.into();
        }
    };

    let store = WebDavStore::from_config(&config);
    let result = runtime.block_on(run(&config, &store, Utc::now(), |url| {
        InfluxSink::from_config(&config, url)
    }));
    let code = exit_code_for(&result, config.no_data);
    info!("Exiting with status {}", code as u8);
    code.into()
}

// Console logging always; a log file, when configured, also gets debug output.
fn setup_logging(config: &Config) -> Result<()> {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let console = pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .build();

    let Some(path) = &config.log_file else {
        let max_level = console.filter();
        log::set_boxed_logger(Box::new(console))?;
        log::set_max_level(max_level);
        return Ok(());
    };

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let file = pretty_env_logger::formatted_builder()
        .parse_filters("debug")
        .target(pretty_env_logger::env_logger::Target::Pipe(Box::new(log_file)))
        .build();

    let max_level = console.filter().max(file.filter());
    log::set_boxed_logger(Box::new(LogDispatcher { console, file }))?;
    log::set_max_level(max_level);
    Ok(())
}

// Custom logger that dispatches to both console and file
struct LogDispatcher {
    console: pretty_env_logger::env_logger::Logger,
    file: pretty_env_logger::env_logger::Logger,
}

impl Log for LogDispatcher {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.console.enabled(metadata) || self.file.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        self.console.log(record);
        self.file.log(record);
    }

    fn flush(&self) {
        self.console.flush();
        self.file.flush();
    }
}
