//! Process exit codes.
//!
//! Schedulers only see the status, so each fatal class gets its own code.

use crate::config::NoDataPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Points written, or nothing to do
    Success = 0,

    /// Fetch, extraction or sink failure
    Failure = 1,

    /// Missing or invalid configuration
    ConfigError = 2,

    /// Export has no readable device table
    NoData = 3,

    /// Export file not present on the remote store
    ExportMissing = 4,
}

impl ExitCode {
    pub fn for_no_data(policy: NoDataPolicy) -> Self {
        match policy {
            NoDataPolicy::Fail => ExitCode::NoData,
            NoDataPolicy::Success => ExitCode::Success,
        }
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Success
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
