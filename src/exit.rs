//! Process exit codes
//!
//! Schedulers and wrapper scripts branch on these values, so they never
//! change. Per-file failures are not represented: a run that completes
//! exits with [`ExitStatus::Success`] whatever its counts.

use std::process::ExitCode;

use crate::config::ConfigError;
use crate::runner::{RunError, RunOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    Success = 0,
    /// Bad arguments, unreadable or incomplete configuration
    Usage = 1,
    HotDirMissing = 2,
    ColdDirMissing = 3,
    ConnectFailed = 4,
    AuthFailed = 5,
    Interrupted = 10,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

impl From<&ConfigError> for ExitStatus {
    fn from(error: &ConfigError) -> Self {
        match error {
            ConfigError::Defects(_) => Self::Usage,
            ConfigError::HotDirMissing(_) => Self::HotDirMissing,
            ConfigError::ColdDirMissing(_) => Self::ColdDirMissing,
        }
    }
}

impl From<&RunError> for ExitStatus {
    fn from(error: &RunError) -> Self {
        match error {
            // The hot folder vanished or became unreadable after validation
            RunError::Snapshot { .. } => Self::HotDirMissing,
            RunError::Connect(_) => Self::ConnectFailed,
            RunError::Auth(_) => Self::AuthFailed,
        }
    }
}

impl From<&RunOutcome> for ExitStatus {
    fn from(outcome: &RunOutcome) -> Self {
        if outcome.interrupted {
            Self::Interrupted
        } else {
            Self::Success
        }
    }
}
