pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod telemetry;

use crate::exporter::{ExporterError, SchedulerError};
use actions::Action;
use telemetry::TelemetryGuard;
use thiserror::Error;

/// Failures that stop the process, each with its own exit status.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Usage(#[from] clap::Error),

    #[error("{0} is mandatory")]
    MissingCredentials(&'static str),

    #[error("at least two distinct nodes are required, got {found}")]
    InsufficientNodes { found: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to initialize telemetry: {0:#}")]
    Telemetry(anyhow::Error),

    #[error("failed to schedule collection: {0}")]
    Scheduler(#[source] SchedulerError),

    #[error(transparent)]
    Server(ExporterError),
}

impl StartupError {
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) | Self::MissingCredentials(_) => 1,
            Self::Server(_) => 2,
            Self::Scheduler(_) => 3,
            Self::InsufficientNodes { .. } => 4,
            Self::InvalidConfig(_) => 5,
            Self::Telemetry(_) => 6,
        }
    }
}

impl From<ExporterError> for StartupError {
    fn from(e: ExporterError) -> Self {
        match e {
            ExporterError::Scheduler(e) => Self::Scheduler(e),
            ExporterError::InvalidPath { .. } => Self::InvalidConfig(e.to_string()),
            e => Self::Server(e),
        }
    }
}

/// Parse the command line, install logging and build the action to run.
/// Help and version requests print and exit here.
///
/// # Errors
///
/// Returns a [`StartupError`] for invalid arguments or configuration.
pub fn start() -> Result<(Action, TelemetryGuard), StartupError> {
    let matches = match commands::new().try_get_matches() {
        Ok(matches) => matches,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => return Err(e.into()),
    };

    let verbosity = matches.get_one::<u8>("verbosity").copied().unwrap_or(2);
    let guard = telemetry::init(telemetry::verbosity_level(verbosity)).map_err(StartupError::Telemetry)?;

    let action = dispatch::handler(&matches)?;

    Ok((action, guard))
}
