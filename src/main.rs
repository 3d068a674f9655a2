use pgrc_exporter::cli::{self, actions};
use std::process::ExitCode;
use tracing::{debug, error};

#[tokio::main]
async fn main() -> ExitCode {
    let (action, telemetry) = match cli::start() {
        Ok(started) => started,
        Err(e) => {
            // logging may not be installed yet
            eprintln!("{e}");
            return ExitCode::from(e.exit_code());
        }
    };
    debug!(otlp = telemetry.is_exporting(), "telemetry initialized");

    match actions::run::handle(action).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "exporter failed");
            ExitCode::from(e.exit_code())
        }
    }
}
