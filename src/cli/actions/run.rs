use crate::cli::{StartupError, actions::Action};
use crate::exporter::new;

/// Handle the run action
///
/// # Errors
///
/// Returns an error if the exporter fails to start or stops abnormally
pub async fn handle(action: Action) -> Result<(), StartupError> {
    match action {
        Action::Run { config } => {
            new(config).await?;
        }
    }

    Ok(())
}
