pub mod run;

use crate::exporter::ExporterConfig;

#[derive(Debug)]
pub enum Action {
    Run { config: ExporterConfig },
}
