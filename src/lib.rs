pub mod cli;
pub mod cluster;
pub mod datasource;
pub mod exporter;
pub mod metrics;

#[allow(clippy::all, clippy::pedantic, clippy::nursery)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
