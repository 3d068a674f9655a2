use crate::datasource::{DataSourceOptions, PgConnectorOptions};
use std::net::IpAddr;
use std::time::Duration;

pub const DEFAULT_WEB_PORT: u16 = 9188;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything the exporter needs to run; validated before construction.
#[derive(Clone, Debug)]
pub struct ExporterConfig {
    /// `None` binds `::`, falling back to `0.0.0.0`.
    pub listen: Option<IpAddr>,
    pub port: u16,
    pub metrics_path: String,
    pub cluster_name: String,
    pub nodes: Vec<String>,
    pub interval: Duration,
    pub connector: PgConnectorOptions,
    pub datasource: DataSourceOptions,
}

impl ExporterConfig {
    #[must_use]
    pub fn new(cluster_name: &str, nodes: Vec<String>, connector: PgConnectorOptions) -> Self {
        Self {
            listen: None,
            port: DEFAULT_WEB_PORT,
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
            cluster_name: cluster_name.to_string(),
            nodes,
            interval: DEFAULT_INTERVAL,
            connector,
            datasource: DataSourceOptions::default(),
        }
    }

    #[must_use]
    pub fn with_listen(mut self, listen: Option<IpAddr>) -> Self {
        self.listen = listen;
        self
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_metrics_path(mut self, path: &str) -> Self {
        self.metrics_path = path.to_string();
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_datasource(mut self, datasource: DataSourceOptions) -> Self {
        self.datasource = datasource;
        self
    }
}
