use pgrc_exporter::datasource::{DataSourceOptions, PgConnectorOptions};
use pgrc_exporter::exporter::ExporterConfig;
use secrecy::SecretString;
use std::net::{IpAddr, Ipv4Addr, TcpListener};
use std::time::Duration;
use tokio::time::sleep;

/// Loopback addresses with nothing listening on the `PostgreSQL` port.
pub const UNREACHABLE_NODES: [&str; 2] = ["127.0.0.1", "127.0.0.2"];

/// Get an available port for testing
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to ephemeral port")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

/// Build test URL for HTTP requests
pub fn get_test_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Wait for server to be ready
pub async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    for _ in 0..max_attempts {
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{port}"))
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }
    false
}

/// Exporter on `port` whose nodes refuse connections.
pub fn unreachable_cluster(port: u16, listen: Option<IpAddr>) -> ExporterConfig {
    ExporterConfig::new(
        "itest",
        UNREACHABLE_NODES.map(str::to_string).to_vec(),
        PgConnectorOptions::new("monitor", SecretString::from("secret".to_string())).with_port(1),
    )
    .with_listen(listen)
    .with_port(port)
    .with_interval(Duration::from_secs(1))
    .with_datasource(DataSourceOptions {
        connect_timeout: Duration::from_secs(1),
        query_timeout: Duration::from_secs(1),
    })
}

#[allow(dead_code)]
pub const LOCALHOST: Option<IpAddr> = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
