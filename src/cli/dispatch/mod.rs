use crate::{
    cli::{StartupError, actions::Action},
    datasource::{
        DataSourceOptions, PgConnectorOptions,
        postgres::{DEFAULT_DBNAME, DEFAULT_PORT},
    },
    exporter::{DEFAULT_METRICS_PATH, DEFAULT_WEB_PORT, ExporterConfig, validate_metrics_path},
};
use clap::ArgMatches;
use md5::{Digest, Md5};
use secrecy::SecretString;
use sqlx::postgres::PgSslMode;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::Duration;
use tracing::info;

/// Default cluster label: `cluster-` and the first three bytes of the MD5 of
/// the sorted hosts joined by commas.
#[must_use]
pub fn cluster_hash(hosts: &[String]) -> String {
    let mut sorted: Vec<&str> = hosts.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let digest = Md5::digest(sorted.join(",").as_bytes());
    format!("cluster-{}", hex::encode(digest.get(..3).unwrap_or_default()))
}

/// Trimmed, non-empty, distinct hosts in sorted order.
#[must_use]
pub fn normalize_hosts<'a, I>(hosts: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    hosts
        .into_iter()
        .map(|h| h.trim())
        .filter(|h| !h.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn non_empty<'a>(matches: &'a ArgMatches, id: &str) -> Option<&'a str> {
    matches
        .get_one::<String>(id)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

fn seconds(matches: &ArgMatches, id: &str, default: u64) -> Duration {
    Duration::from_secs(matches.get_one::<u64>(id).copied().unwrap_or(default))
}

/// # Errors
///
/// Returns an error if credentials are missing, fewer than two nodes are
/// given, or a setting cannot be parsed.
pub fn handler(matches: &ArgMatches) -> Result<Action, StartupError> {
    let user = non_empty(matches, "user").ok_or(StartupError::MissingCredentials("user"))?;

    // the password is used verbatim, only emptiness is checked
    let password = matches
        .get_one::<String>("password")
        .filter(|s| !s.is_empty())
        .cloned()
        .map(SecretString::from)
        .ok_or(StartupError::MissingCredentials("password"))?;

    let nodes = normalize_hosts(matches.get_many::<String>("node").into_iter().flatten());
    if nodes.len() < 2 {
        return Err(StartupError::InsufficientNodes { found: nodes.len() });
    }

    let cluster_name = non_empty(matches, "cluster-name").map_or_else(|| cluster_hash(&nodes), str::to_string);

    let ssl_mode = non_empty(matches, "sslmode")
        .unwrap_or("disable")
        .parse::<PgSslMode>()
        .map_err(|e| StartupError::InvalidConfig(format!("sslmode: {e}")))?;

    let metrics_path = non_empty(matches, "path").unwrap_or(DEFAULT_METRICS_PATH);
    validate_metrics_path(metrics_path)
        .map_err(|reason| StartupError::InvalidConfig(format!("path {metrics_path:?} {reason}")))?;

    let listen = non_empty(matches, "listen")
        .map(|addr| {
            addr.trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<IpAddr>()
                .map_err(|e| StartupError::InvalidConfig(format!("listen address {addr:?}: {e}")))
        })
        .transpose()?;

    let connector = PgConnectorOptions::new(user, password)
        .with_port(matches.get_one::<u16>("port").copied().unwrap_or(DEFAULT_PORT))
        .with_dbname(non_empty(matches, "dbname").unwrap_or(DEFAULT_DBNAME))
        .with_ssl_mode(ssl_mode);

    let config = ExporterConfig::new(&cluster_name, nodes, connector)
        .with_listen(listen)
        .with_port(matches.get_one::<u16>("web-port").copied().unwrap_or(DEFAULT_WEB_PORT))
        .with_metrics_path(metrics_path)
        .with_interval(seconds(matches, "interval", 15))
        .with_datasource(DataSourceOptions {
            connect_timeout: seconds(matches, "connect-timeout", 5),
            query_timeout: seconds(matches, "query-timeout", 5),
        });

    info!(
        cluster = %config.cluster_name,
        nodes = ?config.nodes,
        user,
        dbname = %config.connector.dbname,
        port = config.connector.port,
        "configuration loaded"
    );

    Ok(Action::Run { config })
}
