use crate::built_info;
use crate::datasource::postgres::DEFAULT_DBNAME;
use crate::exporter::DEFAULT_METRICS_PATH;
use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const DEFAULT_INTERVAL_SECS: &str = "15";
pub const DEFAULT_TIMEOUT_SECS: &str = "5";

fn long_version() -> &'static str {
    let version = built_info::GIT_COMMIT_HASH_SHORT.map_or_else(
        || built_info::PKG_VERSION.to_string(),
        |hash| format!("{} - {hash}", built_info::PKG_VERSION),
    );
    Box::leak(version.into_boxed_str())
}

#[must_use]
#[allow(clippy::too_many_lines)]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("pgrc_exporter")
        .about("PostgreSQL replication cluster exporter for Prometheus")
        .version(long_version())
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("listen")
                .short('l')
                .long("listen")
                .help("Address to bind, by default [::] with a fallback to 0.0.0.0")
                .env("PGRC_LISTEN"),
        )
        .arg(
            Arg::new("web-port")
                .short('w')
                .long("web-port")
                .help("Port to expose metrics on")
                .default_value("9188")
                .env("PGRC_WEB_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("path")
                .short('P')
                .long("path")
                .help("Path under which metrics are exposed")
                .default_value(DEFAULT_METRICS_PATH)
                .env("PGRC_PATH"),
        )
        .arg(
            Arg::new("cluster-name")
                .short('C')
                .long("cluster-name")
                .help("Cluster label, by default derived from the node list")
                .env("PGRC_CLUSTER_NAME"),
        )
        .arg(
            Arg::new("node")
                .short('n')
                .long("node")
                .help("Cluster node host, repeat or separate with commas")
                .env("PGRC_NODES")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("PostgreSQL port, shared by all nodes")
                .default_value("6432")
                .env("PGRC_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dbname")
                .short('d')
                .long("dbname")
                .help("Database to connect to")
                .default_value(DEFAULT_DBNAME)
                .env("PGRC_DBNAME"),
        )
        .arg(
            Arg::new("user")
                .short('u')
                .long("user")
                .help("Database user")
                .env("PGRC_USER"),
        )
        .arg(
            Arg::new("password")
                .short('s')
                .long("password")
                .help("Database password")
                .env("PGRC_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("sslmode")
                .long("sslmode")
                .help("libpq sslmode: disable, allow, prefer, require, verify-ca or verify-full")
                .default_value("disable")
                .env("PGRC_SSLMODE"),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .long("interval")
                .help("Seconds between collection cycles")
                .default_value(DEFAULT_INTERVAL_SECS)
                .env("PGRC_INTERVAL")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("connect-timeout")
                .long("connect-timeout")
                .help("Seconds to wait for a connection or ping")
                .default_value(DEFAULT_TIMEOUT_SECS)
                .env("PGRC_CONNECT_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("query-timeout")
                .long("query-timeout")
                .help("Seconds to wait for a query")
                .default_value(DEFAULT_TIMEOUT_SECS)
                .env("PGRC_QUERY_TIMEOUT")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("verbosity")
                .long("verbosity")
                .help("0 error, 1 warn, 2 info, 3 debug, 4 trace; RUST_LOG overrides")
                .default_value("2")
                .env("PGRC_VERBOSITY")
                .value_parser(clap::value_parser!(u8).range(0..=4)),
        )
}
